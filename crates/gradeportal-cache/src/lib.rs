//! Resilient read-through caching for the grade portal.
//!
//! ## Architecture
//!
//! - **CacheStore**: key-value backend, Redis when available, local DashMap otherwise
//! - **CircuitBreaker**: per-cache failure gate that bypasses an unhealthy backend
//! - **DistributedLock**: single-flight guard so concurrent misses load once
//! - **ReadThroughCache**: get / get_or_load / put / evict with jittered TTLs
//!
//! ```text
//! read → ReadThroughCache → CacheStore (Redis)
//!                  ↓ miss          ↓ error / breaker open
//!           lock + loader      loader (database)
//! ```

pub mod breaker;
pub mod config;
pub mod error;
pub mod grades;
pub mod lock;
pub mod metrics;
pub mod read_through;
pub mod store;

pub use breaker::{BreakerState, CircuitBreaker};
pub use config::{CacheSettings, LoadPolicy, RedisSettings, TtlSettings};
pub use error::CacheError;
pub use grades::{
    GradeCaches, GradeListCache, ReleasePolicyCache, SemesterKey, StudentSemester, SummaryCache,
};
pub use lock::DistributedLock;
pub use read_through::{CacheKey, ReadThroughCache};
pub use store::{CacheStore, CachedEntry, LocalStore, RedisStore, create_cache_store};
