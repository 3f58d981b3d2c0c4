//! Grade portal application layer.
//!
//! Loads configuration, sets up tracing and metrics, wires the storage
//! backend and cache store into the grade services, and runs the cache
//! invalidation worker.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod observability;
pub mod services;

pub use bootstrap::{App, OutboxWorker};
pub use config::AppConfig;
pub use error::{ServiceError, ServiceResult};
pub use health::{HealthReport, HealthStatus};
pub use services::{GradeInquiryService, ObjectionService, ReleasePolicyService};
