//! # gradeportal-storage
//!
//! Storage abstraction layer for the grade portal.
//!
//! This crate defines the traits and types that all storage backends must implement.
//! It does not contain any implementations - those are provided by
//! `gradeportal-db-memory` and `gradeportal-db-postgres`.
//!
//! ## Overview
//!
//! - [`GradeStorage`]: the system of record (grade reads, release policy, writes via [`Transaction`])
//! - [`OutboxStorage`]: the cache invalidation outbox with claim-based state transitions
//!
//! ## Example
//!
//! ```ignore
//! use gradeportal_storage::{GradeStorage, NewOutboxRecord, StorageError};
//!
//! async fn release(storage: &dyn GradeStorage, payload: String) -> Result<(), StorageError> {
//!     let mut tx = storage.begin_transaction().await?;
//!     tx.update_release_status("2024-1", true).await?;
//!     tx.insert_outbox(&NewOutboxRecord::new("CACHE_INVALIDATE", payload)).await?;
//!     tx.commit().await
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::{GradeStorage, OutboxStorage, Transaction};
pub use types::{
    CACHE_INVALIDATE_EVENT, GradeDetail, GradeSummary, NewObjection, NewOutboxRecord,
    ObjectionReceipt, OutboxRecord, OutboxStats, ProcessingStatus, mask_student_id,
};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared grade storage trait object.
pub type DynGradeStorage = std::sync::Arc<dyn GradeStorage>;

/// Type alias for a shared outbox storage trait object.
pub type DynOutboxStorage = std::sync::Arc<dyn OutboxStorage>;
