//! Storage traits for the grade portal storage abstraction layer.
//!
//! Backends implement [`GradeStorage`] for the system of record and
//! [`OutboxStorage`] for the invalidation outbox table.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::types::{
    GradeDetail, GradeSummary, NewObjection, NewOutboxRecord, ObjectionReceipt, OutboxRecord,
    OutboxStats,
};

/// The system of record for grades and release policies.
///
/// Grade reads may land on a lagging read replica; release-policy reads always
/// go to the primary. Writes happen only through a [`Transaction`].
#[async_trait]
pub trait GradeStorage: Send + Sync {
    /// Reads the grade summary of a student for a semester.
    ///
    /// Returns `None` if no summary exists.
    async fn find_summary(
        &self,
        student_id: i64,
        semester: &str,
    ) -> Result<Option<GradeSummary>, StorageError>;

    /// Reads the course-level grade list of a student for a semester, ordered by course code.
    async fn find_grade_details(
        &self,
        student_id: i64,
        semester: &str,
    ) -> Result<Vec<GradeDetail>, StorageError>;

    /// Reads the release flag of a semester from the primary.
    ///
    /// Returns `None` if no policy row exists for the semester.
    async fn find_release_status(&self, semester: &str) -> Result<Option<bool>, StorageError>;

    /// Begins a new transaction on the primary.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` if a transaction cannot be started.
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError>;

    /// Returns the name of this storage backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// A transaction for performing a business write together with its outbox records.
///
/// Nothing is visible to other callers until `commit`. Dropping a transaction
/// without committing discards all of its operations.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Commits all operations in this transaction.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Rolls back all operations in this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;

    /// Sets the release flag of a semester.
    ///
    /// Returns `false` if no policy row exists for the semester.
    async fn update_release_status(
        &mut self,
        semester: &str,
        is_released: bool,
    ) -> Result<bool, StorageError>;

    /// Stores an objection for an enrollment owned by `student_id`.
    ///
    /// Returns `None` if the enrollment does not exist or belongs to another student.
    async fn insert_objection(
        &mut self,
        student_id: i64,
        objection: &NewObjection,
    ) -> Result<Option<ObjectionReceipt>, StorageError>;

    /// Appends a `PENDING` outbox record and returns its id.
    async fn insert_outbox(&mut self, record: &NewOutboxRecord) -> Result<i64, StorageError>;
}

/// The outbox table consumed by the invalidation worker.
///
/// Every state transition is a conditional update on the current status and
/// reports whether it applied, so concurrent workers never process the same
/// record at the same time.
#[async_trait]
pub trait OutboxStorage: Send + Sync {
    /// Inserts a `PENDING` record outside of any business transaction.
    async fn insert(&self, record: &NewOutboxRecord) -> Result<i64, StorageError>;

    /// Gets a record by id.
    async fn get(&self, id: i64) -> Result<Option<OutboxRecord>, StorageError>;

    /// Fetches up to `limit` `PENDING` records of `event_type`, oldest first,
    /// skipping records whose retry count has reached `max_retries`.
    async fn fetch_pending(
        &self,
        event_type: &str,
        max_retries: u32,
        limit: u32,
    ) -> Result<Vec<OutboxRecord>, StorageError>;

    /// `PENDING` → `PROCESSING`. Returns `false` if another worker got there first.
    async fn claim(&self, id: i64) -> Result<bool, StorageError>;

    /// `PROCESSING` → `COMPLETED`.
    async fn mark_completed(
        &self,
        id: i64,
        processed_at: OffsetDateTime,
    ) -> Result<bool, StorageError>;

    /// `PROCESSING` → `FAILED`, incrementing the retry count.
    async fn mark_failed(&self, id: i64, processed_at: OffsetDateTime)
    -> Result<bool, StorageError>;

    /// Finds `PROCESSING` records created before `threshold`.
    async fn find_stuck(&self, threshold: OffsetDateTime)
    -> Result<Vec<OutboxRecord>, StorageError>;

    /// `PROCESSING` → `PENDING`, incrementing the retry count and clearing `processed_at`.
    async fn reset_stuck(&self, id: i64) -> Result<bool, StorageError>;

    /// `FAILED` → `PENDING` for records of `event_type` whose retry count is below
    /// `max_retries`. Returns the number of requeued records.
    async fn requeue_failed(&self, event_type: &str, max_retries: u32)
    -> Result<u64, StorageError>;

    /// Counts records by status.
    async fn stats(&self) -> Result<OutboxStats, StorageError>;
}
