use gradeportal_storage::{
    CACHE_INVALIDATE_EVENT, NewOutboxRecord, StorageError, Transaction, mask_student_id,
};

use crate::payload::InvalidationPayload;

/// Appends invalidation intents to the outbox inside the caller's transaction.
///
/// The intent becomes visible to the worker only when the business write commits,
/// and disappears with it on rollback.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvalidationPublisher;

impl InvalidationPublisher {
    pub fn new() -> Self {
        Self
    }

    /// Serializes `payload` and inserts a `PENDING` record through `tx`.
    ///
    /// Returns the new record id, or `None` if the payload could not be
    /// serialized (logged; the business transaction carries on).
    ///
    /// # Errors
    ///
    /// Returns the storage error of the insert. The surrounding transaction is
    /// unusable at that point and should be rolled back by the caller.
    pub async fn append(
        &self,
        tx: &mut dyn Transaction,
        payload: &InvalidationPayload,
    ) -> Result<Option<i64>, StorageError> {
        let student = payload.student_id.map(mask_student_id);
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(
                    cache_type = %payload.cache_type,
                    student = ?student,
                    semester = %payload.semester,
                    error = %e,
                    "Failed to serialize cache invalidation event"
                );
                return Ok(None);
            }
        };

        let id = tx
            .insert_outbox(&NewOutboxRecord::new(CACHE_INVALIDATE_EVENT, json))
            .await?;
        tracing::debug!(
            event_id = id,
            cache_type = %payload.cache_type,
            student = ?student,
            semester = %payload.semester,
            reason = ?payload.reason,
            "Published cache invalidation event"
        );
        Ok(Some(id))
    }
}
