//! Applies decoded invalidation intents to the caches.

use async_trait::async_trait;
use gradeportal_cache::{GradeCaches, SemesterKey, StudentSemester};

use crate::error::OutboxError;
use crate::payload::{InvalidationPayload, InvalidationTarget};

/// Something that can apply an invalidation intent. Applying the same intent
/// twice must leave the same state as applying it once.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, payload: &InvalidationPayload) -> Result<(), OutboxError>;
}

fn student_key(payload: &InvalidationPayload) -> Result<StudentSemester, OutboxError> {
    payload
        .student_id
        .map(|student_id| StudentSemester::new(student_id, payload.semester.as_str()))
        .ok_or_else(|| {
            OutboxError::InvalidPayload(format!("{} invalidation requires studentId", payload.cache_type))
        })
}

#[async_trait]
impl CacheInvalidator for GradeCaches {
    async fn invalidate(&self, payload: &InvalidationPayload) -> Result<(), OutboxError> {
        match payload.cache_type {
            InvalidationTarget::Summary => {
                self.summary.evict(&student_key(payload)?).await;
            }
            InvalidationTarget::List => {
                self.list.evict(&student_key(payload)?).await;
            }
            InvalidationTarget::ReleasePolicy => {
                self.release_policy
                    .evict(&SemesterKey::new(payload.semester.as_str()))
                    .await;
            }
            InvalidationTarget::All => {
                let key = student_key(payload)?;
                self.summary.evict(&key).await;
                self.list.evict(&key).await;
            }
            InvalidationTarget::Unknown => {
                tracing::warn!(semester = %payload.semester, "Unknown cache invalidation type, skipping");
            }
        }
        Ok(())
    }
}
