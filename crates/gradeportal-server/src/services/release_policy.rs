use gradeportal_cache::{ReleasePolicyCache, SemesterKey};
use gradeportal_outbox::{InvalidationPayload, InvalidationPublisher};
use gradeportal_storage::{DynGradeStorage, Transaction};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ServiceError, ServiceResult};

/// Reads and changes whether a semester's grades are open for inquiry.
pub struct ReleasePolicyService {
    storage: DynGradeStorage,
    cache: Arc<ReleasePolicyCache>,
    publisher: InvalidationPublisher,
}

impl ReleasePolicyService {
    pub fn new(storage: DynGradeStorage, cache: Arc<ReleasePolicyCache>) -> Self {
        Self {
            storage,
            cache,
            publisher: InvalidationPublisher::new(),
        }
    }

    /// Release flag through the cache; a miss loads it from the primary.
    pub async fn is_released_cached(&self, semester: &str) -> ServiceResult<bool> {
        self.cache
            .get_or_load(&SemesterKey::new(semester), || {
                self.is_released_strict(semester)
            })
            .await
    }

    /// Release flag read from the primary. A semester without a policy row
    /// is not released.
    pub async fn is_released_strict(&self, semester: &str) -> ServiceResult<bool> {
        match self.storage.find_release_status(semester).await? {
            Some(is_released) => {
                debug!(semester, is_released, "Loaded grade release policy");
                Ok(is_released)
            }
            None => {
                warn!(semester, "Grade release policy not found");
                Ok(false)
            }
        }
    }

    /// Updates the policy row and queues the invalidation of its cache entry
    /// in the same transaction.
    ///
    /// # Errors
    ///
    /// [`ServiceError::UnknownSemester`] if the semester has no policy row.
    pub async fn update_release_policy(&self, semester: &str, is_released: bool) -> ServiceResult<()> {
        let mut tx = self.storage.begin_transaction().await?;
        let result = self.apply(tx.as_mut(), semester, is_released).await;
        super::finish(tx, result).await?;
        info!(semester, is_released, "Grade release policy updated");
        Ok(())
    }

    async fn apply(
        &self,
        tx: &mut dyn Transaction,
        semester: &str,
        is_released: bool,
    ) -> ServiceResult<()> {
        if !tx.update_release_status(semester, is_released).await? {
            return Err(ServiceError::UnknownSemester {
                semester: semester.to_string(),
            });
        }
        let payload = InvalidationPayload::release_policy(semester)
            .with_reason(format!("release policy set to {is_released}"));
        self.publisher.append(tx, &payload).await?;
        Ok(())
    }
}
