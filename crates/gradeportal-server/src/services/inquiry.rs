use gradeportal_cache::{GradeCaches, StudentSemester};
use gradeportal_storage::{DynGradeStorage, GradeDetail, GradeSummary, mask_student_id};
use std::sync::Arc;
use tracing::{debug, warn};

use super::ReleasePolicyService;
use crate::error::{ServiceError, ServiceResult};

/// Serves grade summaries and grade lists, cache first.
///
/// Requests for a semester whose grades are not released are rejected before
/// any grade data is read. With `strict_check` on, the release flag is
/// re-read from the primary after the data is fetched, so a withdrawn release
/// takes effect before the invalidation worker gets to it.
pub struct GradeInquiryService {
    storage: DynGradeStorage,
    caches: GradeCaches,
    release_policy: Arc<ReleasePolicyService>,
    strict_check: bool,
}

impl GradeInquiryService {
    pub fn new(
        storage: DynGradeStorage,
        caches: GradeCaches,
        release_policy: Arc<ReleasePolicyService>,
        strict_check: bool,
    ) -> Self {
        Self {
            storage,
            caches,
            release_policy,
            strict_check,
        }
    }

    pub async fn grade_summary(&self, student_id: i64, semester: &str) -> ServiceResult<GradeSummary> {
        self.ensure_released(semester).await?;

        let key = StudentSemester::new(student_id, semester);
        let summary = self
            .caches
            .summary
            .get_or_load(&key, || self.load_summary(student_id, semester))
            .await?;

        if self.strict_check && !self.release_policy.is_released_strict(semester).await? {
            self.caches.summary.evict(&key).await;
            warn!(semester, "Grade inquiry rejected, release withdrawn");
            return Err(ServiceError::not_released(semester));
        }
        Ok(summary)
    }

    pub async fn grade_list(&self, student_id: i64, semester: &str) -> ServiceResult<Vec<GradeDetail>> {
        self.ensure_released(semester).await?;

        let key = StudentSemester::new(student_id, semester);
        let details = self
            .caches
            .list
            .get_or_load(&key, || self.load_list(student_id, semester))
            .await?;

        // An empty list reveals nothing, so it skips the strict check.
        if self.strict_check
            && !details.is_empty()
            && !self.release_policy.is_released_strict(semester).await?
        {
            self.caches.list.evict(&key).await;
            warn!(semester, "Grade inquiry rejected, release withdrawn");
            return Err(ServiceError::not_released(semester));
        }
        Ok(details)
    }

    async fn ensure_released(&self, semester: &str) -> ServiceResult<()> {
        if self.release_policy.is_released_cached(semester).await? {
            Ok(())
        } else {
            warn!(semester, "Grade inquiry rejected, not released");
            Err(ServiceError::not_released(semester))
        }
    }

    async fn load_summary(&self, student_id: i64, semester: &str) -> ServiceResult<GradeSummary> {
        let summary = self.storage.find_summary(student_id, semester).await?;
        debug!(student = %mask_student_id(student_id), semester, found = summary.is_some(), "Loaded grade summary");
        summary.ok_or_else(|| {
            ServiceError::not_found(
                "grade summary",
                format!("{}:{semester}", mask_student_id(student_id)),
            )
        })
    }

    async fn load_list(&self, student_id: i64, semester: &str) -> ServiceResult<Vec<GradeDetail>> {
        let details = self.storage.find_grade_details(student_id, semester).await?;
        debug!(student = %mask_student_id(student_id), semester, count = details.len(), "Loaded grade list");
        Ok(details)
    }
}
