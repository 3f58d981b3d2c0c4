//! Application services: grade inquiry, release policy and objections.

mod inquiry;
mod objection;
mod release_policy;

pub use inquiry::GradeInquiryService;
pub use objection::ObjectionService;
pub use release_policy::ReleasePolicyService;

use gradeportal_storage::Transaction;

use crate::error::ServiceResult;

/// Commits `tx` when `result` is `Ok`, rolls it back otherwise.
async fn finish<T>(tx: Box<dyn Transaction>, result: ServiceResult<T>) -> ServiceResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}
