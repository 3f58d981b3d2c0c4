use gradeportal_outbox::{InvalidationPayload, InvalidationPublisher};
use gradeportal_storage::{
    DynGradeStorage, NewObjection, ObjectionReceipt, Transaction, mask_student_id,
};
use tracing::info;

use crate::error::{ServiceError, ServiceResult};

/// Files grade objections.
///
/// An objection may change the student's grades, so the same transaction
/// queues an invalidation of their summary and list for that semester.
pub struct ObjectionService {
    storage: DynGradeStorage,
    publisher: InvalidationPublisher,
}

impl ObjectionService {
    pub fn new(storage: DynGradeStorage) -> Self {
        Self {
            storage,
            publisher: InvalidationPublisher::new(),
        }
    }

    /// # Errors
    ///
    /// [`ServiceError::EnrollmentNotOwned`] if the enrollment does not exist or
    /// belongs to another student. Nothing is written in that case.
    pub async fn create_objection(
        &self,
        student_id: i64,
        objection: &NewObjection,
    ) -> ServiceResult<ObjectionReceipt> {
        let mut tx = self.storage.begin_transaction().await?;
        let result = self.record(tx.as_mut(), student_id, objection).await;
        let receipt = super::finish(tx, result).await?;
        info!(
            objection_id = receipt.objection_id,
            student = %mask_student_id(student_id),
            semester = %receipt.semester,
            "Grade objection created"
        );
        Ok(receipt)
    }

    async fn record(
        &self,
        tx: &mut dyn Transaction,
        student_id: i64,
        objection: &NewObjection,
    ) -> ServiceResult<ObjectionReceipt> {
        let receipt = tx
            .insert_objection(student_id, objection)
            .await?
            .ok_or(ServiceError::EnrollmentNotOwned {
                enrollment_id: objection.enrollment_id,
            })?;

        let payload = InvalidationPayload::all(student_id, &receipt.semester)
            .with_reason(format!("objection {} created", receipt.objection_id));
        self.publisher.append(tx, &payload).await?;
        Ok(receipt)
    }
}
