//! `GradeStorage` and `Transaction` for the in-memory backend.

use async_trait::async_trait;
use gradeportal_storage::{
    GradeDetail, GradeStorage, GradeSummary, NewObjection, NewOutboxRecord, ObjectionReceipt,
    StorageError, Transaction,
};
use std::sync::Arc;

use crate::storage::{InMemoryStorage, StoredObjection, Tables};

#[async_trait]
impl GradeStorage for InMemoryStorage {
    async fn find_summary(
        &self,
        student_id: i64,
        semester: &str,
    ) -> Result<Option<GradeSummary>, StorageError> {
        Ok(self
            .tables
            .summaries
            .get(&(student_id, semester.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn find_grade_details(
        &self,
        student_id: i64,
        semester: &str,
    ) -> Result<Vec<GradeDetail>, StorageError> {
        let mut details: Vec<GradeDetail> = self
            .tables
            .enrollments
            .iter()
            .filter(|entry| entry.student_id == student_id && entry.semester == semester)
            .map(|entry| {
                let mut detail = entry.detail.clone();
                if !detail.is_finalized {
                    detail.grade_letter = None;
                    detail.score = None;
                }
                detail
            })
            .collect();
        details.sort_by(|a, b| a.course_code.cmp(&b.course_code));
        Ok(details)
    }

    async fn find_release_status(&self, semester: &str) -> Result<Option<bool>, StorageError> {
        Ok(self.tables.release_policies.get(semester).map(|entry| *entry))
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError> {
        Ok(Box::new(InMemoryTransaction::new(self.tables.clone())))
    }

    fn backend_name(&self) -> &'static str {
        "in-memory-dashmap"
    }
}

/// In-memory transaction.
///
/// Operations are validated when issued and collected; they are applied
/// together on commit and dropped on rollback.
pub struct InMemoryTransaction {
    tables: Arc<Tables>,
    operations: Vec<TransactionOp>,
}

enum TransactionOp {
    SetRelease { semester: String, is_released: bool },
    InsertObjection(StoredObjection),
    InsertOutbox { id: i64, record: NewOutboxRecord },
}

impl InMemoryTransaction {
    fn new(tables: Arc<Tables>) -> Self {
        Self {
            tables,
            operations: Vec::new(),
        }
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let InMemoryTransaction { tables, operations } = *self;
        let _guard = tables
            .commit_lock
            .lock()
            .map_err(|_| StorageError::transaction_error("commit lock poisoned"))?;

        for op in operations {
            match op {
                TransactionOp::SetRelease {
                    semester,
                    is_released,
                } => {
                    tables.release_policies.insert(semester, is_released);
                }
                TransactionOp::InsertObjection(objection) => {
                    tables.objections.insert(objection.objection_id, objection);
                }
                TransactionOp::InsertOutbox { id, record } => {
                    tables.insert_outbox(id, &record);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        tracing::debug!(
            operations = self.operations.len(),
            "in-memory transaction rolled back"
        );
        Ok(())
    }

    async fn update_release_status(
        &mut self,
        semester: &str,
        is_released: bool,
    ) -> Result<bool, StorageError> {
        if !self.tables.release_policies.contains_key(semester) {
            return Ok(false);
        }
        self.operations.push(TransactionOp::SetRelease {
            semester: semester.to_string(),
            is_released,
        });
        Ok(true)
    }

    async fn insert_objection(
        &mut self,
        student_id: i64,
        objection: &NewObjection,
    ) -> Result<Option<ObjectionReceipt>, StorageError> {
        let semester = match self.tables.enrollments.get(&objection.enrollment_id) {
            Some(enrollment) if enrollment.student_id == student_id => enrollment.semester.clone(),
            _ => return Ok(None),
        };

        let objection_id = self.tables.next_id();
        self.operations
            .push(TransactionOp::InsertObjection(StoredObjection {
                objection_id,
                student_id,
                objection: objection.clone(),
            }));
        Ok(Some(ObjectionReceipt {
            objection_id,
            semester,
        }))
    }

    async fn insert_outbox(&mut self, record: &NewOutboxRecord) -> Result<i64, StorageError> {
        let id = self.tables.next_id();
        self.operations.push(TransactionOp::InsertOutbox {
            id,
            record: record.clone(),
        });
        Ok(id)
    }
}
