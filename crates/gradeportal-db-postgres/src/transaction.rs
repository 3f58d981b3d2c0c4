//! PostgreSQL transaction for release changes, objections and outbox rows.

use async_trait::async_trait;
use sqlx_postgres::{PgConnection, PgTransaction};
use tokio::sync::Mutex;

use gradeportal_storage::{
    NewObjection, NewOutboxRecord, ObjectionReceipt, ProcessingStatus, StorageError, Transaction,
};

use crate::convert::time_to_chrono;
use crate::error::query_error;

/// Wraps an sqlx transaction on the primary pool.
///
/// The transaction rolls back on drop if it was never committed, so an
/// early return discards the outbox rows together with the business write.
pub struct PostgresTransaction {
    /// Taken on commit or rollback; `None` afterwards.
    tx: Mutex<Option<Box<PgTransaction<'static>>>>,
}

impl PostgresTransaction {
    pub fn new(tx: PgTransaction<'static>) -> Self {
        Self {
            tx: Mutex::new(Some(Box::new(tx))),
        }
    }

    fn connection(&mut self) -> Result<&mut PgConnection, StorageError> {
        let tx = self.tx.get_mut().as_deref_mut().ok_or_else(|| {
            StorageError::transaction_error(
                "Transaction already completed (committed or rolled back)",
            )
        })?;
        Ok(&mut **tx)
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.commit().await.map_err(|e| {
                StorageError::transaction_error(format!("Failed to commit transaction: {e}"))
            })?;
            tracing::debug!("Transaction committed successfully");
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.rollback().await.map_err(|e| {
                StorageError::transaction_error(format!("Failed to rollback transaction: {e}"))
            })?;
            tracing::debug!("Transaction rolled back successfully");
        }
        Ok(())
    }

    async fn update_release_status(
        &mut self,
        semester: &str,
        is_released: bool,
    ) -> Result<bool, StorageError> {
        let conn = self.connection()?;
        let result = sqlx_core::query::query(
            r#"
            UPDATE grade_release_policy
            SET is_released = $2, updated_at = NOW()
            WHERE semester = $1
            "#,
        )
        .bind(semester)
        .bind(is_released)
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_objection(
        &mut self,
        student_id: i64,
        objection: &NewObjection,
    ) -> Result<Option<ObjectionReceipt>, StorageError> {
        let conn = self.connection()?;
        // Ownership check and insert in one statement.
        let row: Option<(i64, String)> = sqlx_core::query_as::query_as(
            r#"
            WITH owned AS (
                SELECT enrollment_id, student_id, semester
                FROM enrollments
                WHERE enrollment_id = $1 AND student_id = $2
            ), inserted AS (
                INSERT INTO grade_objections (enrollment_id, student_id, title, reason)
                SELECT enrollment_id, student_id, $3, $4 FROM owned
                RETURNING objection_id
            )
            SELECT inserted.objection_id, owned.semester
            FROM inserted, owned
            "#,
        )
        .bind(objection.enrollment_id)
        .bind(student_id)
        .bind(&objection.title)
        .bind(&objection.reason)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_error)?;

        Ok(row.map(|(objection_id, semester)| ObjectionReceipt {
            objection_id,
            semester,
        }))
    }

    async fn insert_outbox(&mut self, record: &NewOutboxRecord) -> Result<i64, StorageError> {
        let conn = self.connection()?;
        let (event_id,): (i64,) = sqlx_core::query_as::query_as(
            r#"
            INSERT INTO system_events (event_type, payload, created_at, retry_count, processing_status)
            VALUES ($1, $2, $3, 0, $4)
            RETURNING event_id
            "#,
        )
        .bind(&record.event_type)
        .bind(&record.payload)
        .bind(time_to_chrono(record.created_at))
        .bind(ProcessingStatus::Pending.as_str())
        .fetch_one(&mut *conn)
        .await
        .map_err(query_error)?;

        Ok(event_id)
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if self.tx.get_mut().is_some() {
            tracing::warn!("Transaction dropped without commit or rollback - will be rolled back");
        }
    }
}
