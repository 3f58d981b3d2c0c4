//! PostgreSQL implementation of the `OutboxStorage` trait over `system_events`.
//!
//! Every state transition is a single conditional UPDATE, so concurrent
//! workers race on the row and exactly one of them sees a changed row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx_postgres::PgPool;
use time::OffsetDateTime;

use gradeportal_storage::{
    NewOutboxRecord, OutboxRecord, OutboxStats, OutboxStorage, ProcessingStatus, StorageError,
};

use crate::convert::{chrono_to_time, time_to_chrono};
use crate::error::query_error;

type EventRow = (
    i64,
    String,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    i32,
    String,
);

const EVENT_COLUMNS: &str = "event_id, event_type, payload, created_at, processed_at, retry_count, processing_status";

fn into_record(row: EventRow) -> Result<OutboxRecord, StorageError> {
    let (id, event_type, payload, created_at, processed_at, retry_count, status) = row;
    Ok(OutboxRecord {
        id,
        event_type,
        payload,
        created_at: chrono_to_time(created_at),
        processed_at: processed_at.map(chrono_to_time),
        retry_count: u32::try_from(retry_count).map_err(|_| {
            StorageError::invalid_record(format!("event {id} has negative retry_count"))
        })?,
        status: status.parse::<ProcessingStatus>()?,
    })
}

fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Outbox storage on the primary pool.
#[derive(Debug, Clone)]
pub struct PostgresOutboxStorage {
    pool: PgPool,
}

impl PostgresOutboxStorage {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn transition(&self, sql: &str, id: i64) -> Result<bool, StorageError> {
        let result = sqlx_core::query::query(sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn transition_at(
        &self,
        sql: &str,
        id: i64,
        at: OffsetDateTime,
    ) -> Result<bool, StorageError> {
        let result = sqlx_core::query::query(sql)
            .bind(id)
            .bind(time_to_chrono(at))
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl OutboxStorage for PostgresOutboxStorage {
    async fn insert(&self, record: &NewOutboxRecord) -> Result<i64, StorageError> {
        let (event_id,): (i64,) = sqlx_core::query_as::query_as(
            r#"
            INSERT INTO system_events (event_type, payload, created_at, retry_count, processing_status)
            VALUES ($1, $2, $3, 0, 'PENDING')
            RETURNING event_id
            "#,
        )
        .bind(&record.event_type)
        .bind(&record.payload)
        .bind(time_to_chrono(record.created_at))
        .fetch_one(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(event_id)
    }

    async fn get(&self, id: i64) -> Result<Option<OutboxRecord>, StorageError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM system_events WHERE event_id = $1");
        let row: Option<EventRow> = sqlx_core::query_as::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        row.map(into_record).transpose()
    }

    async fn fetch_pending(
        &self,
        event_type: &str,
        max_retries: u32,
        limit: u32,
    ) -> Result<Vec<OutboxRecord>, StorageError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM system_events \
             WHERE processing_status = 'PENDING' AND event_type = $1 AND retry_count < $2 \
             ORDER BY created_at, event_id \
             LIMIT $3"
        );
        let rows: Vec<EventRow> = sqlx_core::query_as::query_as(&sql)
            .bind(event_type)
            .bind(clamp_i32(max_retries))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        rows.into_iter().map(into_record).collect()
    }

    async fn claim(&self, id: i64) -> Result<bool, StorageError> {
        self.transition(
            "UPDATE system_events SET processing_status = 'PROCESSING' \
             WHERE event_id = $1 AND processing_status = 'PENDING'",
            id,
        )
        .await
    }

    async fn mark_completed(
        &self,
        id: i64,
        processed_at: OffsetDateTime,
    ) -> Result<bool, StorageError> {
        self.transition_at(
            "UPDATE system_events SET processing_status = 'COMPLETED', processed_at = $2 \
             WHERE event_id = $1 AND processing_status = 'PROCESSING'",
            id,
            processed_at,
        )
        .await
    }

    async fn mark_failed(
        &self,
        id: i64,
        processed_at: OffsetDateTime,
    ) -> Result<bool, StorageError> {
        self.transition_at(
            "UPDATE system_events \
             SET processing_status = 'FAILED', processed_at = $2, retry_count = retry_count + 1 \
             WHERE event_id = $1 AND processing_status = 'PROCESSING'",
            id,
            processed_at,
        )
        .await
    }

    async fn find_stuck(
        &self,
        threshold: OffsetDateTime,
    ) -> Result<Vec<OutboxRecord>, StorageError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM system_events \
             WHERE processing_status = 'PROCESSING' AND created_at < $1 \
             ORDER BY created_at, event_id"
        );
        let rows: Vec<EventRow> = sqlx_core::query_as::query_as(&sql)
            .bind(time_to_chrono(threshold))
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        rows.into_iter().map(into_record).collect()
    }

    async fn reset_stuck(&self, id: i64) -> Result<bool, StorageError> {
        self.transition(
            "UPDATE system_events \
             SET processing_status = 'PENDING', processed_at = NULL, retry_count = retry_count + 1 \
             WHERE event_id = $1 AND processing_status = 'PROCESSING'",
            id,
        )
        .await
    }

    async fn requeue_failed(
        &self,
        event_type: &str,
        max_retries: u32,
    ) -> Result<u64, StorageError> {
        let result = sqlx_core::query::query(
            "UPDATE system_events SET processing_status = 'PENDING', processed_at = NULL \
             WHERE processing_status = 'FAILED' AND event_type = $1 AND retry_count < $2",
        )
        .bind(event_type)
        .bind(clamp_i32(max_retries))
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<OutboxStats, StorageError> {
        let (pending, processing, completed, failed): (i64, i64, i64, i64) =
            sqlx_core::query_as::query_as(
                r#"
                SELECT COUNT(*) FILTER (WHERE processing_status = 'PENDING'),
                       COUNT(*) FILTER (WHERE processing_status = 'PROCESSING'),
                       COUNT(*) FILTER (WHERE processing_status = 'COMPLETED'),
                       COUNT(*) FILTER (WHERE processing_status = 'FAILED')
                FROM system_events
                "#,
            )
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;

        let count = |n: i64| u64::try_from(n).unwrap_or_default();
        Ok(OutboxStats {
            pending: count(pending),
            processing: count(processing),
            completed: count(completed),
            failed: count(failed),
        })
    }
}
