//! PostgreSQL implementation of the `GradeStorage` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx_postgres::PgPool;
use tracing::info;

use gradeportal_storage::{GradeDetail, GradeStorage, GradeSummary, StorageError, Transaction};

use crate::config::PostgresConfig;
use crate::convert::chrono_to_time;
use crate::error::query_error;
use crate::migrations;
use crate::outbox::PostgresOutboxStorage;
use crate::pool;
use crate::transaction::PostgresTransaction;

type SummaryRow = (i64, String, f64, i32, DateTime<Utc>);
type DetailRow = (i64, String, String, i32, Option<String>, Option<f64>, bool);

/// PostgreSQL grade storage with an optional read replica.
///
/// Summary and grade list reads are served by the replica. The release flag
/// gates access to grades, so it is always read from the primary, and all
/// writes go through transactions on the primary.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    primary: PgPool,
    replica: PgPool,
}

impl PostgresStorage {
    /// Connects to the primary (and replica, if configured), checks each pool
    /// with a round trip, and runs migrations on the primary when
    /// `run_migrations` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if a pool cannot be created or queried, or a
    /// migration fails.
    pub async fn new(config: PostgresConfig) -> Result<Self, StorageError> {
        let primary = pool::create_pool(&config.url, &config).await?;
        pool::test_connection(&primary).await?;

        if config.run_migrations {
            migrations::run(&primary).await?;
        }

        let replica = match &config.replica_url {
            Some(url) => {
                let replica = pool::create_pool(url, &config).await?;
                pool::test_connection(&replica).await?;
                replica
            }
            None => primary.clone(),
        };

        info!(
            replica = config.replica_url.is_some(),
            "PostgreSQL grade storage ready"
        );

        Ok(Self { primary, replica })
    }

    /// Uses one pool for both reads and writes. Migrations are not run.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            primary: pool.clone(),
            replica: pool,
        }
    }

    #[must_use]
    pub fn from_pools(primary: PgPool, replica: PgPool) -> Self {
        Self { primary, replica }
    }

    /// The primary pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.primary
    }

    /// Outbox storage sharing the primary pool.
    #[must_use]
    pub fn outbox(&self) -> PostgresOutboxStorage {
        PostgresOutboxStorage::new(self.primary.clone())
    }
}

#[async_trait]
impl GradeStorage for PostgresStorage {
    async fn find_summary(
        &self,
        student_id: i64,
        semester: &str,
    ) -> Result<Option<GradeSummary>, StorageError> {
        let row: Option<SummaryRow> = sqlx_core::query_as::query_as(
            r#"
            SELECT student_id, semester, gpa, total_credits, updated_at
            FROM grade_summary
            WHERE student_id = $1 AND semester = $2
            "#,
        )
        .bind(student_id)
        .bind(semester)
        .fetch_optional(&self.replica)
        .await
        .map_err(query_error)?;

        Ok(row.map(
            |(student_id, semester, gpa, total_credits, updated_at)| GradeSummary {
                student_id,
                semester,
                gpa,
                total_credits,
                updated_at: chrono_to_time(updated_at),
            },
        ))
    }

    async fn find_grade_details(
        &self,
        student_id: i64,
        semester: &str,
    ) -> Result<Vec<GradeDetail>, StorageError> {
        // Letter and score stay hidden until the grade is finalized.
        let rows: Vec<DetailRow> = sqlx_core::query_as::query_as(
            r#"
            SELECT e.enrollment_id,
                   c.course_code,
                   c.course_name,
                   c.credit,
                   CASE WHEN g.is_finalized THEN g.grade_letter END,
                   CASE WHEN g.is_finalized THEN g.score END,
                   COALESCE(g.is_finalized, FALSE)
            FROM enrollments e
            JOIN courses c ON c.course_id = e.course_id
            LEFT JOIN grades g ON g.enrollment_id = e.enrollment_id
            WHERE e.student_id = $1 AND e.semester = $2
            ORDER BY c.course_code
            "#,
        )
        .bind(student_id)
        .bind(semester)
        .fetch_all(&self.replica)
        .await
        .map_err(query_error)?;

        Ok(rows
            .into_iter()
            .map(
                |(enrollment_id, course_code, course_name, credit, grade_letter, score, is_finalized)| {
                    GradeDetail {
                        enrollment_id,
                        course_code,
                        course_name,
                        credit,
                        grade_letter,
                        score,
                        is_finalized,
                    }
                },
            )
            .collect())
    }

    async fn find_release_status(&self, semester: &str) -> Result<Option<bool>, StorageError> {
        let row: Option<(bool,)> = sqlx_core::query_as::query_as(
            "SELECT is_released FROM grade_release_policy WHERE semester = $1",
        )
        .bind(semester)
        .fetch_optional(&self.primary)
        .await
        .map_err(query_error)?;

        Ok(row.map(|(is_released,)| is_released))
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError> {
        let tx = self.primary.begin().await.map_err(|e| {
            StorageError::transaction_error(format!("Failed to begin transaction: {e}"))
        })?;
        Ok(Box::new(PostgresTransaction::new(tx)))
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
