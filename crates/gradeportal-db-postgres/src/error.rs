//! Backend-local errors and their mapping onto `StorageError`.

use gradeportal_storage::StorageError;
use sqlx_core::error::Error as SqlxError;

/// SQLSTATE raised when a grade or outbox table is missing.
const UNDEFINED_TABLE: &str = "42P01";

/// Failures while setting up or talking to PostgreSQL.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    #[error("Database error: {0}")]
    Connection(#[from] SqlxError),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PostgresError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// True when the server rejected the query because a table does not exist,
/// which means migrations have not been applied.
pub fn is_undefined_table(err: &SqlxError) -> bool {
    matches!(err, SqlxError::Database(db) if db.code().as_deref() == Some(UNDEFINED_TABLE))
}

impl From<PostgresError> for StorageError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Connection(e) if is_undefined_table(&e) => {
                StorageError::internal(format!("Schema not migrated: {e}"))
            }
            PostgresError::Connection(e) => StorageError::connection_error(e.to_string()),
            PostgresError::Migration(e) => StorageError::internal(format!("Migration error: {e}")),
            PostgresError::Config { message } => {
                StorageError::internal(format!("Configuration error: {message}"))
            }
        }
    }
}

/// Maps a failed grade or outbox query straight to a `StorageError`.
pub(crate) fn query_error(err: SqlxError) -> StorageError {
    PostgresError::from(err).into()
}

pub type Result<T> = std::result::Result<T, PostgresError>;
