//! Domain and outbox record types shared by all storage backends.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

use crate::error::StorageError;

/// Event type tag for cache invalidation records in the outbox table.
pub const CACHE_INVALIDATE_EVENT: &str = "CACHE_INVALIDATE";

/// Student id for log output: only the last four digits survive.
pub fn mask_student_id(student_id: i64) -> String {
    let id = student_id.to_string();
    if id.len() <= 4 {
        return "****".to_string();
    }
    format!("****{}", &id[id.len() - 4..])
}

/// Per-semester grade summary for one student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSummary {
    pub student_id: i64,
    pub semester: String,
    pub gpa: f64,
    pub total_credits: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// One course line of a student's grade list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeDetail {
    pub enrollment_id: i64,
    pub course_code: String,
    pub course_name: String,
    pub credit: i32,
    /// `None` until a finalized grade exists.
    pub grade_letter: Option<String>,
    pub score: Option<f64>,
    pub is_finalized: bool,
}

/// Objection filed by a student against one enrollment's grade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewObjection {
    pub enrollment_id: i64,
    pub title: String,
    pub reason: String,
}

/// Result of a stored objection, carrying the semester needed for invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectionReceipt {
    pub objection_id: i64,
    pub semester: String,
}

/// Processing status of an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::Processing => "PROCESSING",
            ProcessingStatus::Completed => "COMPLETED",
            ProcessingStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ProcessingStatus::Pending),
            "PROCESSING" => Ok(ProcessingStatus::Processing),
            "COMPLETED" => Ok(ProcessingStatus::Completed),
            "FAILED" => Ok(ProcessingStatus::Failed),
            other => Err(StorageError::invalid_record(format!(
                "unknown processing status '{other}'"
            ))),
        }
    }
}

/// A row of the outbox table.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    pub id: i64,
    pub event_type: String,
    /// Opaque serialized payload, decoded by the consumer.
    pub payload: String,
    pub created_at: OffsetDateTime,
    pub processed_at: Option<OffsetDateTime>,
    pub retry_count: u32,
    pub status: ProcessingStatus,
}

/// An outbox record about to be inserted. Always starts out `PENDING` with zero retries.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxRecord {
    pub event_type: String,
    pub payload: String,
    pub created_at: OffsetDateTime,
}

impl NewOutboxRecord {
    pub fn new(event_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: payload.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Overrides the creation timestamp.
    #[must_use]
    pub fn with_created_at(mut self, created_at: OffsetDateTime) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Outbox record counts by status, for operator visibility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_status_round_trip() {
        for status in [
            ProcessingStatus::Pending,
            ProcessingStatus::Processing,
            ProcessingStatus::Completed,
            ProcessingStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ProcessingStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<ProcessingStatus>().is_err());
    }

    #[test]
    fn test_mask_student_id() {
        assert_eq!(mask_student_id(20241234), "****1234");
        assert_eq!(mask_student_id(1234), "****");
        assert_eq!(mask_student_id(7), "****");
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let summary = GradeSummary {
            student_id: 20241234,
            semester: "2024-1".into(),
            gpa: 3.5,
            total_credits: 15,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["studentId"], 20241234);
        assert_eq!(json["totalCredits"], 15);
        assert_eq!(json["updatedAt"], "1970-01-01T00:00:00Z");
    }
}
