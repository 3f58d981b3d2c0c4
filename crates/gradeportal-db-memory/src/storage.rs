use dashmap::DashMap;
use gradeportal_storage::{
    GradeDetail, GradeSummary, NewObjection, NewOutboxRecord, OutboxRecord, ProcessingStatus,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// An enrollment row: which student took which course in which semester.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub student_id: i64,
    pub semester: String,
    pub detail: GradeDetail,
}

/// A committed objection.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObjection {
    pub objection_id: i64,
    pub student_id: i64,
    pub objection: NewObjection,
}

#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub(crate) release_policies: DashMap<String, bool>,
    pub(crate) summaries: DashMap<(i64, String), GradeSummary>,
    pub(crate) enrollments: DashMap<i64, Enrollment>,
    pub(crate) objections: DashMap<i64, StoredObjection>,
    pub(crate) outbox: DashMap<i64, OutboxRecord>,
    /// Shared id sequence for objections and outbox records.
    sequence: AtomicI64,
    /// Serializes transaction commits.
    pub(crate) commit_lock: Mutex<()>,
}

impl Tables {
    pub(crate) fn next_id(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn insert_outbox(&self, id: i64, record: &NewOutboxRecord) {
        self.outbox.insert(
            id,
            OutboxRecord {
                id,
                event_type: record.event_type.clone(),
                payload: record.payload.clone(),
                created_at: record.created_at,
                processed_at: None,
                retry_count: 0,
                status: ProcessingStatus::Pending,
            },
        );
    }
}

/// In-memory grade and outbox storage backed by DashMap.
///
/// Clones share the same tables. Reads and writes go to the same maps, so
/// there is no replica lag.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    pub(crate) tables: Arc<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces the release policy row of a semester.
    pub fn set_release_policy(&self, semester: impl Into<String>, is_released: bool) {
        self.tables
            .release_policies
            .insert(semester.into(), is_released);
    }

    /// Creates or replaces a student's grade summary.
    pub fn upsert_summary(&self, summary: GradeSummary) {
        self.tables
            .summaries
            .insert((summary.student_id, summary.semester.clone()), summary);
    }

    /// Registers an enrollment, keyed by `detail.enrollment_id`.
    pub fn add_enrollment(&self, student_id: i64, semester: impl Into<String>, detail: GradeDetail) {
        self.tables.enrollments.insert(
            detail.enrollment_id,
            Enrollment {
                student_id,
                semester: semester.into(),
                detail,
            },
        );
    }

    /// Committed objections of a student, by id.
    pub fn objections_of(&self, student_id: i64) -> Vec<StoredObjection> {
        let mut objections: Vec<_> = self
            .tables
            .objections
            .iter()
            .filter(|entry| entry.student_id == student_id)
            .map(|entry| entry.value().clone())
            .collect();
        objections.sort_by_key(|o| o.objection_id);
        objections
    }

    /// Every outbox record, by id.
    pub fn outbox_records(&self) -> Vec<OutboxRecord> {
        let mut records: Vec<_> = self
            .tables
            .outbox
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }
}
