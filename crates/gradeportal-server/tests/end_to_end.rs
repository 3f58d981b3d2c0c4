//! Grade portal flows on the in-memory backend and the local cache store.

use gradeportal_cache::{CacheStore, LocalStore};
use gradeportal_db_memory::InMemoryStorage;
use gradeportal_server::{App, AppConfig, HealthStatus, ServiceError};
use gradeportal_storage::{GradeDetail, GradeSummary, NewObjection, ProcessingStatus};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;

const STUDENT: i64 = 20241234;
const SEMESTER: &str = "2024-1";

struct Fixture {
    app: App,
    storage: Arc<InMemoryStorage>,
    store: Arc<LocalStore>,
}

fn fixture(strict_check: bool) -> Fixture {
    let storage = Arc::new(InMemoryStorage::new());
    let store = Arc::new(LocalStore::new());
    let mut config = AppConfig::default();
    config.policy.strict_check_enabled = strict_check;
    let app = App::assemble(config, storage.clone(), storage.clone(), store.clone());
    Fixture {
        app,
        storage,
        store,
    }
}

fn summary(gpa: f64) -> GradeSummary {
    GradeSummary {
        student_id: STUDENT,
        semester: SEMESTER.into(),
        gpa,
        total_credits: 3,
        updated_at: OffsetDateTime::UNIX_EPOCH,
    }
}

fn seed_grades(storage: &InMemoryStorage) {
    storage.upsert_summary(summary(3.5));
    storage.add_enrollment(
        STUDENT,
        SEMESTER,
        GradeDetail {
            enrollment_id: 10,
            course_code: "CS101".into(),
            course_name: "Intro to Programming".into(),
            credit: 3,
            grade_letter: Some("B+".into()),
            score: Some(88.0),
            is_finalized: true,
        },
    );
}

async fn cached(store: &LocalStore, key: &str) -> bool {
    store.get(key).await.unwrap().is_some()
}

#[tokio::test]
async fn test_release_policy_update_reaches_the_cache() {
    let f = fixture(false);
    f.storage.set_release_policy(SEMESTER, false);

    assert!(!f.app.release_policy.is_released_cached(SEMESTER).await.unwrap());
    assert!(cached(&f.store, "release:2024-1").await);

    f.app
        .release_policy
        .update_release_policy(SEMESTER, true)
        .await
        .unwrap();

    // Until the worker runs, the cached flag is stale.
    assert!(!f.app.release_policy.is_released_cached(SEMESTER).await.unwrap());
    assert!(f.app.release_policy.is_released_strict(SEMESTER).await.unwrap());

    let records = f.storage.outbox_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ProcessingStatus::Pending);
    let payload: serde_json::Value = serde_json::from_str(&records[0].payload).unwrap();
    assert_eq!(payload["cacheType"], "RELEASE_POLICY");
    assert_eq!(payload["semester"], SEMESTER);

    let report = f.app.worker.run_pass().await.unwrap();
    assert_eq!(report.completed, 1);
    assert!(!cached(&f.store, "release:2024-1").await);

    assert!(f.app.release_policy.is_released_cached(SEMESTER).await.unwrap());
    assert!(cached(&f.store, "release:2024-1").await);
}

#[tokio::test]
async fn test_unreleased_semester_is_rejected() {
    let f = fixture(false);
    seed_grades(&f.storage);

    let err = f.app.inquiry.grade_summary(STUDENT, SEMESTER).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotReleased { .. }));
    let err = f.app.inquiry.grade_list(STUDENT, SEMESTER).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotReleased { .. }));

    // Nothing about the student was cached.
    assert!(!cached(&f.store, "summary:20241234:2024-1").await);
    assert!(!cached(&f.store, "list:20241234:2024-1").await);
}

#[tokio::test]
async fn test_objection_invalidates_summary_and_list() {
    let f = fixture(false);
    f.storage.set_release_policy(SEMESTER, true);
    seed_grades(&f.storage);

    assert_eq!(f.app.inquiry.grade_summary(STUDENT, SEMESTER).await.unwrap().gpa, 3.5);
    assert_eq!(f.app.inquiry.grade_list(STUDENT, SEMESTER).await.unwrap().len(), 1);

    // Served from the cache while the source changes underneath.
    f.storage.upsert_summary(summary(3.9));
    assert_eq!(f.app.inquiry.grade_summary(STUDENT, SEMESTER).await.unwrap().gpa, 3.5);

    let receipt = f
        .app
        .objections
        .create_objection(
            STUDENT,
            &NewObjection {
                enrollment_id: 10,
                title: "Midterm".into(),
                reason: "Question 3 was graded incorrectly".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(receipt.semester, SEMESTER);
    assert_eq!(f.storage.objections_of(STUDENT).len(), 1);

    let report = f.app.worker.run_pass().await.unwrap();
    assert_eq!(report.completed, 1);
    assert!(!cached(&f.store, "summary:20241234:2024-1").await);
    assert!(!cached(&f.store, "list:20241234:2024-1").await);
    assert!(cached(&f.store, "release:2024-1").await);

    assert_eq!(f.app.inquiry.grade_summary(STUDENT, SEMESTER).await.unwrap().gpa, 3.9);
}

#[tokio::test]
async fn test_objection_on_foreign_enrollment_writes_nothing() {
    let f = fixture(false);
    seed_grades(&f.storage);

    let err = f
        .app
        .objections
        .create_objection(
            42,
            &NewObjection {
                enrollment_id: 10,
                title: "Final".into(),
                reason: "Not my enrollment".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::EnrollmentNotOwned { enrollment_id: 10 }));
    assert!(f.storage.objections_of(42).is_empty());
    assert!(f.storage.outbox_records().is_empty());
}

#[tokio::test]
async fn test_missing_summary_is_not_cached() {
    let f = fixture(false);
    f.storage.set_release_policy(SEMESTER, true);

    let err = f.app.inquiry.grade_summary(STUDENT, SEMESTER).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound { .. }));
    assert!(!cached(&f.store, "summary:20241234:2024-1").await);

    // An empty grade list is a valid answer.
    assert!(f.app.inquiry.grade_list(STUDENT, SEMESTER).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_strict_check_catches_withdrawn_release() {
    let f = fixture(true);
    f.storage.set_release_policy(SEMESTER, true);
    seed_grades(&f.storage);

    f.app.inquiry.grade_summary(STUDENT, SEMESTER).await.unwrap();
    f.app.inquiry.grade_list(STUDENT, SEMESTER).await.unwrap();

    // Withdrawn on the primary; the release cache still says released.
    f.storage.set_release_policy(SEMESTER, false);

    let err = f.app.inquiry.grade_summary(STUDENT, SEMESTER).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotReleased { .. }));
    assert!(!cached(&f.store, "summary:20241234:2024-1").await);

    let err = f.app.inquiry.grade_list(STUDENT, SEMESTER).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotReleased { .. }));
    assert!(!cached(&f.store, "list:20241234:2024-1").await);
}

#[tokio::test]
async fn test_without_strict_check_cached_release_wins() {
    let f = fixture(false);
    f.storage.set_release_policy(SEMESTER, true);
    seed_grades(&f.storage);

    f.app.inquiry.grade_summary(STUDENT, SEMESTER).await.unwrap();
    f.storage.set_release_policy(SEMESTER, false);
    assert!(f.app.inquiry.grade_summary(STUDENT, SEMESTER).await.is_ok());
}

#[tokio::test]
async fn test_update_of_unknown_semester_is_rolled_back() {
    let f = fixture(false);

    let err = f
        .app
        .release_policy
        .update_release_policy("2099-2", true)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::UnknownSemester { .. }));
    assert!(f.storage.outbox_records().is_empty());
}

#[tokio::test]
async fn test_health_and_worker_lifecycle() {
    let f = fixture(false);
    let health = f.app.health().await;
    assert_eq!(health.status, HealthStatus::Up);
    assert_eq!(health.store_mode, "local");
    assert_eq!(health.storage_backend, "in-memory-dashmap");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = f.app.spawn_worker(shutdown_rx).expect("worker enabled by default");
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let storage = Arc::new(InMemoryStorage::new());
    let mut config = AppConfig::default();
    config.worker.enabled = false;
    let app = App::assemble(config, storage.clone(), storage, Arc::new(LocalStore::new()));
    let (_tx, rx) = watch::channel(false);
    assert!(app.spawn_worker(rx).is_none());
}
