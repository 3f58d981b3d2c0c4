//! The three grade portal caches and their key types.

use gradeportal_storage::{GradeDetail, GradeSummary};
use std::sync::Arc;

use crate::breaker::CircuitBreaker;
use crate::config::CacheSettings;
use crate::read_through::{CacheKey, ReadThroughCache};
use crate::store::CacheStore;

/// Key of per-student, per-semester entries: `{student_id}:{semester}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StudentSemester {
    pub student_id: i64,
    pub semester: String,
}

impl StudentSemester {
    pub fn new(student_id: i64, semester: impl Into<String>) -> Self {
        Self {
            student_id,
            semester: semester.into(),
        }
    }
}

impl CacheKey for StudentSemester {
    fn cache_key(&self) -> String {
        format!("{}:{}", self.student_id, self.semester)
    }
}

/// Key of per-semester entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SemesterKey(pub String);

impl SemesterKey {
    pub fn new(semester: impl Into<String>) -> Self {
        Self(semester.into())
    }
}

impl CacheKey for SemesterKey {
    fn cache_key(&self) -> String {
        self.0.clone()
    }
}

pub type SummaryCache = ReadThroughCache<StudentSemester, GradeSummary>;
pub type GradeListCache = ReadThroughCache<StudentSemester, Vec<GradeDetail>>;
pub type ReleasePolicyCache = ReadThroughCache<SemesterKey, bool>;

/// The summary, grade list and release-policy caches over one shared store.
///
/// Each cache owns its breaker so a failing key space does not bypass the others.
#[derive(Clone)]
pub struct GradeCaches {
    pub summary: Arc<SummaryCache>,
    pub list: Arc<GradeListCache>,
    pub release_policy: Arc<ReleasePolicyCache>,
}

impl GradeCaches {
    pub const SUMMARY: &'static str = "summary";
    pub const LIST: &'static str = "list";
    pub const RELEASE_POLICY: &'static str = "release";

    pub fn new(store: Arc<dyn CacheStore>, settings: &CacheSettings) -> Self {
        let breaker = |name: &str| {
            Arc::new(CircuitBreaker::new(
                name,
                settings.breaker_failure_threshold,
                settings.breaker_cooldown(),
            ))
        };

        Self {
            summary: Arc::new(ReadThroughCache::new(
                Self::SUMMARY,
                &settings.key_namespace,
                store.clone(),
                breaker(Self::SUMMARY),
                settings.load_policy(settings.summary),
            )),
            list: Arc::new(ReadThroughCache::new(
                Self::LIST,
                &settings.key_namespace,
                store.clone(),
                breaker(Self::LIST),
                settings.load_policy(settings.list),
            )),
            release_policy: Arc::new(ReadThroughCache::new(
                Self::RELEASE_POLICY,
                &settings.key_namespace,
                store,
                breaker(Self::RELEASE_POLICY),
                settings.load_policy(settings.release_policy),
            )),
        }
    }

    /// Breakers in summary, list, release-policy order.
    pub fn breakers(&self) -> [&Arc<CircuitBreaker>; 3] {
        [
            self.summary.breaker(),
            self.list.breaker(),
            self.release_policy.breaker(),
        ]
    }
}
