//! Wire format of cache invalidation intents stored in the outbox.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current payload schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Which cache entries an intent invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationTarget {
    #[serde(rename = "SUMMARY", alias = "GRADE_SUMMARY")]
    Summary,
    #[serde(rename = "LIST", alias = "GRADE_LIST")]
    List,
    #[serde(rename = "RELEASE_POLICY", alias = "GRADE_RELEASE_POLICY")]
    ReleasePolicy,
    /// Summary and list of one student for one semester.
    #[serde(rename = "ALL")]
    All,
    /// Any tag this build does not know. Completed without effect.
    #[serde(rename = "UNKNOWN", other)]
    Unknown,
}

impl InvalidationTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationTarget::Summary => "SUMMARY",
            InvalidationTarget::List => "LIST",
            InvalidationTarget::ReleasePolicy => "RELEASE_POLICY",
            InvalidationTarget::All => "ALL",
            InvalidationTarget::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for InvalidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationPayload {
    pub cache_type: InvalidationTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<i64>,
    pub semester: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

impl InvalidationPayload {
    fn new(cache_type: InvalidationTarget, student_id: Option<i64>, semester: &str) -> Self {
        Self {
            cache_type,
            student_id,
            semester: semester.to_string(),
            reason: None,
            schema_version: SCHEMA_VERSION,
        }
    }

    pub fn summary(student_id: i64, semester: &str) -> Self {
        Self::new(InvalidationTarget::Summary, Some(student_id), semester)
    }

    pub fn list(student_id: i64, semester: &str) -> Self {
        Self::new(InvalidationTarget::List, Some(student_id), semester)
    }

    pub fn release_policy(semester: &str) -> Self {
        Self::new(InvalidationTarget::ReleasePolicy, None, semester)
    }

    pub fn all(student_id: i64, semester: &str) -> Self {
        Self::new(InvalidationTarget::All, Some(student_id), semester)
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_release_policy_wire_format() {
        let payload = InvalidationPayload::release_policy("2024-1").with_reason("POLICY_UPDATE");
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "cacheType": "RELEASE_POLICY",
                "semester": "2024-1",
                "reason": "POLICY_UPDATE",
                "schemaVersion": 1
            })
        );
    }

    #[test]
    fn test_student_payload_includes_student_id() {
        let value = serde_json::to_value(InvalidationPayload::all(20241234, "2024-2")).unwrap();
        assert_eq!(value["cacheType"], "ALL");
        assert_eq!(value["studentId"], 20241234);
    }

    #[test]
    fn test_legacy_tags_are_accepted() {
        let payload: InvalidationPayload = serde_json::from_str(
            r#"{"cacheType":"GRADE_SUMMARY","studentId":1,"semester":"2024-1","schemaVersion":1}"#,
        )
        .unwrap();
        assert_eq!(payload.cache_type, InvalidationTarget::Summary);

        let payload: InvalidationPayload =
            serde_json::from_str(r#"{"cacheType":"GRADE_RELEASE_POLICY","semester":"2024-1"}"#)
                .unwrap();
        assert_eq!(payload.cache_type, InvalidationTarget::ReleasePolicy);
        assert_eq!(payload.schema_version, SCHEMA_VERSION);
        assert_eq!(payload.student_id, None);
    }

    #[test]
    fn test_unrecognized_tag_decodes_to_unknown() {
        let payload: InvalidationPayload =
            serde_json::from_str(r#"{"cacheType":"TRANSCRIPT","semester":"2024-1"}"#).unwrap();
        assert_eq!(payload.cache_type, InvalidationTarget::Unknown);
    }

    #[test]
    fn test_missing_semester_is_rejected() {
        assert!(serde_json::from_str::<InvalidationPayload>(r#"{"cacheType":"ALL"}"#).is_err());
    }
}
