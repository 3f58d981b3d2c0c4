use metrics::counter;

pub mod names {
    pub const OUTBOX_RECORDS_TOTAL: &str = "outbox_records_total";
}

/// Count outbox records by outcome: `completed`, `failed`, `skipped`,
/// `requeued`, `recovered` or `abandoned`.
pub fn record_outcome(outcome: &'static str, count: u64) {
    if count > 0 {
        counter!(names::OUTBOX_RECORDS_TOTAL, "outcome" => outcome).increment(count);
    }
}
