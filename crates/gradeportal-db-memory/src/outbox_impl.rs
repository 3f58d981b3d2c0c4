//! `OutboxStorage` for the in-memory backend.
//!
//! State transitions hold the DashMap shard lock of the record while checking
//! and updating its status, so they behave like conditional UPDATEs.

use async_trait::async_trait;
use gradeportal_storage::{
    NewOutboxRecord, OutboxRecord, OutboxStats, OutboxStorage, ProcessingStatus, StorageError,
};
use time::OffsetDateTime;

use crate::storage::InMemoryStorage;

impl InMemoryStorage {
    fn transition(&self, id: i64, from: ProcessingStatus, apply: impl FnOnce(&mut OutboxRecord)) -> bool {
        match self.tables.outbox.get_mut(&id) {
            Some(mut record) if record.status == from => {
                apply(&mut record);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl OutboxStorage for InMemoryStorage {
    async fn insert(&self, record: &NewOutboxRecord) -> Result<i64, StorageError> {
        let id = self.tables.next_id();
        self.tables.insert_outbox(id, record);
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<OutboxRecord>, StorageError> {
        Ok(self.tables.outbox.get(&id).map(|entry| entry.value().clone()))
    }

    async fn fetch_pending(
        &self,
        event_type: &str,
        max_retries: u32,
        limit: u32,
    ) -> Result<Vec<OutboxRecord>, StorageError> {
        let mut pending: Vec<OutboxRecord> = self
            .tables
            .outbox
            .iter()
            .filter(|entry| {
                entry.status == ProcessingStatus::Pending
                    && entry.event_type == event_type
                    && entry.retry_count < max_retries
            })
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by_key(|record| (record.created_at, record.id));
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn claim(&self, id: i64) -> Result<bool, StorageError> {
        Ok(self.transition(id, ProcessingStatus::Pending, |record| {
            record.status = ProcessingStatus::Processing;
        }))
    }

    async fn mark_completed(
        &self,
        id: i64,
        processed_at: OffsetDateTime,
    ) -> Result<bool, StorageError> {
        Ok(self.transition(id, ProcessingStatus::Processing, |record| {
            record.status = ProcessingStatus::Completed;
            record.processed_at = Some(processed_at);
        }))
    }

    async fn mark_failed(
        &self,
        id: i64,
        processed_at: OffsetDateTime,
    ) -> Result<bool, StorageError> {
        Ok(self.transition(id, ProcessingStatus::Processing, |record| {
            record.status = ProcessingStatus::Failed;
            record.processed_at = Some(processed_at);
            record.retry_count += 1;
        }))
    }

    async fn find_stuck(
        &self,
        threshold: OffsetDateTime,
    ) -> Result<Vec<OutboxRecord>, StorageError> {
        let mut stuck: Vec<OutboxRecord> = self
            .tables
            .outbox
            .iter()
            .filter(|entry| {
                entry.status == ProcessingStatus::Processing && entry.created_at < threshold
            })
            .map(|entry| entry.value().clone())
            .collect();
        stuck.sort_by_key(|record| (record.created_at, record.id));
        Ok(stuck)
    }

    async fn reset_stuck(&self, id: i64) -> Result<bool, StorageError> {
        Ok(self.transition(id, ProcessingStatus::Processing, |record| {
            record.status = ProcessingStatus::Pending;
            record.processed_at = None;
            record.retry_count += 1;
        }))
    }

    async fn requeue_failed(
        &self,
        event_type: &str,
        max_retries: u32,
    ) -> Result<u64, StorageError> {
        let mut requeued = 0;
        for mut entry in self.tables.outbox.iter_mut() {
            if entry.status == ProcessingStatus::Failed
                && entry.event_type == event_type
                && entry.retry_count < max_retries
            {
                entry.status = ProcessingStatus::Pending;
                entry.processed_at = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn stats(&self) -> Result<OutboxStats, StorageError> {
        let mut stats = OutboxStats::default();
        for entry in self.tables.outbox.iter() {
            match entry.status {
                ProcessingStatus::Pending => stats.pending += 1,
                ProcessingStatus::Processing => stats.processing += 1,
                ProcessingStatus::Completed => stats.completed += 1,
                ProcessingStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
