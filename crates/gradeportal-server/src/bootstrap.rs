//! Wires storage, cache store, caches, services and the invalidation worker.

use anyhow::Context;
use gradeportal_cache::{CacheStore, GradeCaches, create_cache_store};
use gradeportal_db_memory::InMemoryStorage;
use gradeportal_db_postgres::PostgresStorage;
use gradeportal_outbox::InvalidationWorker;
use gradeportal_storage::{DynGradeStorage, DynOutboxStorage, OutboxStorage};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{AppConfig, StorageBackend, StorageConfig};
use crate::health::{self, HealthReport};
use crate::services::{GradeInquiryService, ObjectionService, ReleasePolicyService};

pub type OutboxWorker = InvalidationWorker<dyn OutboxStorage, GradeCaches>;

pub struct App {
    pub config: AppConfig,
    pub storage: DynGradeStorage,
    pub outbox: DynOutboxStorage,
    pub store: Arc<dyn CacheStore>,
    pub caches: GradeCaches,
    pub release_policy: Arc<ReleasePolicyService>,
    pub inquiry: GradeInquiryService,
    pub objections: ObjectionService,
    pub worker: Arc<OutboxWorker>,
}

impl App {
    /// Connects the configured storage backend and cache store.
    ///
    /// An unreachable Redis is not an error: the local store takes over.
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let (storage, outbox) = open_storage(&config.storage).await?;
        let store = create_cache_store(&config.redis).await;
        Ok(Self::assemble(config, storage, outbox, store))
    }

    /// Builds the application over already opened backends.
    pub fn assemble(
        config: AppConfig,
        storage: DynGradeStorage,
        outbox: DynOutboxStorage,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        let caches = GradeCaches::new(store.clone(), &config.cache);
        let release_policy = Arc::new(ReleasePolicyService::new(
            storage.clone(),
            caches.release_policy.clone(),
        ));
        let inquiry = GradeInquiryService::new(
            storage.clone(),
            caches.clone(),
            release_policy.clone(),
            config.policy.strict_check_enabled,
        );
        let objections = ObjectionService::new(storage.clone());
        let worker = Arc::new(InvalidationWorker::new(
            outbox.clone(),
            Arc::new(caches.clone()),
            config.worker.clone(),
        ));

        info!(
            storage = storage.backend_name(),
            cache_store = store.mode(),
            strict_check = config.policy.strict_check_enabled,
            "Grade portal assembled"
        );

        Self {
            config,
            storage,
            outbox,
            store,
            caches,
            release_policy,
            inquiry,
            objections,
            worker,
        }
    }

    /// Starts the invalidation worker loop, unless disabled in config.
    pub fn spawn_worker(&self, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if !self.config.worker.enabled {
            info!("Invalidation worker disabled");
            return None;
        }
        let worker = self.worker.clone();
        Some(tokio::spawn(async move { worker.run(shutdown).await }))
    }

    pub async fn health(&self) -> HealthReport {
        health::check(
            self.store.as_ref(),
            &self.caches,
            self.outbox.as_ref(),
            self.storage.backend_name(),
        )
        .await
    }
}

async fn open_storage(config: &StorageConfig) -> anyhow::Result<(DynGradeStorage, DynOutboxStorage)> {
    match config.backend {
        StorageBackend::Memory => {
            let storage = Arc::new(InMemoryStorage::new());
            Ok((storage.clone() as DynGradeStorage, storage as DynOutboxStorage))
        }
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .context("storage.backend=postgres requires [storage.postgres]")?;
            let storage = PostgresStorage::new(pg.to_backend_config())
                .await
                .context("Failed to open PostgreSQL storage")?;
            let outbox = storage.outbox();
            Ok((Arc::new(storage) as DynGradeStorage, Arc::new(outbox) as DynOutboxStorage))
        }
    }
}
