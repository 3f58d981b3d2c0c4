//! Cache invalidation through a transactional outbox.
//!
//! A write appends an [`InvalidationPayload`] to the outbox in the same
//! transaction as the business change ([`InvalidationPublisher`]). The
//! [`InvalidationWorker`] later claims each record, evicts the affected cache
//! keys through a [`CacheInvalidator`], and marks the record completed or failed.

pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod payload;
pub mod publisher;
pub mod worker;

pub use dispatch::CacheInvalidator;
pub use error::OutboxError;
pub use payload::{InvalidationPayload, InvalidationTarget, SCHEMA_VERSION};
pub use publisher::InvalidationPublisher;
pub use worker::{InvalidationWorker, PassReport, WorkerSettings};
