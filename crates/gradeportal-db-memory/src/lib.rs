//! In-memory storage backend for the grade portal.
//!
//! This crate provides in-memory implementations of the `GradeStorage` and
//! `OutboxStorage` traits from `gradeportal-storage`, using DashMap for
//! concurrent access. It is meant for tests and single-node development.
//!
//! # Example
//!
//! ```ignore
//! use gradeportal_db_memory::InMemoryStorage;
//! use gradeportal_storage::GradeStorage;
//!
//! let storage = InMemoryStorage::new();
//! storage.set_release_policy("2024-1", true);
//! assert_eq!(storage.find_release_status("2024-1").await?, Some(true));
//! ```

mod grade_impl;
mod outbox_impl;
pub mod storage;

pub use grade_impl::InMemoryTransaction;
pub use gradeportal_storage::{GradeStorage, OutboxStorage, StorageError};
pub use storage::{Enrollment, InMemoryStorage, StoredObjection};
