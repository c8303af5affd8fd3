//! The record-store contract the engine requires, independent of any engine.

mod memory;
mod sqlite;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::models::Activity;

/// Selects which persisted activities `ActivityStore::fetch` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityFilter {
    /// Records with no end time.
    Open,
    /// Records whose `[start, end ?? now)` intersects `[start, end)`.
    Overlapping {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl ActivityFilter {
    pub fn matches(&self, activity: &Activity, now: DateTime<Utc>) -> bool {
        match *self {
            ActivityFilter::Open => activity.is_open(),
            ActivityFilter::Overlapping { start, end } => {
                activity.start_time < end && activity.effective_end(now) > start
            }
        }
    }
}

/// Each call runs as its own committed transaction.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Inserts the record, or replaces the stored record with the same id.
    async fn upsert(&self, activity: &Activity) -> Result<(), StorageError>;

    /// Returns matching records ordered by start time.
    async fn fetch(&self, filter: ActivityFilter) -> Result<Vec<Activity>, StorageError>;

    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// Closes every open record except `keep_id`, ending each at `at` (or at its
    /// own start if `at` precedes it). Returns how many records were closed.
    async fn close_open_except(
        &self,
        keep_id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize, StorageError>;

    /// Cheap read used to detect that storage has recovered.
    async fn probe(&self) -> Result<(), StorageError>;
}
