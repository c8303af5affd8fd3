use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ActivityFilter, ActivityStore};
use crate::error::StorageError;
use crate::models::{Activity, CloseReason};

/// Volatile `ActivityStore` with scriptable failures.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    records: Vec<Activity>,
    scripted_failures: VecDeque<StorageError>,
    failing: Option<StorageError>,
    upsert_attempts: usize,
    probe_attempts: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<Activity>) -> Self {
        let store = Self::new();
        store.state().records = records;
        store
    }

    /// The next `count` operations fail with `err`, then behaviour returns to normal.
    pub fn fail_next(&self, count: usize, err: StorageError) {
        let mut state = self.state();
        for _ in 0..count {
            state.scripted_failures.push_back(err.clone());
        }
    }

    /// Every operation fails with `err` until `recover` is called.
    pub fn fail_always(&self, err: StorageError) {
        self.state().failing = Some(err);
    }

    pub fn recover(&self) {
        let mut state = self.state();
        state.failing = None;
        state.scripted_failures.clear();
    }

    pub fn records(&self) -> Vec<Activity> {
        let mut records = self.state().records.clone();
        records.sort_by_key(|record| record.start_time);
        records
    }

    pub fn get(&self, id: &str) -> Option<Activity> {
        self.state().records.iter().find(|record| record.id == id).cloned()
    }

    pub fn upsert_attempts(&self) -> usize {
        self.state().upsert_attempts
    }

    pub fn probe_attempts(&self) -> usize {
        self.state().probe_attempts
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryState {
    fn injected_failure(&mut self) -> Result<(), StorageError> {
        if let Some(err) = self.scripted_failures.pop_front() {
            return Err(err);
        }
        match &self.failing {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ActivityStore for MemoryStore {
    async fn upsert(&self, activity: &Activity) -> Result<(), StorageError> {
        let mut state = self.state();
        state.upsert_attempts += 1;
        state.injected_failure()?;

        match state.records.iter_mut().find(|record| record.id == activity.id) {
            Some(existing) => *existing = activity.clone(),
            None => state.records.push(activity.clone()),
        }
        Ok(())
    }

    async fn fetch(&self, filter: ActivityFilter) -> Result<Vec<Activity>, StorageError> {
        let mut state = self.state();
        state.injected_failure()?;

        let now = Utc::now();
        let mut matching: Vec<Activity> = state
            .records
            .iter()
            .filter(|record| filter.matches(record, now))
            .cloned()
            .collect();
        matching.sort_by_key(|record| record.start_time);
        Ok(matching)
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut state = self.state();
        state.injected_failure()?;
        state.records.retain(|record| record.id != id);
        Ok(())
    }

    async fn close_open_except(
        &self,
        keep_id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let mut state = self.state();
        state.injected_failure()?;

        let mut closed = 0;
        for record in state
            .records
            .iter_mut()
            .filter(|record| record.is_open() && record.id != keep_id)
        {
            let end = at.max(record.start_time);
            record.close(end, CloseReason::Superseded);
            closed += 1;
        }
        Ok(closed)
    }

    async fn probe(&self) -> Result<(), StorageError> {
        let mut state = self.state();
        state.probe_attempts += 1;
        state.injected_failure()
    }
}
