use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};

use crate::error::{StorageError, ValidationError};
use crate::events::EngineEvent;
use crate::models::{Activity, CloseReason};
use crate::storage::{ActivityFilter, ActivityStore};
use crate::validation::{max_activity_duration, validate_activity};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Total write attempts for a transient failure, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each later attempt.
    pub backoff_base: Duration,
    /// Consecutive failed saves that mark storage unavailable.
    pub failure_threshold: u32,
    /// Delay between recovery probes while storage is unavailable.
    pub probe_interval: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            failure_threshold: 5,
            probe_interval: Duration::from_secs(30),
        }
    }
}

/// Result of handing a record to the persistence layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// Durably written.
    Saved,
    /// Accepted but not yet durable; held in the pending queue.
    Queued,
    /// Structurally invalid and dropped.
    Rejected(ValidationError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceStatus {
    pub storage_available: bool,
    pub consecutive_failures: u32,
    pub pending_count: usize,
    pub last_successful_save: Option<DateTime<Utc>>,
}

struct PersistenceState {
    storage_available: bool,
    consecutive_failures: u32,
    pending: Vec<Activity>,
    last_successful_save: Option<DateTime<Utc>>,
    probe_scheduled: bool,
    flushing: bool,
    /// Ids written directly while a flush is running; the flush skips them.
    superseded: HashSet<String>,
}

impl PersistenceState {
    /// Queues `activity`, replacing an older queued version of the same record.
    fn enqueue(&mut self, activity: Activity) {
        match self.pending.iter_mut().find(|queued| queued.id == activity.id) {
            Some(queued) => *queued = activity,
            None => self.pending.push(activity),
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_successful_save = Some(Utc::now());
    }

    /// Counts one failed write. Returns true when this failure trips the breaker.
    fn record_failure(&mut self, threshold: u32) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.storage_available && self.consecutive_failures >= threshold {
            self.storage_available = false;
            return true;
        }
        false
    }
}

struct Inner {
    store: Arc<dyn ActivityStore>,
    config: PersistenceConfig,
    state: Mutex<PersistenceState>,
    /// Held across each upsert so direct and flushed writes of a record cannot interleave.
    write_lock: Mutex<()>,
    events: Option<broadcast::Sender<EngineEvent>>,
}

/// Single point of retry, backoff, failure counting and queueing for storage writes.
#[derive(Clone)]
pub struct PersistenceLayer {
    inner: Arc<Inner>,
}

impl PersistenceLayer {
    pub fn new(store: Arc<dyn ActivityStore>, config: PersistenceConfig) -> Self {
        Self::build(store, config, None)
    }

    pub fn with_events(
        store: Arc<dyn ActivityStore>,
        config: PersistenceConfig,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self::build(store, config, Some(events))
    }

    fn build(
        store: Arc<dyn ActivityStore>,
        config: PersistenceConfig,
        events: Option<broadcast::Sender<EngineEvent>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                state: Mutex::new(PersistenceState {
                    storage_available: true,
                    consecutive_failures: 0,
                    pending: Vec::new(),
                    last_successful_save: None,
                    probe_scheduled: false,
                    flushing: false,
                    superseded: HashSet::new(),
                }),
                write_lock: Mutex::new(()),
                events,
            }),
        }
    }

    pub async fn save(&self, activity: Activity) -> SaveOutcome {
        if let Err(err) = validate_activity(&activity, Utc::now()) {
            log_warn!(
                "Dropping invalid activity {} ({}): {err}",
                activity.id,
                activity.context_id
            );
            return SaveOutcome::Rejected(err);
        }

        if !self.is_storage_available().await {
            let pending = {
                let mut state = self.inner.state.lock().await;
                state.enqueue(activity);
                state.pending.len()
            };
            log_debug!("Storage unavailable; queued activity ({pending} pending)");
            return SaveOutcome::Queued;
        }

        if activity.is_open() {
            self.close_other_open_records(&activity).await;
        }

        match self.write_with_retry(&activity).await {
            Ok(()) => {
                let backlog = {
                    let mut state = self.inner.state.lock().await;
                    state.record_success();
                    // Anything queued for this record is older than what was just written.
                    state.pending.retain(|queued| queued.id != activity.id);
                    !state.pending.is_empty() && !state.flushing
                };
                if backlog {
                    let layer = self.clone();
                    tokio::spawn(async move {
                        layer.flush_pending().await;
                    });
                }
                SaveOutcome::Saved
            }
            Err(err) => {
                self.handle_failed_save(activity, err).await;
                SaveOutcome::Queued
            }
        }
    }

    pub async fn is_storage_available(&self) -> bool {
        self.inner.state.lock().await.storage_available
    }

    pub async fn status(&self) -> PersistenceStatus {
        let state = self.inner.state.lock().await;
        PersistenceStatus {
            storage_available: state.storage_available,
            consecutive_failures: state.consecutive_failures,
            pending_count: state.pending.len(),
            last_successful_save: state.last_successful_save,
        }
    }

    /// Reads straight from storage; reads are neither retried nor counted.
    pub async fn fetch(&self, filter: ActivityFilter) -> Result<Vec<Activity>, StorageError> {
        self.inner.store.fetch(filter).await
    }

    /// Probes storage immediately instead of waiting for the scheduled probe.
    pub async fn probe_now(&self) {
        if self.is_storage_available().await {
            return;
        }

        match self.inner.store.probe().await {
            Ok(()) => {
                self.on_storage_recovered().await;
                if !self.is_storage_available().await {
                    self.schedule_probe().await;
                }
            }
            Err(err) => log_info!("Storage still unavailable: {err}"),
        }
    }

    /// Closes open records left behind by a previous run at their last heartbeat.
    ///
    /// Records that never received a heartbeat carry no duration and are deleted.
    pub async fn recover_open_activities(&self, now: DateTime<Utc>) -> usize {
        let open = match self.inner.store.fetch(ActivityFilter::Open).await {
            Ok(open) => open,
            Err(err) => {
                log_warn!("Could not look up open activities for recovery: {err}");
                return 0;
            }
        };

        let mut recovered = 0;
        for mut activity in open {
            if activity.updated_at <= activity.start_time {
                match self.inner.store.delete(&activity.id).await {
                    Ok(()) => log_info!(
                        "Deleted stale open activity {} ({}) with no recorded duration",
                        activity.id,
                        activity.context_id
                    ),
                    Err(err) => log_warn!("Failed to delete stale activity {}: {err}", activity.id),
                }
                continue;
            }

            let end = activity
                .updated_at
                .min(activity.start_time + max_activity_duration())
                .min(now);
            activity.close(end, CloseReason::Recovered);
            log_warn!(
                "Recovered open activity {} ({}); closing at {}",
                activity.id,
                activity.context_id,
                end.to_rfc3339()
            );
            if self.save(activity).await != SaveOutcome::Saved {
                log_warn!("Recovered activity could not be saved directly");
            }
            recovered += 1;
        }
        recovered
    }

    /// Attempts every queued record once; failures stay queued for the next cycle.
    ///
    /// Returns `(flushed, still_pending)`.
    pub async fn flush_pending(&self) -> (usize, usize) {
        let (flushed, still_pending, tripped) = self.flush_batch().await;
        if tripped {
            self.on_storage_degraded().await;
        }
        (flushed, still_pending)
    }

    /// One flush cycle. The third value is whether failures re-tripped the breaker.
    async fn flush_batch(&self) -> (usize, usize, bool) {
        let batch = {
            let mut state = self.inner.state.lock().await;
            if state.flushing {
                return (0, state.pending.len(), false);
            }
            state.flushing = true;
            std::mem::take(&mut state.pending)
        };

        let mut flushed = 0;
        let mut failed = Vec::new();
        for activity in batch {
            let _write = self.inner.write_lock.lock().await;
            if self.inner.state.lock().await.superseded.contains(&activity.id) {
                log_debug!("Skipping queued activity {}; a newer version was saved", activity.id);
                continue;
            }
            match self.inner.store.upsert(&activity).await {
                Ok(()) => {
                    flushed += 1;
                    self.inner.state.lock().await.record_success();
                }
                Err(err) => {
                    log_warn!("Flush of activity {} failed: {err}", activity.id);
                    failed.push(activity);
                }
            }
        }

        let (still_pending, tripped) = {
            let mut state = self.inner.state.lock().await;
            state.flushing = false;
            let superseded = std::mem::take(&mut state.superseded);
            failed.retain(|activity| !superseded.contains(&activity.id));

            let mut tripped = false;
            for _ in 0..failed.len() {
                tripped |= state.record_failure(self.inner.config.failure_threshold);
            }

            // Failed entries go back ahead of records queued during the flush,
            // unless a newer version of the same record arrived meanwhile.
            let newer = std::mem::take(&mut state.pending);
            failed.retain(|activity| !newer.iter().any(|queued| queued.id == activity.id));
            failed.extend(newer);
            state.pending = failed;

            (state.pending.len(), tripped)
        };

        if flushed > 0 || still_pending > 0 {
            log_info!("Flushed {flushed} pending activities ({still_pending} still pending)");
        }
        (flushed, still_pending, tripped)
    }

    async fn close_other_open_records(&self, activity: &Activity) {
        match self
            .inner
            .store
            .close_open_except(&activity.id, activity.start_time)
            .await
        {
            Ok(0) => {}
            Ok(closed) => log_warn!(
                "Closed {closed} stale open activities before opening {}",
                activity.context_id
            ),
            Err(err) => log_debug!("Could not enforce single open activity in storage: {err}"),
        }
    }

    async fn write_with_retry(&self, activity: &Activity) -> Result<(), StorageError> {
        let max_attempts = self.inner.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let written = {
                let _write = self.inner.write_lock.lock().await;
                let written = self.inner.store.upsert(activity).await;
                if written.is_ok() {
                    let mut state = self.inner.state.lock().await;
                    if state.flushing {
                        state.superseded.insert(activity.id.clone());
                    }
                }
                written
            };
            match written {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    log_debug!(
                        "Transient save failure for {} (attempt {attempt}/{max_attempts}): {err}; retrying in {}ms",
                        activity.id,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.inner.config.backoff_base.saturating_mul(factor)
    }

    async fn handle_failed_save(&self, activity: Activity, err: StorageError) {
        let activity_id = activity.id.clone();
        let (pending, failures, tripped) = {
            let mut state = self.inner.state.lock().await;
            state.enqueue(activity);
            let tripped = state.record_failure(self.inner.config.failure_threshold);
            (state.pending.len(), state.consecutive_failures, tripped)
        };

        log_warn!(
            "Save of activity {activity_id} failed ({err}); queued ({pending} pending, {failures} consecutive failures)"
        );

        if tripped {
            self.on_storage_degraded().await;
        }
    }

    async fn on_storage_degraded(&self) {
        self.announce_degraded().await;
        self.schedule_probe().await;
    }

    async fn announce_degraded(&self) {
        let status = self.status().await;
        log_error!(
            "Storage marked unavailable after {} consecutive failures; {} activities pending",
            status.consecutive_failures,
            status.pending_count
        );
        self.emit(EngineEvent::StorageDegraded {
            consecutive_failures: status.consecutive_failures,
            pending_count: status.pending_count,
        });
    }

    async fn schedule_probe(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.probe_scheduled {
                return;
            }
            state.probe_scheduled = true;
        }

        let layer = self.clone();
        tokio::spawn(async move {
            layer.probe_until_recovered().await;
        });
    }

    /// Probes on a fixed interval until storage is available again.
    async fn probe_until_recovered(&self) {
        let interval = self.inner.config.probe_interval;
        loop {
            tokio::time::sleep(interval).await;

            if !self.is_storage_available().await {
                match self.inner.store.probe().await {
                    Ok(()) => self.on_storage_recovered().await,
                    Err(err) => {
                        log_debug!("Recovery probe failed: {err}");
                        continue;
                    }
                }
            }

            // A flush during recovery may have tripped the breaker again.
            let mut state = self.inner.state.lock().await;
            if state.storage_available {
                state.probe_scheduled = false;
                break;
            }
        }
    }

    async fn on_storage_recovered(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.storage_available {
                return;
            }
            state.storage_available = true;
            state.consecutive_failures = 0;
        }

        log_info!("Storage available again; flushing pending activities");
        let (flushed, still_pending, tripped) = self.flush_batch().await;
        if tripped {
            self.announce_degraded().await;
        } else {
            self.emit(EngineEvent::StorageRecovered {
                flushed,
                still_pending,
            });
        }
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(events) = &self.inner.events {
            // No subscribers is fine.
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use tokio::sync::Notify;
    use tokio::time::Instant;

    fn layer_over(store: &MemoryStore) -> PersistenceLayer {
        PersistenceLayer::new(Arc::new(store.clone()), PersistenceConfig::default())
    }

    fn closed_activity(context: &str, minutes_ago: i64, secs: i64) -> Activity {
        let start = Utc::now() - ChronoDuration::minutes(minutes_ago);
        let mut activity = Activity::open(context, context.to_uppercase(), None, start);
        activity.close(start + ChronoDuration::seconds(secs), CloseReason::ContextSwitch);
        activity
    }

    fn busy() -> StorageError {
        StorageError::Busy("database is locked".into())
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        let store = MemoryStore::new();
        store.fail_next(2, busy());
        let layer = layer_over(&store);

        let started = Instant::now();
        let outcome = layer.save(closed_activity("a", 10, 60)).await;

        assert_eq!(outcome, SaveOutcome::Saved);
        assert_eq!(store.upsert_attempts(), 3);
        // 0.5s before the second attempt, 1s before the third.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(1_500), "waited {waited:?}");
        assert!(waited < Duration::from_millis(1_600), "waited {waited:?}");

        let status = layer.status().await;
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_successful_save.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_queue_the_record() {
        let store = MemoryStore::new();
        store.fail_next(3, busy());
        let layer = layer_over(&store);

        let outcome = layer.save(closed_activity("a", 10, 60)).await;

        assert_eq!(outcome, SaveOutcome::Queued);
        assert_eq!(store.upsert_attempts(), 3);
        let status = layer.status().await;
        assert_eq!(status.pending_count, 1);
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.storage_available);
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn permanent_failures_skip_retries() {
        let store = MemoryStore::new();
        store.fail_next(1, StorageError::Permanent("no such table".into()));
        let layer = layer_over(&store);

        let outcome = layer.save(closed_activity("a", 10, 60)).await;

        assert_eq!(outcome, SaveOutcome::Queued);
        assert_eq!(store.upsert_attempts(), 1);
        assert_eq!(layer.status().await.pending_count, 1);
    }

    #[tokio::test]
    async fn invalid_records_are_rejected_without_touching_storage() {
        let store = MemoryStore::new();
        let layer = layer_over(&store);
        let mut activity = closed_activity("a", 10, 60);
        activity.context_id.clear();

        let outcome = layer.save(activity).await;

        assert_eq!(outcome, SaveOutcome::Rejected(ValidationError::EmptyContextId));
        assert_eq!(store.upsert_attempts(), 0);
        assert_eq!(layer.status().await.pending_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_at_threshold_and_probe_flushes_queue() {
        let store = MemoryStore::new();
        store.fail_always(busy());
        let layer = layer_over(&store);

        for i in 0..5 {
            let outcome = layer.save(closed_activity("a", 60 - i, 30)).await;
            assert_eq!(outcome, SaveOutcome::Queued);
        }
        assert_eq!(store.upsert_attempts(), 15);
        let status = layer.status().await;
        assert!(!status.storage_available);
        assert_eq!(status.consecutive_failures, 5);

        // While the breaker is open nothing reaches storage.
        let outcome = layer.save(closed_activity("b", 5, 30)).await;
        assert_eq!(outcome, SaveOutcome::Queued);
        assert_eq!(store.upsert_attempts(), 15);
        assert_eq!(layer.status().await.pending_count, 6);

        // A failing probe keeps the breaker open.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(store.probe_attempts() >= 1);
        assert!(!layer.is_storage_available().await);

        store.recover();
        tokio::time::sleep(Duration::from_secs(30)).await;

        let status = layer.status().await;
        assert!(status.storage_available);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.pending_count, 0);
        assert_eq!(store.records().len(), 6);
    }

    #[tokio::test]
    async fn probe_now_recovers_without_waiting() {
        let store = MemoryStore::new();
        store.fail_always(StorageError::Permanent("disk I/O error".into()));
        let layer = PersistenceLayer::new(
            Arc::new(store.clone()),
            PersistenceConfig {
                failure_threshold: 1,
                probe_interval: Duration::from_secs(3_600),
                ..PersistenceConfig::default()
            },
        );

        layer.save(closed_activity("a", 10, 60)).await;
        assert!(!layer.is_storage_available().await);

        store.recover();
        layer.probe_now().await;

        let status = layer.status().await;
        assert!(status.storage_available);
        assert_eq!(status.pending_count, 0);
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn flush_requeues_entries_that_fail_again() {
        let store = MemoryStore::new();
        let layer = layer_over(&store);
        store.fail_next(2, StorageError::Permanent("readonly".into()));
        layer.save(closed_activity("a", 30, 60)).await;
        layer.save(closed_activity("b", 20, 60)).await;
        assert_eq!(layer.status().await.pending_count, 2);

        store.fail_next(1, StorageError::Permanent("readonly".into()));
        let (flushed, still_pending) = layer.flush_pending().await;

        assert_eq!((flushed, still_pending), (1, 1));
        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].context_id, "b");
    }

    #[tokio::test]
    async fn newer_save_supersedes_queued_version() {
        let store = MemoryStore::new();
        let layer = layer_over(&store);
        let mut activity = Activity::open("a", "A", None, Utc::now() - ChronoDuration::minutes(5));

        store.fail_next(2, StorageError::Permanent("readonly".into()));
        assert_eq!(layer.save(activity.clone()).await, SaveOutcome::Queued);

        activity.close(Utc::now(), CloseReason::ContextSwitch);
        assert_eq!(layer.save(activity.clone()).await, SaveOutcome::Saved);

        assert_eq!(layer.status().await.pending_count, 0);
        assert_eq!(store.get(&activity.id), Some(activity));
    }

    /// Holds upserts of one record until released.
    struct GatedStore {
        inner: MemoryStore,
        held_id: std::sync::Mutex<Option<String>>,
        entered: Notify,
        release: Notify,
    }

    impl GatedStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                held_id: std::sync::Mutex::new(None),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }

        fn hold(&self, id: &str) {
            *self.held_id.lock().unwrap() = Some(id.to_string());
        }
    }

    #[async_trait]
    impl ActivityStore for GatedStore {
        async fn upsert(&self, activity: &Activity) -> Result<(), StorageError> {
            let held = {
                let mut held_id = self.held_id.lock().unwrap();
                if held_id.as_deref() == Some(activity.id.as_str()) {
                    held_id.take()
                } else {
                    None
                }
            };
            if held.is_some() {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.upsert(activity).await
        }

        async fn fetch(&self, filter: ActivityFilter) -> Result<Vec<Activity>, StorageError> {
            self.inner.fetch(filter).await
        }

        async fn delete(&self, id: &str) -> Result<(), StorageError> {
            self.inner.delete(id).await
        }

        async fn close_open_except(
            &self,
            keep_id: &str,
            at: DateTime<Utc>,
        ) -> Result<usize, StorageError> {
            self.inner.close_open_except(keep_id, at).await
        }

        async fn probe(&self) -> Result<(), StorageError> {
            self.inner.probe().await
        }
    }

    #[tokio::test]
    async fn flush_does_not_overwrite_a_newer_direct_save() {
        let memory = MemoryStore::new();
        let store = Arc::new(GatedStore::new(memory.clone()));
        let layer = PersistenceLayer::new(store.clone(), PersistenceConfig::default());

        let a = closed_activity("a", 30, 60);
        let mut b = Activity::open("b", "B", None, Utc::now() - ChronoDuration::minutes(5));
        // a's upsert, then b's close_open_except and upsert.
        memory.fail_next(3, StorageError::Permanent("readonly".into()));
        assert_eq!(layer.save(a.clone()).await, SaveOutcome::Queued);
        assert_eq!(layer.save(b.clone()).await, SaveOutcome::Queued);
        assert_eq!(layer.status().await.pending_count, 2);

        store.hold(&a.id);
        let flush = tokio::spawn({
            let layer = layer.clone();
            async move { layer.flush_pending().await }
        });
        store.entered.notified().await;

        b.close(Utc::now(), CloseReason::ContextSwitch);
        let direct = tokio::spawn({
            let layer = layer.clone();
            let b = b.clone();
            async move { layer.save(b).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.release.notify_one();

        assert_eq!(direct.await.unwrap(), SaveOutcome::Saved);
        flush.await.unwrap();

        assert_eq!(memory.get(&a.id), Some(a));
        assert_eq!(memory.get(&b.id), Some(b));
        let status = layer.status().await;
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn saving_an_open_record_closes_stale_open_records() {
        let stale = Activity::open("a", "A", None, Utc::now() - ChronoDuration::minutes(30));
        let store = MemoryStore::with_records(vec![stale.clone()]);
        let layer = layer_over(&store);

        let current = Activity::open("b", "B", None, Utc::now() - ChronoDuration::minutes(1));
        assert_eq!(layer.save(current.clone()).await, SaveOutcome::Saved);

        let repaired = store.get(&stale.id).unwrap();
        assert_eq!(repaired.end_time, Some(current.start_time));
        assert_eq!(repaired.close_reason, Some(CloseReason::Superseded));
        let open: Vec<_> = store.records().into_iter().filter(Activity::is_open).collect();
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn recovery_closes_open_records_at_last_heartbeat() {
        let start = Utc::now() - ChronoDuration::minutes(40);
        let mut heartbeat = Activity::open("a", "A", None, start);
        heartbeat.touch(start + ChronoDuration::minutes(12));
        let silent = Activity::open("b", "B", None, start + ChronoDuration::minutes(20));
        let store = MemoryStore::with_records(vec![heartbeat.clone(), silent.clone()]);
        let layer = layer_over(&store);

        let recovered = layer.recover_open_activities(Utc::now()).await;

        assert_eq!(recovered, 1);
        let closed = store.get(&heartbeat.id).unwrap();
        assert_eq!(closed.end_time, Some(start + ChronoDuration::minutes(12)));
        assert_eq!(closed.duration_ms, 12 * 60 * 1_000);
        assert_eq!(closed.close_reason, Some(CloseReason::Recovered));
        assert!(store.get(&silent.id).is_none());
    }
}
