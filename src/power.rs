//! Session boundaries around system suspend and resume.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::{Activity, CloseReason};
use crate::persistence::{PersistenceLayer, SaveOutcome, SaveWriter};
use crate::tracker::SessionTracker;

pub struct SleepWakeCoordinator {
    writer: SaveWriter,
    persistence: PersistenceLayer,
    flush_timeout: Duration,
}

impl SleepWakeCoordinator {
    pub fn new(writer: SaveWriter, persistence: PersistenceLayer, flush_timeout: Duration) -> Self {
        Self {
            writer,
            persistence,
            flush_timeout,
        }
    }

    /// Closes the open session at `at`, waits (bounded) for it to be written and
    /// suppresses new sessions until resume. Returns the closed records.
    pub async fn on_suspend(
        &self,
        tracker: &mut SessionTracker,
        at: DateTime<Utc>,
    ) -> Vec<Activity> {
        let closed = tracker.close_current(at, CloseReason::Sleep);
        tracker.suppress();

        for activity in &closed {
            match self
                .writer
                .submit_and_wait(activity.clone(), self.flush_timeout)
                .await
            {
                Some(SaveOutcome::Saved) => {}
                Some(outcome) => log::warn!(
                    "Final activity {} before sleep not durable: {outcome:?}",
                    activity.id
                ),
                None => log::warn!(
                    "Final activity {} before sleep still in flight",
                    activity.id
                ),
            }
        }

        log::info!("System suspending; closed {} record(s)", closed.len());
        closed
    }

    /// Lifts suppression without opening a session; the next activation does that.
    pub fn on_resume(&self, tracker: &mut SessionTracker, at: DateTime<Utc>) {
        tracker.resume();
        log::info!("System resumed at {}", at.to_rfc3339());

        let persistence = self.persistence.clone();
        tokio::spawn(async move {
            // No-op while storage is healthy.
            persistence.probe_now().await;
        });
    }
}
