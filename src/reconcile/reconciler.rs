use super::algorithm::{reconcile, Adjustment};
use crate::error::ReconcileError;
use crate::models::IdleWindow;
use crate::persistence::{PersistenceLayer, SaveOutcome};
use crate::storage::ActivityFilter;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub examined: usize,
    pub flagged: usize,
    pub split: usize,
    pub trimmed: usize,
    /// Open records are reconciled by the tracker when they close.
    pub skipped_open: usize,
    /// Rewrites that were rejected or left in the pending queue.
    pub not_durable: usize,
}

impl ReconcileReport {
    pub fn changed(&self) -> usize {
        self.flagged + self.split + self.trimmed
    }
}

/// Corrects persisted, closed activities that overlap a finished idle window.
#[derive(Clone)]
pub struct IdleReconciler {
    persistence: PersistenceLayer,
}

impl IdleReconciler {
    pub fn new(persistence: PersistenceLayer) -> Self {
        Self { persistence }
    }

    pub async fn reconcile(&self, window: IdleWindow) -> Result<ReconcileReport, ReconcileError> {
        if !self.persistence.is_storage_available().await {
            return Err(ReconcileError::StorageUnavailable);
        }

        let overlapping = self
            .persistence
            .fetch(ActivityFilter::Overlapping {
                start: window.start,
                end: window.end(),
            })
            .await
            .map_err(ReconcileError::Fetch)?;

        let mut report = ReconcileReport::default();
        for activity in overlapping {
            report.examined += 1;
            if activity.is_open() {
                report.skipped_open += 1;
                continue;
            }

            let Some(adjustment) = reconcile(&activity, &window) else {
                continue;
            };
            match &adjustment {
                Adjustment::MarkIdle(_) => report.flagged += 1,
                Adjustment::Split { .. } => report.split += 1,
                Adjustment::TrimEnd(_) | Adjustment::TrimStart(_) => report.trimmed += 1,
            }

            for record in adjustment.into_records() {
                let record_id = record.id.clone();
                match self.persistence.save(record).await {
                    SaveOutcome::Saved => {}
                    outcome => {
                        log::warn!("Reconciled activity {record_id} not saved: {outcome:?}");
                        report.not_durable += 1;
                    }
                }
            }
        }

        if report.changed() > 0 {
            log::info!(
                "Reconciled idle window starting {} ({}s): {} flagged, {} split, {} trimmed",
                window.start.to_rfc3339(),
                window.duration().num_seconds(),
                report.flagged,
                report.split,
                report.trimmed
            );
        }
        Ok(report)
    }

    /// Runs reconciliation, logging instead of returning failures.
    pub async fn reconcile_logged(&self, window: IdleWindow) {
        if let Err(err) = self.reconcile(window).await {
            log::warn!(
                "Skipping reconciliation of idle window starting {}: {err}",
                window.start.to_rfc3339()
            );
        }
    }
}
