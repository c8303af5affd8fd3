use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use super::handle::Command;
use crate::context::ContextInfo;
use crate::events::EngineEvent;
use crate::idle::{IdleEvent, IdleSourceController};
use crate::models::{Activity, CloseReason, HealthSnapshot};
use crate::persistence::{PersistenceLayer, SaveWriter};
use crate::power::SleepWakeCoordinator;
use crate::reconcile::IdleReconciler;
use crate::tracker::SessionTracker;

pub(crate) struct EngineActor {
    pub(crate) tracker: SessionTracker,
    pub(crate) persistence: PersistenceLayer,
    pub(crate) writer: SaveWriter,
    pub(crate) reconciler: IdleReconciler,
    pub(crate) power: SleepWakeCoordinator,
    pub(crate) idle_source: IdleSourceController,
    pub(crate) events: broadcast::Sender<EngineEvent>,
    pub(crate) heartbeat: Duration,
    pub(crate) shutdown_timeout: Duration,
}

impl EngineActor {
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut idle_events: Option<mpsc::Receiver<IdleEvent>>,
    ) {
        let mut heartbeat =
            tokio::time::interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.finish().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                event = next_idle_event(&mut idle_events) => match event {
                    Some(event) => self.on_idle_event(event),
                    None => {
                        log::warn!("Idle source stopped; continuing without idle awareness");
                        idle_events = None;
                    }
                },
                _ = heartbeat.tick() => self.on_heartbeat(),
            }
        }

        // Every handle was dropped.
        self.finish().await;
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Activate {
                context,
                detail,
                at,
            } => self.on_activate(context, detail, at),
            Command::Suspend { at, done } => {
                let closed = self.power.on_suspend(&mut self.tracker, at).await;
                for activity in closed {
                    self.emit(EngineEvent::SessionClosed { activity });
                }
                let _ = done.send(());
            }
            Command::Resume { at } => self.power.on_resume(&mut self.tracker, at),
            Command::CurrentSession(reply) => {
                let _ = reply.send(self.tracker.current_session().cloned());
            }
            Command::Health(reply) => self.report_health(reply).await,
            Command::Shutdown(_) => {}
        }
    }

    fn on_activate(&mut self, context: ContextInfo, detail: Option<String>, at: DateTime<Utc>) {
        let outcome = self
            .tracker
            .on_context_switch(&context, detail, at, Utc::now());

        for activity in outcome.closed {
            self.persist_closed(activity);
        }
        if let Some(activity) = outcome.opened {
            log::info!(
                "Session opened for {} ({})",
                activity.display_name,
                activity.context_id
            );
            self.writer.submit(activity.clone());
            self.emit(EngineEvent::SessionOpened { activity });
        }
    }

    fn on_idle_event(&mut self, event: IdleEvent) {
        match event {
            IdleEvent::Started { at } => self.emit(EngineEvent::IdleStarted { at }),
            IdleEvent::Ended {
                window,
                returned_at,
            } => {
                if self.tracker.defer_idle_window(window, returned_at) {
                    log::debug!("Idle window deferred until the open session closes");
                }

                // Persisted history is corrected after earlier saves have landed.
                let writer = self.writer.clone();
                let reconciler = self.reconciler.clone();
                tokio::spawn(async move {
                    writer.settled().await;
                    reconciler.reconcile_logged(window).await;
                });

                self.emit(EngineEvent::IdleEnded {
                    window,
                    returned_at,
                });
            }
        }
    }

    fn on_heartbeat(&mut self) {
        if let Some(activity) = self.tracker.heartbeat(Utc::now()) {
            self.writer.submit(activity);
        }
    }

    async fn report_health(&self, reply: oneshot::Sender<HealthSnapshot>) {
        let status = self.persistence.status().await;
        let snapshot = HealthSnapshot {
            storage_available: status.storage_available,
            consecutive_failures: status.consecutive_failures,
            pending_count: status.pending_count,
            last_successful_save: status.last_successful_save,
            current_context_id: self
                .tracker
                .current_session()
                .map(|activity| activity.context_id.clone()),
            idle_monitoring: self.idle_source.is_running(),
        };
        let _ = reply.send(snapshot);
    }

    fn persist_closed(&self, activity: Activity) {
        log::info!(
            "Session closed for {} after {}s",
            activity.context_id,
            activity.duration_ms / 1_000
        );
        self.writer.submit(activity.clone());
        self.emit(EngineEvent::SessionClosed { activity });
    }

    async fn finish(&mut self) {
        let closed = self
            .tracker
            .close_current(Utc::now(), CloseReason::Shutdown);
        for activity in closed {
            self.persist_closed(activity);
        }

        if let Err(err) = self.idle_source.stop().await {
            log::warn!("Idle source did not stop cleanly: {err:#}");
        }

        if tokio::time::timeout(self.shutdown_timeout, self.writer.settled())
            .await
            .is_err()
        {
            log::warn!("Pending saves still in flight at shutdown");
        }

        let status = self.persistence.status().await;
        if status.pending_count > 0 {
            log::warn!(
                "{} activities not yet durable at shutdown",
                status.pending_count
            );
        }
        log::info!("Engine stopped");
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn next_idle_event(receiver: &mut Option<mpsc::Receiver<IdleEvent>>) -> Option<IdleEvent> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
