//! Wires the tracker, idle source, reconciler and persistence into one actor.

mod actor;
mod handle;

pub use handle::EngineHandle;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::idle::{IdleConfig, IdleSourceController, InputMonitor};
use crate::persistence::{PersistenceConfig, PersistenceLayer, SaveWriter};
use crate::power::SleepWakeCoordinator;
use crate::reconcile::IdleReconciler;
use crate::storage::ActivityStore;
use crate::tracker::SessionTracker;

use actor::EngineActor;

const EVENT_BUFFER: usize = 256;
const IDLE_EVENT_BUFFER: usize = 16;

#[derive(Clone)]
pub struct EngineConfig {
    pub persistence: PersistenceConfig,
    pub idle: IdleConfig,
    /// `None` runs the engine without idle awareness.
    pub idle_monitor: Option<Arc<dyn InputMonitor>>,
    pub heartbeat: Duration,
    pub signal_buffer: usize,
    pub sleep_flush_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            persistence: PersistenceConfig::default(),
            idle: IdleConfig::default(),
            idle_monitor: None,
            heartbeat: Duration::from_secs(60),
            signal_buffer: 256,
            sleep_flush_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Engine;

impl Engine {
    /// Recovers records left open by a previous run, then starts the actor.
    pub async fn start(
        store: Arc<dyn ActivityStore>,
        config: EngineConfig,
    ) -> (EngineHandle, JoinHandle<()>) {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let persistence =
            PersistenceLayer::with_events(store, config.persistence.clone(), events.clone());

        let recovered = persistence.recover_open_activities(Utc::now()).await;
        if recovered > 0 {
            log::info!("Recovered {recovered} activities left open by a previous run");
        }

        let (writer, _writer_task) = SaveWriter::spawn(persistence.clone());

        let mut idle_source = IdleSourceController::new();
        let idle_events = match config.idle_monitor {
            Some(monitor) => {
                let (idle_tx, idle_rx) = mpsc::channel(IDLE_EVENT_BUFFER);
                match idle_source.start(monitor, config.idle, idle_tx) {
                    Ok(()) => Some(idle_rx),
                    Err(err) => {
                        log::warn!("{err}; continuing without idle awareness");
                        None
                    }
                }
            }
            None => {
                log::info!("Idle monitoring disabled");
                None
            }
        };

        let (commands_tx, commands_rx) = mpsc::channel(config.signal_buffer.max(1));
        let actor = EngineActor {
            tracker: SessionTracker::new(),
            reconciler: IdleReconciler::new(persistence.clone()),
            power: SleepWakeCoordinator::new(
                writer.clone(),
                persistence.clone(),
                config.sleep_flush_timeout,
            ),
            persistence,
            writer,
            idle_source,
            events: events.clone(),
            heartbeat: config.heartbeat.max(Duration::from_secs(1)),
            shutdown_timeout: config.sleep_flush_timeout,
        };
        let task = tokio::spawn(actor.run(commands_rx, idle_events));

        (EngineHandle::new(commands_tx, events), task)
    }
}
