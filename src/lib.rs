mod cli;
pub mod context;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod host;
pub mod idle;
pub mod models;
pub mod persistence;
pub mod power;
pub mod reconcile;
pub mod settings;
pub mod storage;
pub mod tracker;
mod utils;
pub mod validation;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use context::{ActivationFeed, PrivacyFilter, StaticResolver};
use db::Database;
use engine::Engine;
use host::HostBridge;
use idle::{IdleBackend, InputMonitor, InputTap, SystemIdleProbe};
use settings::SettingsStore;

pub use engine::{EngineConfig, EngineHandle};
pub use error::{MonitorUnavailable, ReconcileError, StorageError, ValidationError};
pub use events::EngineEvent;
pub use models::{Activity, CloseReason, HealthSnapshot, IdleWindow};
pub use persistence::SaveOutcome;
pub use storage::{ActivityFilter, ActivityStore, MemoryStore};

pub fn run() -> Result<()> {
    let args = cli::Args::parse();

    // Initialize logging (reads RUST_LOG env var)
    let level = if std::env::var("LEFOCUS_DEBUG").is_ok_and(|value| value == "1") {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    log::info!("LeFocus tracker starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(start(args))
}

async fn start(args: cli::Args) -> Result<()> {
    let settings_store = SettingsStore::new(args.config_path())?;
    let settings = settings_store.get();
    log::info!("Settings loaded from {}", settings_store.path().display());

    let database = Database::new(args.db_path())?;

    let mut config = settings.engine_config();
    let backend = args.idle_backend.unwrap_or(settings.idle.backend);
    let mut tap = None;
    if settings.idle.enabled && !args.no_idle {
        let monitor: Arc<dyn InputMonitor> = match backend {
            IdleBackend::System => Arc::new(SystemIdleProbe::new()),
            IdleBackend::Tap => {
                let input_tap = InputTap::new();
                tap = Some(input_tap.clone());
                Arc::new(input_tap)
            }
        };
        config.idle_monitor = Some(monitor);
    }

    let (engine, engine_task) = Engine::start(Arc::new(database), config).await;
    let feed = ActivationFeed::new(
        Arc::new(StaticResolver::new(settings.display_names.clone())),
        PrivacyFilter::new(settings.private_contexts.clone()),
        engine.clone(),
    );

    HostBridge::new(engine, feed, tap).serve().await?;
    engine_task.await.context("engine task failed to join")?;
    Ok(())
}
