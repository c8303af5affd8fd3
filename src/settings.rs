use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
    time::Duration,
};

use crate::engine::EngineConfig;
use crate::idle::{IdleBackend, IdleConfig};
use crate::persistence::PersistenceConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct IdleSettings {
    pub enabled: bool,
    pub backend: IdleBackend,
    pub threshold_secs: u64,
    pub sample_interval_secs: u64,
}

impl Default for IdleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: IdleBackend::System,
            threshold_secs: 300,
            sample_interval_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PersistenceSettings {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub failure_threshold: u32,
    pub probe_interval_secs: u64,
    pub sleep_flush_timeout_secs: u64,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            failure_threshold: 5,
            probe_interval_secs: 30,
            sleep_flush_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerSettings {
    pub idle: IdleSettings,
    pub persistence: PersistenceSettings,
    pub heartbeat_secs: u64,
    pub signal_buffer: usize,
    /// Task id -> display name, used when no richer resolver is available.
    pub display_names: HashMap<String, String>,
    /// Contexts whose detail (window titles, URLs) is never recorded.
    pub private_contexts: Vec<String>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            idle: IdleSettings::default(),
            persistence: PersistenceSettings::default(),
            heartbeat_secs: 60,
            signal_buffer: 256,
            display_names: HashMap::new(),
            private_contexts: Vec::new(),
        }
    }
}

impl TrackerSettings {
    /// Engine configuration without an idle monitor; the host picks one from `idle.backend`.
    pub fn engine_config(&self) -> EngineConfig {
        let persistence = &self.persistence;
        EngineConfig {
            persistence: PersistenceConfig {
                max_attempts: persistence.max_attempts.max(1),
                backoff_base: Duration::from_millis(persistence.backoff_base_ms),
                failure_threshold: persistence.failure_threshold.max(1),
                probe_interval: Duration::from_secs(persistence.probe_interval_secs.max(1)),
            },
            idle: IdleConfig {
                threshold: Duration::from_secs(self.idle.threshold_secs.max(1)),
                sample_interval: Duration::from_secs(self.idle.sample_interval_secs.max(1)),
            },
            idle_monitor: None,
            heartbeat: Duration::from_secs(self.heartbeat_secs.max(1)),
            signal_buffer: self.signal_buffer.max(1),
            sleep_flush_timeout: Duration::from_secs(persistence.sleep_flush_timeout_secs),
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<TrackerSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring unreadable settings at {}: {err}",
                    path.display()
                );
                TrackerSettings::default()
            })
        } else {
            TrackerSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> TrackerSettings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update(&self, settings: TrackerSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &TrackerSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
