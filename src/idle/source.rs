use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::detector::{IdleDetector, IdleEvent};
use super::monitor::InputMonitor;
use crate::error::MonitorUnavailable;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy)]
pub struct IdleConfig {
    pub threshold: Duration,
    pub sample_interval: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(300),
            sample_interval: Duration::from_secs(15),
        }
    }
}

/// Owns the sampling task that turns input samples into idle transitions.
pub struct IdleSourceController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl Default for IdleSourceController {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleSourceController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Starts sampling `monitor`. Fails without spawning anything when the
    /// monitor cannot be initialized; callers continue without idle awareness.
    pub fn start(
        &mut self,
        monitor: Arc<dyn InputMonitor>,
        config: IdleConfig,
        events: mpsc::Sender<IdleEvent>,
    ) -> Result<(), MonitorUnavailable> {
        if self.is_running() {
            return Ok(());
        }

        monitor.start()?;
        log_info!(
            "Idle source started with {} monitor (threshold {}s, sampling every {}s)",
            monitor.name(),
            config.threshold.as_secs(),
            config.sample_interval.as_secs()
        );

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(idle_loop(monitor, config, events, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle.await.context("idle loop task failed to join")
        } else {
            Ok(())
        }
    }
}

async fn idle_loop(
    monitor: Arc<dyn InputMonitor>,
    config: IdleConfig,
    events: mpsc::Sender<IdleEvent>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.sample_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut detector = IdleDetector::new(config.threshold);
    let wake = monitor.wake_signal();

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_info!("Idle loop shutting down");
                break;
            }
            _ = ticker.tick() => {}
            _ = wait_for_input(wake.as_deref()), if detector.is_idle() => {
                log_debug!("Input observed while idle; sampling early");
            }
        }

        let idle_for = match sample(&monitor).await {
            Ok(idle_for) => idle_for,
            Err(err) => {
                log_warn!("Idle sample failed: {err}");
                continue;
            }
        };

        if let Some(event) = detector.observe(idle_for, Utc::now()) {
            match &event {
                IdleEvent::Started { at } => log_info!("User idle since {}", at.to_rfc3339()),
                IdleEvent::Ended { window, .. } => log_info!(
                    "User back after {}s idle",
                    window.duration().num_seconds()
                ),
            }
            if events.send(event).await.is_err() {
                log_error!("Idle event receiver dropped; stopping idle loop");
                break;
            }
        }
    }
}

async fn wait_for_input(wake: Option<&Notify>) {
    match wake {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

async fn sample(monitor: &Arc<dyn InputMonitor>) -> Result<Duration, MonitorUnavailable> {
    if !monitor.blocking() {
        return monitor.idle_for();
    }

    let monitor = monitor.clone();
    tokio::task::spawn_blocking(move || monitor.idle_for())
        .await
        .map_err(|err| MonitorUnavailable(format!("idle sample task failed: {err}")))?
}
