use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::MonitorUnavailable;

/// Source of "time since the last qualifying user input".
pub trait InputMonitor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Checks that the primitive is usable. Called once before sampling starts.
    fn start(&self) -> Result<(), MonitorUnavailable>;

    fn idle_for(&self) -> Result<Duration, MonitorUnavailable>;

    /// Notified on fresh input, so a return from idle is seen without waiting
    /// for the next sample.
    fn wake_signal(&self) -> Option<Arc<Notify>> {
        None
    }

    /// Whether `idle_for` may block and must run off the async executor.
    fn blocking(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdleBackend {
    /// Poll the host for HID idle time.
    System,
    /// Driven by `InputTap::record_input` from an external input hook.
    Tap,
}

impl IdleBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "system" => Some(IdleBackend::System),
            "tap" => Some(IdleBackend::Tap),
            _ => None,
        }
    }
}

/// Polling sampler backed by the host's HID idle counter.
#[derive(Debug, Default, Clone)]
pub struct SystemIdleProbe;

impl SystemIdleProbe {
    pub fn new() -> Self {
        Self
    }
}

impl InputMonitor for SystemIdleProbe {
    fn name(&self) -> &'static str {
        "system"
    }

    fn start(&self) -> Result<(), MonitorUnavailable> {
        self.idle_for().map(|_| ())
    }

    #[cfg(target_os = "macos")]
    fn idle_for(&self) -> Result<Duration, MonitorUnavailable> {
        let stdout = run_command("ioreg", &["-c", "IOHIDSystem"])?;
        parse_hid_idle_time(&stdout)
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    fn idle_for(&self) -> Result<Duration, MonitorUnavailable> {
        let stdout = run_command("xprintidle", &[])?;
        parse_xprintidle(&stdout)
    }

    #[cfg(not(unix))]
    fn idle_for(&self) -> Result<Duration, MonitorUnavailable> {
        Err(MonitorUnavailable(
            "no system idle source on this platform".into(),
        ))
    }
}

#[cfg_attr(not(unix), allow(dead_code))]
fn run_command(program: &str, args: &[&str]) -> Result<String, MonitorUnavailable> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|err| MonitorUnavailable(format!("failed to run {program}: {err}")))?;

    if !output.status.success() {
        return Err(MonitorUnavailable(format!(
            "{program} exited with {}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extracts `HIDIdleTime` (nanoseconds) from `ioreg -c IOHIDSystem` output.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_hid_idle_time(output: &str) -> Result<Duration, MonitorUnavailable> {
    output
        .lines()
        .find(|line| line.contains("\"HIDIdleTime\""))
        .and_then(|line| line.rsplit('=').next())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_nanos)
        .ok_or_else(|| MonitorUnavailable("HIDIdleTime missing from ioreg output".into()))
}

/// Parses `xprintidle` output (milliseconds).
#[cfg_attr(any(target_os = "macos", not(unix)), allow(dead_code))]
fn parse_xprintidle(output: &str) -> Result<Duration, MonitorUnavailable> {
    output
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|err| MonitorUnavailable(format!("unexpected xprintidle output: {err}")))
}

/// Event-driven monitor: an external hook reports every pointer, key or scroll event.
#[derive(Clone)]
pub struct InputTap {
    last_input: Arc<Mutex<Instant>>,
    wake: Arc<Notify>,
}

impl Default for InputTap {
    fn default() -> Self {
        Self::new()
    }
}

impl InputTap {
    pub fn new() -> Self {
        Self {
            last_input: Arc::new(Mutex::new(Instant::now())),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn record_input(&self) {
        *self
            .last_input
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
        self.wake.notify_one();
    }
}

impl InputMonitor for InputTap {
    fn name(&self) -> &'static str {
        "tap"
    }

    fn start(&self) -> Result<(), MonitorUnavailable> {
        Ok(())
    }

    fn idle_for(&self) -> Result<Duration, MonitorUnavailable> {
        let last_input = *self
            .last_input
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(last_input.elapsed())
    }

    fn wake_signal(&self) -> Option<Arc<Notify>> {
        Some(self.wake.clone())
    }

    fn blocking(&self) -> bool {
        false
    }
}
