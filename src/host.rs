//! JSON-lines bridge between a host process and the engine.
//!
//! Each stdin line is one event:
//! ```text
//! {"type":"activate","task":"com.apple.Safari","title":"docs.rs"}
//! {"type":"input"}
//! {"type":"suspend"}
//! {"type":"resume"}
//! {"type":"status"}
//! ```
//! Engine events and status answers are written to stdout, one JSON object per line.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::context::ActivationFeed;
use crate::engine::EngineHandle;
use crate::idle::InputTap;
use crate::models::{Activity, HealthSnapshot};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostEvent {
    Activate {
        task: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Input,
    Suspend {
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Resume {
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Status,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusLine {
    #[serde(rename = "type")]
    kind: &'static str,
    health: HealthSnapshot,
    current_session: Option<Activity>,
}

pub fn parse_line(line: &str) -> Result<HostEvent> {
    serde_json::from_str(line).with_context(|| format!("invalid host event: {line}"))
}

pub struct HostBridge {
    engine: EngineHandle,
    feed: ActivationFeed,
    tap: Option<InputTap>,
}

impl HostBridge {
    pub fn new(engine: EngineHandle, feed: ActivationFeed, tap: Option<InputTap>) -> Self {
        Self { engine, feed, tap }
    }

    /// Reads stdin until EOF or Ctrl-C, then shuts the engine down.
    pub async fn serve(self) -> Result<()> {
        let printer = tokio::spawn(print_events(self.engine.clone()));
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => match line.context("failed to read stdin")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match parse_line(&line) {
                        Ok(event) => self.dispatch(event).await?,
                        Err(err) => log::warn!("{err:#}"),
                    },
                    None => {
                        log::info!("stdin closed; shutting down");
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Interrupted; shutting down");
                    break;
                }
            }
        }

        self.engine.shutdown().await?;
        printer.abort();
        Ok(())
    }

    pub async fn dispatch(&self, event: HostEvent) -> Result<()> {
        match event {
            HostEvent::Activate { task, title, at } => {
                self.feed
                    .activate(&task, title, at.unwrap_or_else(Utc::now))
                    .await
            }
            HostEvent::Input => {
                match &self.tap {
                    Some(tap) => tap.record_input(),
                    None => log::debug!("Input event ignored; input tap not in use"),
                }
                Ok(())
            }
            HostEvent::Suspend { at } => self.engine.suspend(at.unwrap_or_else(Utc::now)).await,
            HostEvent::Resume { at } => self.engine.resume(at.unwrap_or_else(Utc::now)).await,
            HostEvent::Status => {
                let status = StatusLine {
                    kind: "status",
                    health: self.engine.health_snapshot().await?,
                    current_session: self.engine.current_session().await?,
                };
                println!("{}", serde_json::to_string(&status)?);
                Ok(())
            }
        }
    }
}

async fn print_events(engine: EngineHandle) {
    let mut events = engine.subscribe();
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => log::error!("Failed to serialize engine event: {err}"),
            },
            Err(RecvError::Lagged(skipped)) => log::warn!("Dropped {skipped} engine events"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_events() {
        assert_eq!(
            parse_line(r#"{"type":"activate","task":"com.apple.Safari","title":"docs.rs"}"#)
                .unwrap(),
            HostEvent::Activate {
                task: "com.apple.Safari".into(),
                title: Some("docs.rs".into()),
                at: None,
            }
        );
        assert_eq!(parse_line(r#"{"type":"input"}"#).unwrap(), HostEvent::Input);
        assert_eq!(
            parse_line(r#"{"type":"suspend","at":"2026-03-01T09:00:00Z"}"#).unwrap(),
            HostEvent::Suspend {
                at: Some("2026-03-01T09:00:00Z".parse().unwrap())
            }
        );
        assert_eq!(parse_line(r#"{"type":"status"}"#).unwrap(), HostEvent::Status);
    }

    #[test]
    fn rejects_unknown_events() {
        assert!(parse_line(r#"{"type":"reboot"}"#).is_err());
        assert!(parse_line("activate safari").is_err());
    }
}
