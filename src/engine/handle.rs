use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::context::ContextInfo;
use crate::events::EngineEvent;
use crate::models::{Activity, HealthSnapshot};

pub(crate) enum Command {
    Activate {
        context: ContextInfo,
        detail: Option<String>,
        at: DateTime<Utc>,
    },
    Suspend {
        at: DateTime<Utc>,
        done: oneshot::Sender<()>,
    },
    Resume {
        at: DateTime<Utc>,
    },
    CurrentSession(oneshot::Sender<Option<Activity>>),
    Health(oneshot::Sender<HealthSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable entry point to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self { commands, events }
    }

    pub async fn context_activated(
        &self,
        context: ContextInfo,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.send(Command::Activate {
            context,
            detail,
            at,
        })
        .await
    }

    /// Returns once the closed session has been written or the flush timed out.
    pub async fn suspend(&self, at: DateTime<Utc>) -> Result<()> {
        let (done, finished) = oneshot::channel();
        self.send(Command::Suspend { at, done }).await?;
        finished.await.context("engine stopped during suspend")
    }

    pub async fn resume(&self, at: DateTime<Utc>) -> Result<()> {
        self.send(Command::Resume { at }).await
    }

    pub async fn current_session(&self) -> Result<Option<Activity>> {
        let (reply, answer) = oneshot::channel();
        self.send(Command::CurrentSession(reply)).await?;
        answer.await.context("engine dropped current session request")
    }

    pub async fn health_snapshot(&self) -> Result<HealthSnapshot> {
        let (reply, answer) = oneshot::channel();
        self.send(Command::Health(reply)).await?;
        answer.await.context("engine dropped health request")
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Closes the open session, drains pending writes and stops the engine.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, finished) = oneshot::channel();
        self.send(Command::Shutdown(reply)).await?;
        finished.await.context("engine stopped before finishing shutdown")
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("engine is not running"))
    }
}
