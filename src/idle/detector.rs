use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::IdleWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Active,
    Idle { since: DateTime<Utc> },
}

/// Transition reported by the idle source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IdleEvent {
    /// `at` is backdated to when input stopped, not when the sample was taken.
    Started { at: DateTime<Utc> },
    #[serde(rename_all = "camelCase")]
    Ended {
        window: IdleWindow,
        returned_at: DateTime<Utc>,
    },
}

/// Two-state machine fed with "time since last input" samples.
#[derive(Debug, Clone)]
pub struct IdleDetector {
    threshold: Duration,
    state: IdleState,
}

impl IdleDetector {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            state: IdleState::Active,
        }
    }

    pub fn state(&self) -> IdleState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, IdleState::Idle { .. })
    }

    pub fn observe(&mut self, idle_for: Duration, now: DateTime<Utc>) -> Option<IdleEvent> {
        match self.state {
            IdleState::Active if idle_for >= self.threshold => {
                let threshold = chrono::Duration::from_std(self.threshold)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                let since = now - threshold;
                self.state = IdleState::Idle { since };
                Some(IdleEvent::Started { at: since })
            }
            IdleState::Idle { since } if idle_for < self.threshold => {
                self.state = IdleState::Active;
                Some(IdleEvent::Ended {
                    window: IdleWindow::between(since, now),
                    returned_at: now,
                })
            }
            _ => None,
        }
    }
}
