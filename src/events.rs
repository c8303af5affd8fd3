use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Activity, IdleWindow};

/// Outward notifications for UI and downstream consumers.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    SessionOpened {
        activity: Activity,
    },
    SessionClosed {
        activity: Activity,
    },
    #[serde(rename_all = "camelCase")]
    IdleStarted {
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    IdleEnded {
        window: IdleWindow,
        returned_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StorageDegraded {
        consecutive_failures: u32,
        pending_count: usize,
    },
    #[serde(rename_all = "camelCase")]
    StorageRecovered {
        flushed: usize,
        still_pending: usize,
    },
}
