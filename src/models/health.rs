use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only diagnostics view assembled on demand; never a source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub storage_available: bool,
    pub consecutive_failures: u32,
    pub pending_count: usize,
    pub last_successful_save: Option<DateTime<Utc>>,
    pub current_context_id: Option<String>,
    pub idle_monitoring: bool,
}
