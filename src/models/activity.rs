//! Activity data model.
//!
//! An `Activity` is one continuous stretch of engagement with a single
//! application context. The engine keeps at most one of them open
//! (`end_time == None`) at any instant.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CloseReason {
    ContextSwitch,
    Sleep,
    Shutdown,
    /// Closed at startup after the process died with the session open.
    Recovered,
    /// Closed because another open record was written to storage.
    Superseded,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ContextSwitch => "ContextSwitch",
            CloseReason::Sleep => "Sleep",
            CloseReason::Shutdown => "Shutdown",
            CloseReason::Recovered => "Recovered",
            CloseReason::Superseded => "Superseded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ContextSwitch" => Some(CloseReason::ContextSwitch),
            "Sleep" => Some(CloseReason::Sleep),
            "Shutdown" => Some(CloseReason::Shutdown),
            "Recovered" => Some(CloseReason::Recovered),
            "Superseded" => Some(CloseReason::Superseded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub context_id: String,
    pub display_name: String,
    pub context_detail: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub is_idle_time: bool,
    pub close_reason: Option<CloseReason>,
    /// Last instant this record was known to be accurate (heartbeat or close).
    pub updated_at: DateTime<Utc>,
}

impl Activity {
    pub fn open(
        context_id: impl Into<String>,
        display_name: impl Into<String>,
        context_detail: Option<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            context_id: context_id.into(),
            display_name: display_name.into(),
            context_detail,
            start_time,
            end_time: None,
            duration_ms: 0,
            is_idle_time: false,
            close_reason: None,
            updated_at: start_time,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// End of the record, treating an open record as running until `now`.
    pub fn effective_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.end_time.unwrap_or(now)
    }

    /// Duration implied by the timestamps, clamped at zero.
    pub fn expected_duration_ms(&self, now: DateTime<Utc>) -> u64 {
        non_negative_ms(self.effective_end(now) - self.start_time)
    }

    pub fn recompute_duration(&mut self, now: DateTime<Utc>) {
        self.duration_ms = self.expected_duration_ms(now);
    }

    pub fn close(&mut self, at: DateTime<Utc>, reason: CloseReason) {
        self.end_time = Some(at);
        self.close_reason = Some(reason);
        self.updated_at = at;
        self.recompute_duration(at);
    }

    /// Refreshes `updated_at` and the running duration of an open record.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if self.is_open() {
            self.updated_at = now;
            self.recompute_duration(now);
        }
    }

    /// A fresh closed record covering `[start, end)` with this record's context.
    pub fn continuation(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let mut tail = Self {
            id: Uuid::new_v4().to_string(),
            context_id: self.context_id.clone(),
            display_name: self.display_name.clone(),
            context_detail: self.context_detail.clone(),
            start_time: start,
            end_time: Some(end),
            duration_ms: 0,
            is_idle_time: false,
            close_reason: self.close_reason,
            updated_at: self.updated_at.max(end),
        };
        tail.recompute_duration(end);
        tail
    }
}

/// A stretch of time with no qualifying user input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IdleWindow {
    pub start: DateTime<Utc>,
    pub duration_ms: u64,
}

impl IdleWindow {
    pub fn new(start: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            start,
            duration_ms: non_negative_ms(duration),
        }
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::new(start, end - start)
    }

    pub fn duration(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.duration_ms).unwrap_or(i64::MAX))
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration()
    }

    /// Whether `[start, end)` intersects this window.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end() && end > self.start
    }
}

pub(crate) fn non_negative_ms(delta: Duration) -> u64 {
    u64::try_from(delta.num_milliseconds().max(0)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_computes_duration_and_clamps_negative() {
        let start = Utc::now();
        let mut activity = Activity::open("com.apple.Safari", "Safari", None, start);
        activity.close(start + Duration::seconds(90), CloseReason::ContextSwitch);
        assert_eq!(activity.duration_ms, 90_000);
        assert!(!activity.is_open());

        let mut backwards = Activity::open("com.apple.Safari", "Safari", None, start);
        backwards.close(start - Duration::seconds(5), CloseReason::ContextSwitch);
        assert_eq!(backwards.duration_ms, 0);
    }

    #[test]
    fn open_record_duration_runs_until_now() {
        let start = Utc::now() - Duration::seconds(30);
        let mut activity = Activity::open("com.microsoft.VSCode", "Code", None, start);
        activity.touch(start + Duration::seconds(30));
        assert_eq!(activity.duration_ms, 30_000);
        assert!(activity.is_open());
    }

    #[test]
    fn idle_window_end_and_overlap() {
        let start = Utc::now();
        let window = IdleWindow::new(start, Duration::seconds(300));
        assert_eq!(window.end(), start + Duration::seconds(300));
        assert!(window.overlaps(start - Duration::seconds(10), start + Duration::seconds(1)));
        assert!(!window.overlaps(start - Duration::seconds(10), start));
        assert!(!window.overlaps(window.end(), window.end() + Duration::seconds(5)));
    }

    #[test]
    fn close_reason_round_trips_through_text() {
        for reason in [
            CloseReason::ContextSwitch,
            CloseReason::Sleep,
            CloseReason::Shutdown,
            CloseReason::Recovered,
            CloseReason::Superseded,
        ] {
            assert_eq!(CloseReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(CloseReason::parse("Nope"), None);
    }
}
