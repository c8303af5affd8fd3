//! The session state machine. Owns the single open activity.

use chrono::{DateTime, Utc};

use crate::context::ContextInfo;
use crate::models::{Activity, CloseReason, IdleWindow};
use crate::reconcile::apply_windows;
use crate::validation::{clock_skew_allowance, max_activity_duration, plausible_start};

/// Records produced by a context switch.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SwitchOutcome {
    /// The finalized previous session, already reconciled against idle time.
    pub closed: Vec<Activity>,
    pub opened: Option<Activity>,
}

impl SwitchOutcome {
    pub fn is_noop(&self) -> bool {
        self.closed.is_empty() && self.opened.is_none()
    }
}

#[derive(Debug, Default)]
pub struct SessionTracker {
    current: Option<Activity>,
    /// Idle windows that overlapped the open session, applied when it closes.
    deferred_windows: Vec<IdleWindow>,
    suppressed: bool,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_session(&self) -> Option<&Activity> {
        self.current.as_ref()
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Blocks new sessions until `resume` (the machine is going to sleep).
    pub fn suppress(&mut self) {
        self.suppressed = true;
    }

    pub fn resume(&mut self) {
        self.suppressed = false;
    }

    pub fn on_context_switch(
        &mut self,
        context: &ContextInfo,
        detail: Option<String>,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> SwitchOutcome {
        if self.suppressed {
            log::debug!(
                "Ignoring activation of {} while sessions are suppressed",
                context.context_id
            );
            return SwitchOutcome::default();
        }

        if self
            .current
            .as_ref()
            .is_some_and(|open| open.context_id == context.context_id)
        {
            return SwitchOutcome::default();
        }

        let at = plausible_start(at, now);
        let closed = self.close_current(at, CloseReason::ContextSwitch);

        let opened = Activity::open(
            context.context_id.clone(),
            context.display_name.clone(),
            detail,
            at,
        );
        self.current = Some(opened.clone());

        SwitchOutcome {
            closed,
            opened: Some(opened),
        }
    }

    /// Finalizes the open session without opening another. Returns nothing if
    /// no session is open.
    pub fn close_current(&mut self, at: DateTime<Utc>, reason: CloseReason) -> Vec<Activity> {
        let Some(mut activity) = self.current.take() else {
            return Vec::new();
        };

        if at < activity.start_time {
            let corrected = at - clock_skew_allowance();
            log::warn!(
                "Clock moved backwards for {}: close at {} precedes start {}; start moved to {}",
                activity.context_id,
                at.to_rfc3339(),
                activity.start_time.to_rfc3339(),
                corrected.to_rfc3339()
            );
            activity.start_time = corrected;
        }

        let latest_end = activity.start_time + max_activity_duration();
        let end = if at > latest_end {
            log::warn!(
                "Session for {} exceeded the maximum length; clamping end to {}",
                activity.context_id,
                latest_end.to_rfc3339()
            );
            latest_end
        } else {
            at
        };
        activity.close(end, reason);

        let windows = std::mem::take(&mut self.deferred_windows);
        apply_windows(activity, &windows)
    }

    /// Remembers `window` if it overlaps the open session. Returns whether it did.
    pub fn defer_idle_window(&mut self, window: IdleWindow, now: DateTime<Utc>) -> bool {
        let Some(open) = &self.current else {
            return false;
        };
        if !window.overlaps(open.start_time, now) || self.deferred_windows.contains(&window) {
            return false;
        }
        self.deferred_windows.push(window);
        true
    }

    /// Refreshes the open record's heartbeat, returning a copy to persist.
    pub fn heartbeat(&mut self, now: DateTime<Utc>) -> Option<Activity> {
        let open = self.current.as_mut()?;
        open.touch(now.max(open.start_time));
        Some(open.clone())
    }
}
