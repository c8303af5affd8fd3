//! Pure idle reconciliation: how one activity changes when an idle window is
//! discovered after the fact.

use chrono::{DateTime, Utc};

use crate::models::{Activity, IdleWindow};

/// How an activity overlaps an idle window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    /// No overlap, or the record was already flagged as idle.
    None,
    FullyInside,
    Spans,
    StartBoundary,
    EndBoundary,
}

/// The rewrite produced for one activity.
#[derive(Debug, Clone, PartialEq)]
pub enum Adjustment {
    MarkIdle(Activity),
    /// `head` keeps the original id; `tail` is a new record.
    Split { head: Activity, tail: Activity },
    TrimEnd(Activity),
    TrimStart(Activity),
}

impl Adjustment {
    pub fn into_records(self) -> Vec<Activity> {
        match self {
            Adjustment::MarkIdle(activity)
            | Adjustment::TrimEnd(activity)
            | Adjustment::TrimStart(activity) => vec![activity],
            Adjustment::Split { head, tail } => vec![head, tail],
        }
    }
}

/// Classifies `activity` against `window`, treating an open record as running until `now`.
///
/// Cases are checked in priority order so exactly one applies.
pub fn classify(activity: &Activity, window: &IdleWindow, now: DateTime<Utc>) -> Overlap {
    let idle_start = window.start;
    let idle_end = window.end();
    let start = activity.start_time;
    let end = activity.effective_end(now);

    if idle_end <= idle_start || !(start < idle_end && end > idle_start) {
        return Overlap::None;
    }

    if start >= idle_start && end <= idle_end {
        if activity.is_idle_time {
            return Overlap::None;
        }
        Overlap::FullyInside
    } else if start < idle_start && end > idle_end {
        Overlap::Spans
    } else if start < idle_start {
        Overlap::StartBoundary
    } else {
        Overlap::EndBoundary
    }
}

/// Computes the rewrite for a closed activity. Open activities are left alone.
pub fn reconcile(activity: &Activity, window: &IdleWindow) -> Option<Adjustment> {
    let end = activity.end_time?;

    match classify(activity, window, end) {
        Overlap::None => None,
        Overlap::FullyInside => {
            let mut flagged = activity.clone();
            flagged.is_idle_time = true;
            Some(Adjustment::MarkIdle(flagged))
        }
        Overlap::Spans => {
            let tail = activity.continuation(window.end(), end);
            let mut head = activity.clone();
            head.end_time = Some(window.start);
            head.recompute_duration(window.start);
            Some(Adjustment::Split { head, tail })
        }
        Overlap::StartBoundary => {
            let mut trimmed = activity.clone();
            trimmed.end_time = Some(window.start);
            trimmed.recompute_duration(window.start);
            Some(Adjustment::TrimEnd(trimmed))
        }
        Overlap::EndBoundary => {
            let mut trimmed = activity.clone();
            trimmed.start_time = window.end();
            trimmed.recompute_duration(end);
            Some(Adjustment::TrimStart(trimmed))
        }
    }
}

/// Applies every window to a closed activity, returning the resulting records
/// ordered by start time. The first record keeps the original id.
pub fn apply_windows(activity: Activity, windows: &[IdleWindow]) -> Vec<Activity> {
    let mut ordered = windows.to_vec();
    ordered.sort_by_key(|window| window.start);

    let mut records = vec![activity];
    for window in &ordered {
        records = records
            .into_iter()
            .flat_map(|record| match reconcile(&record, window) {
                Some(adjustment) => adjustment.into_records(),
                None => vec![record],
            })
            .collect();
    }
    records.sort_by_key(|record| record.start_time);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CloseReason;
    use chrono::Duration;

    fn base() -> DateTime<Utc> {
        Utc::now() - Duration::hours(2)
    }

    fn fixture(record: (i64, i64), idle: (i64, i64)) -> (Activity, IdleWindow) {
        let anchor = base();
        let mut activity = Activity::open(
            "com.apple.dt.Xcode",
            "Xcode",
            Some("Project.swift".into()),
            anchor + Duration::seconds(record.0),
        );
        activity.close(anchor + Duration::seconds(record.1), CloseReason::ContextSwitch);
        let window = IdleWindow::between(
            anchor + Duration::seconds(idle.0),
            anchor + Duration::seconds(idle.1),
        );
        (activity, window)
    }

    #[test]
    fn fully_inside_is_flagged_without_moving_times() {
        let (activity, window) = fixture((200, 300), (100, 400));
        let Some(Adjustment::MarkIdle(flagged)) = reconcile(&activity, &window) else {
            panic!("expected MarkIdle");
        };
        assert!(flagged.is_idle_time);
        assert_eq!(flagged.start_time, activity.start_time);
        assert_eq!(flagged.end_time, activity.end_time);
        assert_eq!(flagged.duration_ms, 100_000);
        assert_eq!(reconcile(&flagged, &window), None);
    }

    #[test]
    fn spanning_record_is_split_around_the_window() {
        let (activity, window) = fixture((0, 600), (200, 400));
        let Some(Adjustment::Split { head, tail }) = reconcile(&activity, &window) else {
            panic!("expected Split");
        };

        assert_eq!(head.id, activity.id);
        assert_eq!(head.end_time, Some(window.start));
        assert_eq!(head.duration_ms, 200_000);

        assert_ne!(tail.id, activity.id);
        assert_eq!(tail.start_time, window.end());
        assert_eq!(tail.end_time, activity.end_time);
        assert_eq!(tail.duration_ms, 200_000);
        assert_eq!(tail.context_detail, activity.context_detail);
        assert!(!tail.is_idle_time);

        assert_eq!(
            head.duration_ms + tail.duration_ms,
            activity.duration_ms - window.duration_ms
        );
    }

    #[test]
    fn boundary_overlaps_trim_one_end() {
        let (activity, window) = fixture((0, 250), (100, 400));
        let Some(Adjustment::TrimEnd(trimmed)) = reconcile(&activity, &window) else {
            panic!("expected TrimEnd");
        };
        assert_eq!(trimmed.end_time, Some(window.start));
        assert_eq!(trimmed.duration_ms, 100_000);

        let (activity, window) = fixture((300, 500), (100, 400));
        let Some(Adjustment::TrimStart(trimmed)) = reconcile(&activity, &window) else {
            panic!("expected TrimStart");
        };
        assert_eq!(trimmed.start_time, window.end());
        assert_eq!(trimmed.duration_ms, 100_000);
    }

    #[test]
    fn touching_records_do_not_overlap() {
        let (before, window) = fixture((0, 100), (100, 400));
        assert_eq!(classify(&before, &window, Utc::now()), Overlap::None);

        let (after, window) = fixture((400, 500), (100, 400));
        assert_eq!(classify(&after, &window, Utc::now()), Overlap::None);
    }

    #[test]
    fn open_records_are_never_rewritten() {
        let activity = Activity::open("a", "A", None, Utc::now() - Duration::minutes(20));
        let window = IdleWindow::new(Utc::now() - Duration::minutes(10), Duration::minutes(5));
        assert_eq!(classify(&activity, &window, Utc::now()), Overlap::Spans);
        assert_eq!(reconcile(&activity, &window), None);
    }

    #[test]
    fn applying_windows_twice_is_a_no_op() {
        let (activity, first) = fixture((0, 1_000), (100, 400));
        let second = IdleWindow::between(
            first.start + Duration::seconds(500),
            first.start + Duration::seconds(700),
        );
        let windows = [second, first];

        let once = apply_windows(activity.clone(), &windows);
        assert_eq!(once.len(), 3);
        assert_eq!(once[0].id, activity.id);
        let total: u64 = once.iter().map(|record| record.duration_ms).sum();
        assert_eq!(total, 1_000_000 - 300_000 - 200_000);

        let twice: Vec<Activity> = once
            .iter()
            .cloned()
            .flat_map(|record| apply_windows(record, &windows))
            .collect();
        assert_eq!(twice, once);
    }

    #[test]
    fn zero_length_windows_are_ignored() {
        let (activity, empty) = fixture((0, 600), (300, 300));
        assert_eq!(reconcile(&activity, &empty), None);
    }
}
