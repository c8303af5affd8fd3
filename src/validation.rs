//! Structural checks applied to every record before it reaches storage.

use chrono::{DateTime, Duration, Utc};
use log::warn;

use crate::error::ValidationError;
use crate::models::Activity;

pub const MAX_CONTEXT_ID_LEN: usize = 256;
pub const MAX_DISPLAY_NAME_LEN: usize = 512;
pub const CLOCK_SKEW_ALLOWANCE_SECS: i64 = 60;
pub const MAX_START_AGE_DAYS: i64 = 30;
pub const MAX_ACTIVITY_HOURS: i64 = 24;
pub const DURATION_TOLERANCE_MS: u64 = 2_000;

pub fn clock_skew_allowance() -> Duration {
    Duration::seconds(CLOCK_SKEW_ALLOWANCE_SECS)
}

pub fn max_activity_duration() -> Duration {
    Duration::hours(MAX_ACTIVITY_HOURS)
}

pub fn validate_activity(activity: &Activity, now: DateTime<Utc>) -> Result<(), ValidationError> {
    let context_id = activity.context_id.trim();
    if context_id.is_empty() {
        return Err(ValidationError::EmptyContextId);
    }
    if context_id.chars().count() > MAX_CONTEXT_ID_LEN {
        return Err(ValidationError::ContextIdTooLong {
            max: MAX_CONTEXT_ID_LEN,
        });
    }

    let display_name = activity.display_name.trim();
    if display_name.is_empty() {
        return Err(ValidationError::EmptyDisplayName);
    }
    if display_name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(ValidationError::DisplayNameTooLong {
            max: MAX_DISPLAY_NAME_LEN,
        });
    }

    let latest_allowed = now + clock_skew_allowance();
    if activity.start_time < now - Duration::days(MAX_START_AGE_DAYS) {
        return Err(ValidationError::StartTooOld(activity.start_time.to_rfc3339()));
    }
    if activity.start_time > latest_allowed {
        return Err(ValidationError::InFuture {
            field: "start time",
            value: activity.start_time.to_rfc3339(),
        });
    }

    // Open records carry the duration observed at their last heartbeat.
    let reference_end = match activity.end_time {
        Some(end) => {
            if end < activity.start_time {
                return Err(ValidationError::EndBeforeStart);
            }
            if end > latest_allowed {
                return Err(ValidationError::InFuture {
                    field: "end time",
                    value: end.to_rfc3339(),
                });
            }
            if end - activity.start_time > max_activity_duration() {
                return Err(ValidationError::DurationTooLong {
                    duration_ms: activity.duration_ms,
                    max_hours: MAX_ACTIVITY_HOURS,
                });
            }
            end
        }
        None => activity.updated_at.max(activity.start_time),
    };

    let expected_ms = activity.expected_duration_ms(reference_end);
    if activity.duration_ms.abs_diff(expected_ms) > DURATION_TOLERANCE_MS {
        return Err(ValidationError::DurationMismatch {
            stored_ms: activity.duration_ms,
            expected_ms,
        });
    }

    Ok(())
}

/// Corrects a session start that lies outside the plausible range.
///
/// Starts more than 30 days in the past or beyond the clock-skew allowance in
/// the future fall back to `now`.
pub fn plausible_start(at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if at > now + clock_skew_allowance() {
        warn!("Session start {} is in the future; using {}", at.to_rfc3339(), now.to_rfc3339());
        return now;
    }
    if at < now - Duration::days(MAX_START_AGE_DAYS) {
        warn!("Session start {} is implausibly old; using {}", at.to_rfc3339(), now.to_rfc3339());
        return now;
    }
    at
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CloseReason;

    fn closed(start: DateTime<Utc>, secs: i64) -> Activity {
        let mut activity = Activity::open("com.apple.Terminal", "Terminal", None, start);
        activity.close(start + Duration::seconds(secs), CloseReason::ContextSwitch);
        activity
    }

    #[test]
    fn accepts_well_formed_records() {
        let now = Utc::now();
        assert_eq!(validate_activity(&closed(now - Duration::hours(1), 600), now), Ok(()));

        let open = Activity::open("com.apple.Terminal", "Terminal", None, now);
        assert_eq!(validate_activity(&open, now), Ok(()));
    }

    #[test]
    fn rejects_blank_and_oversized_identifiers() {
        let now = Utc::now();
        let mut activity = closed(now - Duration::minutes(5), 60);
        activity.context_id = "   ".into();
        assert_eq!(validate_activity(&activity, now), Err(ValidationError::EmptyContextId));

        let mut activity = closed(now - Duration::minutes(5), 60);
        activity.display_name = "x".repeat(MAX_DISPLAY_NAME_LEN + 1);
        assert!(matches!(
            validate_activity(&activity, now),
            Err(ValidationError::DisplayNameTooLong { .. })
        ));
    }

    #[test]
    fn rejects_out_of_bounds_times() {
        let now = Utc::now();
        let old = closed(now - Duration::days(31), 60);
        assert!(matches!(validate_activity(&old, now), Err(ValidationError::StartTooOld(_))));

        let future = Activity::open("a", "A", None, now + Duration::minutes(5));
        assert!(matches!(
            validate_activity(&future, now),
            Err(ValidationError::InFuture { .. })
        ));

        let mut marathon = closed(now - Duration::hours(30), 60);
        marathon.end_time = Some(now - Duration::hours(1));
        marathon.recompute_duration(now);
        assert!(matches!(
            validate_activity(&marathon, now),
            Err(ValidationError::DurationTooLong { .. })
        ));
    }

    #[test]
    fn duration_must_match_timestamps_within_tolerance() {
        let now = Utc::now();
        let mut activity = closed(now - Duration::minutes(10), 120);
        activity.duration_ms += 1_500;
        assert_eq!(validate_activity(&activity, now), Ok(()));

        activity.duration_ms += 1_000;
        assert!(matches!(
            validate_activity(&activity, now),
            Err(ValidationError::DurationMismatch { .. })
        ));
    }

    #[test]
    fn plausible_start_falls_back_to_now() {
        let now = Utc::now();
        assert_eq!(plausible_start(now + Duration::seconds(30), now), now + Duration::seconds(30));
        assert_eq!(plausible_start(now + Duration::minutes(5), now), now);
        assert_eq!(plausible_start(now - Duration::days(45), now), now);
    }
}
