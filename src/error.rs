use thiserror::Error;

/// A record that is structurally unfit for storage. Retrying cannot fix it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("context id is empty")]
    EmptyContextId,

    #[error("context id exceeds {max} characters")]
    ContextIdTooLong { max: usize },

    #[error("display name is empty")]
    EmptyDisplayName,

    #[error("display name exceeds {max} characters")]
    DisplayNameTooLong { max: usize },

    #[error("start time {0} is implausibly old")]
    StartTooOld(String),

    #[error("{field} {value} is in the future")]
    InFuture { field: &'static str, value: String },

    #[error("end time precedes start time")]
    EndBeforeStart,

    #[error("duration {duration_ms}ms exceeds the {max_hours}h limit")]
    DurationTooLong { duration_ms: u64, max_hours: i64 },

    #[error("stored duration {stored_ms}ms disagrees with timestamps ({expected_ms}ms)")]
    DurationMismatch { stored_ms: u64, expected_ms: u64 },
}

/// Failure reported by an `ActivityStore`, classified by whether a retry can help.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("storage busy: {0}")]
    Busy(String),

    #[error("storage locked: {0}")]
    Locked(String),

    #[error("storage full: {0}")]
    Full(String),

    #[error("storage failure: {0}")]
    Permanent(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Busy(_) | StorageError::Locked(_) | StorageError::Full(_)
        )
    }

    fn from_sqlite_code(code: rusqlite::ErrorCode, message: String) -> Self {
        use rusqlite::ErrorCode;

        match code {
            ErrorCode::DatabaseBusy => StorageError::Busy(message),
            ErrorCode::DatabaseLocked => StorageError::Locked(message),
            ErrorCode::DiskFull => StorageError::Full(message),
            _ => StorageError::Permanent(message),
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _) => {
                StorageError::from_sqlite_code(failure.code, err.to_string())
            }
            _ => StorageError::Permanent(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for StorageError {
    fn from(err: anyhow::Error) -> Self {
        // The database worker wraps rusqlite errors in anyhow; recover their kind.
        let message = format!("{err:#}");
        match err.downcast_ref::<rusqlite::Error>() {
            Some(rusqlite::Error::SqliteFailure(failure, _)) => {
                StorageError::from_sqlite_code(failure.code, message)
            }
            _ => StorageError::Permanent(message),
        }
    }
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("failed to load activities overlapping the idle window: {0}")]
    Fetch(#[source] StorageError),

    #[error("storage unavailable; idle window left unreconciled")]
    StorageUnavailable,
}

/// The input-monitoring primitive could not be used (missing tool or permission).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("input monitor unavailable: {0}")]
pub struct MonitorUnavailable(pub String);
