//! Idle detection: input monitors, the Active/Idle state machine and the
//! sampling loop that drives it.

mod detector;
mod monitor;
mod source;

pub use detector::{IdleDetector, IdleEvent, IdleState};
pub use monitor::{IdleBackend, InputMonitor, InputTap, SystemIdleProbe};
pub use source::{IdleConfig, IdleSourceController};
