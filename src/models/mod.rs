pub mod activity;
pub mod health;

pub use activity::{Activity, CloseReason, IdleWindow};
pub use health::HealthSnapshot;
