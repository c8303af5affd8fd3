//! Retry, circuit breaking and offline queueing in front of an `ActivityStore`.

mod layer;
mod writer;

pub use layer::{PersistenceConfig, PersistenceLayer, PersistenceStatus, SaveOutcome};
pub use writer::SaveWriter;
