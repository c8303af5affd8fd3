mod algorithm;
mod reconciler;

pub use algorithm::{apply_windows, classify, reconcile, Adjustment, Overlap};
pub use reconciler::{IdleReconciler, ReconcileReport};
