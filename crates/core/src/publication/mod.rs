//! Publication reconciliation: exact episode-to-feed membership surgery.

mod reconciler;

pub use reconciler::{PublicationReconciler, ReconcileError, ReconcileOutcome};
