//! CDC capture-instance reconciliation.
//!
//! [`transitions`] holds the single-unit state changes, each verified against
//! the catalog. [`CaptureReconciler`] runs them against named databases and
//! [`BulkReconciler`] replays the golden table set across a facility snapshot.

pub mod bulk;
pub mod reconciler;
pub mod statements;
pub mod transitions;
pub mod types;

pub use bulk::BulkReconciler;
pub use reconciler::CaptureReconciler;
pub use types::{CdcTableRef, TransitionOutcome};
