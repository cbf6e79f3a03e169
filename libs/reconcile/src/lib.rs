//! Reconciliation primitives.
//!
//! This library provides the runtime-free building blocks the edge monitor
//! composes into per-node reconciliation loops:
//!
//! - **Set diffing**: turn successive snapshots of a desired set into
//!   `Start`/`Stop` lifecycle events ([`DiffEngine`]).
//! - **Trailing throttle**: coalesce repeated triggers into at most one
//!   action per window, never overlapping an in-flight action
//!   ([`TrailingThrottle`]).
//! - **Selective recovery**: recover from one anticipated error kind while
//!   letting everything else propagate ([`catch_kind`]).
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same inputs
//! - Nothing here owns a clock; callers pass `Instant`s in

mod diff;
mod recover;
mod throttle;

use std::time::Duration;

pub use diff::{diff_sets, DiffEngine, LifecycleEvent};
pub use recover::{catch_kind, classify, Outcome};
pub use throttle::TrailingThrottle;

/// Convergence status for a reconciled resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Current matches desired.
    Converged,

    /// A corrective action is in flight.
    Converging,

    /// Current differs from desired and nothing is in flight.
    Diverged,

    /// Status is unknown (insufficient data).
    Unknown,
}

impl ConvergenceStatus {
    /// Returns true if the resource has converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }

    /// Returns true if a corrective action is outstanding.
    pub fn is_converging(&self) -> bool {
        matches!(self, Self::Converging)
    }
}

/// Default throttle window between corrective actions for one resource.
pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convergence_status_predicates() {
        assert!(ConvergenceStatus::Converged.is_converged());
        assert!(!ConvergenceStatus::Diverged.is_converged());
        assert!(ConvergenceStatus::Converging.is_converging());
        assert!(!ConvergenceStatus::Unknown.is_converging());
    }
}
