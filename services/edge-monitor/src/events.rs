//! Supervision events emitted by running monitors.
//!
//! Every monitor sends its events into one unbounded channel owned by the
//! orchestrator, so a slow consumer never blocks a node's pipeline.

use edge_monitor_id::NodeUuid;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::monitor::{LivenessState, MonitorKind, Revision};
use crate::node::NodeAddress;

/// Sending half of the supervision stream.
pub type EventSender = mpsc::UnboundedSender<MonitorEvent>;

/// Receiving half of the supervision stream.
pub type EventReceiver = mpsc::UnboundedReceiver<MonitorEvent>;

/// Something a monitor observed or did.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// A monitor task was launched.
    MonitorStarted { node: NodeUuid, kind: MonitorKind },

    /// A monitor task was cancelled.
    MonitorStopped { node: NodeUuid },

    /// A monitor could not start (e.g. no telemetry device).
    MonitorFailed { node: NodeUuid, error: String },

    /// A liveness packet moved the node's state.
    LivenessChanged { node: NodeUuid, state: LivenessState },

    /// Desired and observed config differ and a reload is about to be sent.
    ConfigMismatch {
        node: NodeUuid,
        address: NodeAddress,
        desired: Revision,
        observed: Revision,
    },

    /// A reload command completed.
    ReloadSent { node: NodeUuid, address: NodeAddress },

    /// A reload command failed or timed out.
    ReloadFailed {
        node: NodeUuid,
        address: NodeAddress,
        error: String,
    },

    /// The config reconciler for a node terminated.
    ReconcilerStopped { node: NodeUuid, error: String },

    /// The node has been offline for another escalation interval.
    RestartRequested {
        node: NodeUuid,
        address: Option<NodeAddress>,
        sequence: u64,
    },
}

impl MonitorEvent {
    /// The node this event concerns.
    pub fn node(&self) -> NodeUuid {
        match self {
            Self::MonitorStarted { node, .. }
            | Self::MonitorStopped { node }
            | Self::MonitorFailed { node, .. }
            | Self::LivenessChanged { node, .. }
            | Self::ConfigMismatch { node, .. }
            | Self::ReloadSent { node, .. }
            | Self::ReloadFailed { node, .. }
            | Self::ReconcilerStopped { node, .. }
            | Self::RestartRequested { node, .. } => *node,
        }
    }

    /// Returns true for restart escalations.
    pub fn is_restart(&self) -> bool {
        matches!(self, Self::RestartRequested { .. })
    }
}

/// Write an event to the log at a level matching its severity.
pub fn log_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::MonitorFailed { node, error } => {
            error!(node = %node, error = %error, "Monitor failed");
        }
        MonitorEvent::ReconcilerStopped { node, error } => {
            warn!(node = %node, error = %error, "Config reconciler stopped");
        }
        MonitorEvent::ReloadFailed {
            node,
            address,
            error,
        } => {
            warn!(node = %node, address = %address, error = %error, "Reload request failed");
        }
        MonitorEvent::RestartRequested {
            node,
            address,
            sequence,
        } => {
            warn!(node = %node, address = ?address, sequence, "Node offline, restart requested");
        }
        other => {
            info!(node = %other.node(), event = ?other, "Supervision event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_monitor_id::Uuid;

    #[test]
    fn test_event_node_and_kind() {
        let node = NodeUuid::from_uuid(Uuid::from_u128(9)).unwrap();

        let restart = MonitorEvent::RestartRequested {
            node,
            address: None,
            sequence: 1,
        };
        assert_eq!(restart.node(), node);
        assert!(restart.is_restart());

        let stopped = MonitorEvent::MonitorStopped { node };
        assert_eq!(stopped.node(), node);
        assert!(!stopped.is_restart());
    }
}
