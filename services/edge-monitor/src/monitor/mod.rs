//! Per-node monitors.
//!
//! A monitor owns everything the supervisor does for one node. Which
//! pipelines it runs depends on the node kind:
//!
//! ```text
//! NodeMonitor::Agent
//! ├── ConfigReconciler   (desired vs observed revision, reload on drift)
//! └── OfflineEscalator   (restart requests while offline)
//!
//! NodeMonitor::Plain
//! └── OfflineEscalator   (observe only, liveness transitions)
//! ```
//!
//! Both pipelines of an agent run concurrently inside the monitor's single
//! task, so a node's state is only ever touched by one task. The reconciler
//! stopping does not stop the escalator.

mod escalator;
mod reconciler;

use std::sync::Arc;
use std::time::Duration;

use edge_monitor_id::AppUuid;
use edge_monitor_reconcile::{catch_kind, DEFAULT_THROTTLE_WINDOW};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use escalator::{LivenessState, LivenessTracker, OfflineEscalator};
pub use reconciler::{ConfigReconciler, ConfigRevisionState, ReconcilerError, Revision};

use crate::cmdesc::CommandEscalation;
use crate::events::{EventSender, MonitorEvent};
use crate::node::NodeDescriptor;
use crate::store::ConfigStore;
use crate::telemetry::{DeviceHandle, Telemetry};

/// Default interval between restart requests for an offline node.
pub const DEFAULT_OFFLINE_INTERVAL: Duration = Duration::from_secs(10);

/// Default bound on a single command dispatch.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Timing and addressing shared by every monitor.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Config store application holding agent configs.
    pub agent_config_app: AppUuid,

    /// Minimum spacing between reload commands to one node.
    pub reload_throttle: Duration,

    /// Spacing between restart requests while offline.
    pub offline_interval: Duration,

    /// Bound on a single command dispatch.
    pub command_timeout: Duration,
}

impl MonitorSettings {
    /// Settings with default timings.
    pub fn new(agent_config_app: AppUuid) -> Self {
        Self {
            agent_config_app,
            reload_throttle: DEFAULT_THROTTLE_WINDOW,
            offline_interval: DEFAULT_OFFLINE_INTERVAL,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// Collaborators shared by every monitor.
#[derive(Clone)]
pub struct MonitorDeps {
    pub telemetry: Arc<dyn Telemetry>,
    pub store: Arc<dyn ConfigStore>,
    pub cmdesc: Arc<dyn CommandEscalation>,
    pub settings: MonitorSettings,
}

/// Which monitor variant a node gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorKind {
    /// Edge agent: config reconciliation and offline escalation.
    Agent,
    /// Plain node: liveness observation only.
    Plain,
}

impl MonitorKind {
    pub fn for_node(node: &NodeDescriptor) -> Self {
        if node.is_agent_kind {
            Self::Agent
        } else {
            Self::Plain
        }
    }
}

/// A monitor for one node, ready to run.
pub enum NodeMonitor {
    Agent(AgentMonitor),
    Plain(PlainMonitor),
}

impl NodeMonitor {
    /// Build the variant matching the node kind.
    pub fn new(node: NodeDescriptor, deps: MonitorDeps) -> Self {
        match MonitorKind::for_node(&node) {
            MonitorKind::Agent => Self::Agent(AgentMonitor { node, deps }),
            MonitorKind::Plain => Self::Plain(PlainMonitor {
                node,
                telemetry: deps.telemetry,
            }),
        }
    }

    pub fn kind(&self) -> MonitorKind {
        match self {
            Self::Agent(_) => MonitorKind::Agent,
            Self::Plain(_) => MonitorKind::Plain,
        }
    }

    pub fn node(&self) -> &NodeDescriptor {
        match self {
            Self::Agent(m) => &m.node,
            Self::Plain(m) => &m.node,
        }
    }

    /// Run until cancelled.
    pub async fn run(self, events: EventSender, cancel: CancellationToken) {
        match self {
            Self::Agent(monitor) => monitor.run(events, cancel).await,
            Self::Plain(monitor) => monitor.run(events, cancel).await,
        }
    }
}

/// Monitor for an edge agent.
pub struct AgentMonitor {
    node: NodeDescriptor,
    deps: MonitorDeps,
}

impl AgentMonitor {
    async fn run(self, events: EventSender, cancel: CancellationToken) {
        let uuid = self.node.uuid;
        let Some(device) = acquire_device(&*self.deps.telemetry, &self.node, &events, &cancel).await
        else {
            return;
        };

        let reconciler = ConfigReconciler::new(
            uuid,
            Arc::clone(&device),
            Arc::clone(&self.deps.store),
            Arc::clone(&self.deps.cmdesc),
            self.deps.settings.clone(),
            events.clone(),
        );
        let escalator = OfflineEscalator::new(
            uuid,
            Arc::clone(&device),
            self.deps.settings.offline_interval,
            events.clone(),
        );

        // A failed store query ends reconciliation for this node only. Any
        // other failure is reported as soon as it happens, while the
        // escalator keeps running.
        let reconcile = async {
            let result = catch_kind(
                reconciler.run(cancel.clone()),
                ReconcilerError::into_store,
                |err| {
                    debug!(node = %uuid, error = %err, "Desired revision query failed");
                    let _ = events.send(MonitorEvent::ReconcilerStopped {
                        node: uuid,
                        error: ReconcilerError::Store(err).to_string(),
                    });
                    std::future::ready(Ok(()))
                },
            )
            .await;

            if let Err(err) = result {
                debug!(node = %uuid, error = %err, "Config reconciler failed");
                let _ = events.send(MonitorEvent::ReconcilerStopped {
                    node: uuid,
                    error: err.to_string(),
                });
            }
        };

        tokio::join!(reconcile, escalator.run(cancel.clone()));

        debug!(node = %uuid, "Agent monitor finished");
    }
}

/// Monitor for a plain node.
pub struct PlainMonitor {
    node: NodeDescriptor,
    telemetry: Arc<dyn Telemetry>,
}

impl PlainMonitor {
    async fn run(self, events: EventSender, cancel: CancellationToken) {
        let Some(device) = acquire_device(&*self.telemetry, &self.node, &events, &cancel).await
        else {
            return;
        };

        OfflineEscalator::observe_only(self.node.uuid, device, events)
            .run(cancel)
            .await;

        debug!(node = %self.node.uuid, "Plain monitor finished");
    }
}

async fn acquire_device(
    telemetry: &dyn Telemetry,
    node: &NodeDescriptor,
    events: &EventSender,
    cancel: &CancellationToken,
) -> Option<Arc<dyn DeviceHandle>> {
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return None,
        result = telemetry.device(node) => result,
    };

    match result {
        Ok(device) => {
            info!(node = %node.uuid, address = ?node.address, "Telemetry device acquired");
            Some(device)
        }
        Err(err) => {
            debug!(node = %node.uuid, error = %err, "Failed to acquire telemetry device");
            let _ = events.send(MonitorEvent::MonitorFailed {
                node: node.uuid,
                error: err.to_string(),
            });
            None
        }
    }
}
