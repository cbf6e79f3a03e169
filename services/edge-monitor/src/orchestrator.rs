//! Monitor orchestrator - owns one monitor task per watched node.
//!
//! ## Supervision Tree
//!
//! ```text
//! EntitySetWatcher ── EntitySet ──> MonitorOrchestrator
//!                                   ├── NodeMonitor(uuid)
//!                                   ├── NodeMonitor(uuid)
//!                                   └── ...
//! ```
//!
//! Each snapshot from the watcher is diffed against the previous one. `Stop`
//! events cancel and drop the node's task, `Start` events spawn one. These
//! are the only places the task map changes, so there is never more than one
//! task per uuid.

use std::collections::HashMap;

use edge_monitor_id::NodeUuid;
use edge_monitor_reconcile::{DiffEngine, LifecycleEvent};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{EventReceiver, EventSender, MonitorEvent};
use crate::monitor::{MonitorDeps, MonitorKind, NodeMonitor};
use crate::node::NodeDescriptor;
use crate::watcher::EntitySet;

/// Handle to one running monitor task.
pub struct MonitorHandle {
    node: NodeDescriptor,
    kind: MonitorKind,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn node(&self) -> &NodeDescriptor {
        &self.node
    }

    pub fn kind(&self) -> MonitorKind {
        self.kind
    }

    /// Check if the task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the monitor. Its timers and pending futures are dropped
    /// without being polled again.
    fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Orchestrator for per-node monitors.
pub struct MonitorOrchestrator {
    /// Collaborators handed to every monitor.
    deps: MonitorDeps,

    /// Running monitors by node uuid.
    monitors: HashMap<NodeUuid, MonitorHandle>,

    /// Differ over entity set snapshots.
    diff: DiffEngine<NodeDescriptor>,

    /// Merged output of every monitor.
    events: EventSender,

    /// Parent of every monitor's cancellation token.
    shutdown: CancellationToken,
}

impl MonitorOrchestrator {
    /// Create an orchestrator and the receiving end of its event stream.
    pub fn new(deps: MonitorDeps, shutdown: CancellationToken) -> (Self, EventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();

        let orchestrator = Self {
            deps,
            monitors: HashMap::new(),
            diff: DiffEngine::new(),
            events,
            shutdown,
        };

        (orchestrator, rx)
    }

    /// Apply one entity set snapshot. Returns the number of lifecycle events
    /// it produced.
    pub fn apply_snapshot(&mut self, snapshot: &EntitySet) -> usize {
        let events = self.diff.advance(snapshot.to_set());
        let count = events.len();

        for event in events {
            self.apply(event);
        }

        debug!(
            lifecycle_events = count,
            monitors = self.monitors.len(),
            "Entity set applied"
        );
        count
    }

    /// Apply a single lifecycle event.
    pub fn apply(&mut self, event: LifecycleEvent<NodeDescriptor>) {
        match event {
            LifecycleEvent::Start(node) => self.start_monitor(node),
            LifecycleEvent::Stop(node) => self.stop_monitor(&node.uuid),
        }
    }

    fn start_monitor(&mut self, node: NodeDescriptor) {
        if self.monitors.contains_key(&node.uuid) {
            debug!(node = %node.uuid, "Monitor already running");
            return;
        }

        let monitor = NodeMonitor::new(node.clone(), self.deps.clone());
        let kind = monitor.kind();
        let cancel = self.shutdown.child_token();

        debug!(node = %node.uuid, kind = ?kind, address = ?node.address, "Starting monitor");

        let task = tokio::spawn(monitor.run(self.events.clone(), cancel.clone()));
        let _ = self.events.send(MonitorEvent::MonitorStarted {
            node: node.uuid,
            kind,
        });

        self.monitors.insert(
            node.uuid,
            MonitorHandle {
                node,
                kind,
                cancel,
                task,
            },
        );
    }

    fn stop_monitor(&mut self, uuid: &NodeUuid) {
        let Some(handle) = self.monitors.remove(uuid) else {
            debug!(node = %uuid, "Stop for unmonitored node");
            return;
        };

        debug!(node = %uuid, "Stopping monitor");
        handle.stop();
        let _ = self.events.send(MonitorEvent::MonitorStopped { node: *uuid });
    }

    /// Follow the watcher until shutdown or until the watcher goes away,
    /// then stop every monitor.
    pub async fn run(&mut self, mut entities: watch::Receiver<EntitySet>) {
        info!("Monitor orchestrator entering main loop");

        let shutdown = self.shutdown.clone();
        let initial = entities.borrow_and_update().clone();
        self.apply_snapshot(&initial);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Monitor orchestrator received shutdown signal");
                    break;
                }

                changed = entities.changed() => {
                    if changed.is_err() {
                        warn!("Entity set watcher closed");
                        break;
                    }
                    let snapshot = entities.borrow_and_update().clone();
                    self.apply_snapshot(&snapshot);
                }
            }
        }

        self.stop_all();
    }

    /// Stop every running monitor.
    pub fn stop_all(&mut self) {
        info!(count = self.monitors.len(), "Stopping all monitors");

        let uuids: Vec<NodeUuid> = self.monitors.keys().copied().collect();
        for uuid in uuids {
            self.stop_monitor(&uuid);
        }
        self.diff = DiffEngine::new();
    }

    /// Number of monitors in the task map.
    pub fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    /// Number of monitor tasks that have not finished.
    pub fn running_count(&self) -> usize {
        self.monitors.values().filter(|m| m.is_running()).count()
    }

    /// The handle for a node, if it is monitored.
    pub fn monitor(&self, uuid: &NodeUuid) -> Option<&MonitorHandle> {
        self.monitors.get(uuid)
    }
}

impl Drop for MonitorOrchestrator {
    fn drop(&mut self) {
        for (_, handle) in self.monitors.drain() {
            handle.stop();
        }
    }
}
