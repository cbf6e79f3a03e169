//! Config drift reconciliation for one edge agent.
//!
//! Merges three independently updating inputs:
//!
//! - the node's address (telemetry)
//! - the revision the agent reports as loaded (telemetry metric)
//! - the revision the config store holds for the node, re-queried on every
//!   coarse store change notification
//!
//! Whenever the inputs are complete and the two revisions differ, the node
//! is marked dirty in a [`TrailingThrottle`]. At the end of each throttle
//! window a reload command is sent if the node is still dirty. A new window
//! is not armed until the previous command completes.

use std::fmt;
use std::sync::Arc;

use edge_monitor_id::{AppUuid, NodeUuid, RevisionId, Uuid};
use edge_monitor_reconcile::{ConvergenceStatus, TrailingThrottle};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::MonitorSettings;
use crate::cmdesc::{CommandError, CommandEscalation, CommandRequest};
use crate::events::{EventSender, MonitorEvent};
use crate::node::NodeAddress;
use crate::store::{ConfigStore, StoreError};
use crate::telemetry::{DeviceHandle, MetricValue, CONFIG_REVISION_METRIC};

type QueryFuture = BoxFuture<'static, Result<Option<RevisionId>, StoreError>>;
type CommandFuture = BoxFuture<'static, (NodeAddress, Result<(), CommandError>)>;

/// A config revision with both sources' "no config" folded together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision {
    /// No config is loaded (agent) or stored (config store).
    Unconfigured,

    /// A concrete revision.
    Id(RevisionId),
}

impl Revision {
    /// Normalize a config store answer.
    pub fn from_store(revision: Option<RevisionId>) -> Self {
        revision.map_or(Self::Unconfigured, Self::Id)
    }

    /// Normalize the agent's published revision metric.
    ///
    /// The agent reports "no config" as the nil UUID. Null and values that
    /// are not UUIDs are treated the same way.
    pub fn from_metric(value: &MetricValue) -> Self {
        let uuid = match value {
            MetricValue::Uuid(uuid) => Some(*uuid),
            MetricValue::Text(text) => Uuid::try_parse(text.trim()).ok(),
            _ => None,
        };

        Self::from_store(uuid.and_then(RevisionId::from_uuid))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconfigured => f.write_str("none"),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}

/// Latest known inputs for one node. `None` means not yet received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigRevisionState {
    pub address: Option<NodeAddress>,
    pub desired: Option<Revision>,
    pub observed: Option<Revision>,
}

impl ConfigRevisionState {
    /// Record a store answer. Returns false if the desired revision did not
    /// change.
    pub fn set_desired(&mut self, revision: Option<RevisionId>) -> bool {
        let desired = Revision::from_store(revision);
        if self.desired == Some(desired) {
            return false;
        }
        self.desired = Some(desired);
        true
    }

    /// Record the agent's published metric.
    pub fn set_observed(&mut self, value: Option<&MetricValue>) {
        self.observed = value.map(Revision::from_metric);
    }

    /// Whether desired and observed differ, once every input is known.
    pub fn drift(&self) -> Option<bool> {
        match (&self.address, self.desired, self.observed) {
            (Some(_), Some(desired), Some(observed)) => Some(desired != observed),
            _ => None,
        }
    }

    /// Convergence status given whether a reload is outstanding.
    pub fn status(&self, reload_in_flight: bool) -> ConvergenceStatus {
        match self.drift() {
            None => ConvergenceStatus::Unknown,
            Some(false) => ConvergenceStatus::Converged,
            Some(true) if reload_in_flight => ConvergenceStatus::Converging,
            Some(true) => ConvergenceStatus::Diverged,
        }
    }
}

/// Reasons a reconciler stops.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// A desired-revision query failed.
    #[error("desired revision query failed: {0}")]
    Store(#[from] StoreError),

    /// The node's telemetry feeds closed.
    #[error("telemetry for node closed")]
    TelemetryClosed,
}

impl ReconcilerError {
    /// Split out store failures, handing every other error back.
    pub fn into_store(self) -> Result<StoreError, Self> {
        match self {
            Self::Store(err) => Ok(err),
            other => Err(other),
        }
    }
}

/// Config drift reconciler for one node.
pub struct ConfigReconciler {
    node: NodeUuid,
    device: Arc<dyn DeviceHandle>,
    store: Arc<dyn ConfigStore>,
    cmdesc: Arc<dyn CommandEscalation>,
    settings: MonitorSettings,
    events: EventSender,
}

impl ConfigReconciler {
    pub fn new(
        node: NodeUuid,
        device: Arc<dyn DeviceHandle>,
        store: Arc<dyn ConfigStore>,
        cmdesc: Arc<dyn CommandEscalation>,
        settings: MonitorSettings,
        events: EventSender,
    ) -> Self {
        Self {
            node,
            device,
            store,
            cmdesc,
            settings,
            events,
        }
    }

    /// Run until cancelled or until an input fails.
    ///
    /// Cancellation drops any pending window and any in-flight command
    /// future; a request already on the wire is not retracted.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ReconcilerError> {
        let app = self.settings.agent_config_app;

        let mut address_rx = self.device.address();
        let mut observed_rx = self.device.metric(CONFIG_REVISION_METRIC);
        let mut changes = self.store.changes(app);
        let mut changes_open = true;

        let mut state = ConfigRevisionState {
            address: address_rx.borrow_and_update().clone(),
            ..Default::default()
        };
        state.set_observed(observed_rx.borrow_and_update().as_ref());

        let mut throttle = TrailingThrottle::new(self.settings.reload_throttle);
        // Query immediately so existing drift is found without waiting for a change.
        let mut query: Option<QueryFuture> = Some(self.query(app));
        let mut command: Option<CommandFuture> = None;

        info!(node = %self.node, app = %app, "Config reconciler started");

        loop {
            let mut updated = false;

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(node = %self.node, "Config reconciler cancelled");
                    return Ok(());
                }

                (address, result) = poll_slot(&mut command) => {
                    command = None;
                    self.report_command(address, result);
                    throttle.complete(now());
                }

                result = poll_slot(&mut query) => {
                    query = None;
                    if state.set_desired(result?) {
                        updated = true;
                    } else {
                        debug!(node = %self.node, "Desired revision unchanged");
                    }
                }

                changed = address_rx.changed() => {
                    changed.map_err(|_| ReconcilerError::TelemetryClosed)?;
                    state.address = address_rx.borrow_and_update().clone();
                    updated = true;
                }

                changed = observed_rx.changed() => {
                    changed.map_err(|_| ReconcilerError::TelemetryClosed)?;
                    state.set_observed(observed_rx.borrow_and_update().as_ref());
                    updated = true;
                }

                notification = changes.next(), if changes_open => match notification {
                    Some(()) => {
                        debug!(node = %self.node, "Config store changed, re-querying revision");
                        // Replacing the slot abandons any query still outstanding.
                        query = Some(self.query(app));
                    }
                    None => {
                        changes_open = false;
                        warn!(node = %self.node, "Config store change stream ended");
                    }
                },

                _ = sleep_until(throttle.deadline()) => {
                    if throttle.poll(now()) {
                        match self.dispatch(&state) {
                            Some(fut) => command = Some(fut),
                            None => throttle.complete(now()),
                        }
                    }
                }
            }

            if updated {
                match state.drift() {
                    Some(true) => throttle.mark(now()),
                    Some(false) => throttle.clear(),
                    None => {}
                }

                debug!(
                    node = %self.node,
                    status = ?state.status(throttle.is_in_flight()),
                    desired = ?state.desired,
                    observed = ?state.observed,
                    "Config revision state updated"
                );
            }
        }
    }

    fn query(&self, app: AppUuid) -> QueryFuture {
        let store = Arc::clone(&self.store);
        let node = self.node;
        Box::pin(async move { store.get_revision(app, node).await })
    }

    /// Start a reload for the current mismatch, if there still is one.
    fn dispatch(&self, state: &ConfigRevisionState) -> Option<CommandFuture> {
        let (address, desired, observed) = match state {
            ConfigRevisionState {
                address: Some(address),
                desired: Some(desired),
                observed: Some(observed),
            } if desired != observed => (address.clone(), *desired, *observed),
            _ => return None,
        };

        debug!(
            node = %self.node,
            address = %address,
            desired = %desired,
            observed = %observed,
            "Config update"
        );
        let _ = self.events.send(MonitorEvent::ConfigMismatch {
            node: self.node,
            address: address.clone(),
            desired,
            observed,
        });

        let cmdesc = Arc::clone(&self.cmdesc);
        let timeout = self.settings.command_timeout;
        let request = CommandRequest::reload_config(address);

        Some(Box::pin(async move {
            let result = match tokio::time::timeout(timeout, cmdesc.send(&request)).await {
                Ok(result) => result,
                Err(_) => Err(CommandError::Timeout(timeout)),
            };
            (request.address, result)
        }))
    }

    fn report_command(&self, address: NodeAddress, result: Result<(), CommandError>) {
        let event = match result {
            Ok(()) => {
                debug!(node = %self.node, address = %address, "Sent reload request");
                MonitorEvent::ReloadSent {
                    node: self.node,
                    address,
                }
            }
            Err(err) => {
                debug!(node = %self.node, address = %address, error = %err, "Reload request failed");
                MonitorEvent::ReloadFailed {
                    node: self.node,
                    address,
                    error: err.to_string(),
                }
            }
        };
        let _ = self.events.send(event);
    }
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

async fn poll_slot<T>(slot: &mut Option<BoxFuture<'static, T>>) -> T {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn rev(n: u128) -> RevisionId {
        RevisionId::from_uuid(Uuid::from_u128(n)).unwrap()
    }

    #[rstest]
    #[case(MetricValue::Uuid(Uuid::nil()), Revision::Unconfigured)]
    #[case(MetricValue::Null, Revision::Unconfigured)]
    #[case(MetricValue::Text("not a uuid".into()), Revision::Unconfigured)]
    #[case(MetricValue::Bool(true), Revision::Unconfigured)]
    #[case(MetricValue::Uuid(Uuid::from_u128(7)), Revision::Id(rev(7)))]
    #[case(MetricValue::Text(Uuid::from_u128(7).to_string()), Revision::Id(rev(7)))]
    fn test_metric_normalization(#[case] value: MetricValue, #[case] expected: Revision) {
        assert_eq!(Revision::from_metric(&value), expected);
    }

    #[test]
    fn test_both_unconfigured_do_not_drift() {
        let mut state = ConfigRevisionState {
            address: Some(NodeAddress::new("Site", "Cell")),
            ..Default::default()
        };
        state.set_desired(None);
        state.set_observed(Some(&MetricValue::Uuid(Uuid::nil())));

        assert_eq!(state.drift(), Some(false));
        assert_eq!(state.status(false), ConvergenceStatus::Converged);
    }

    #[test]
    fn test_incomplete_state_is_unknown() {
        let mut state = ConfigRevisionState::default();
        state.set_desired(Some(rev(1)));
        state.set_observed(Some(&MetricValue::Uuid(Uuid::from_u128(2))));

        assert_eq!(state.drift(), None);
        assert_eq!(state.status(false), ConvergenceStatus::Unknown);
    }

    #[test]
    fn test_drift_status() {
        let mut state = ConfigRevisionState {
            address: Some(NodeAddress::new("Site", "Cell")),
            ..Default::default()
        };
        state.set_desired(Some(rev(1)));
        state.set_observed(Some(&MetricValue::Uuid(Uuid::from_u128(2))));

        assert_eq!(state.drift(), Some(true));
        assert_eq!(state.status(false), ConvergenceStatus::Diverged);
        assert_eq!(state.status(true), ConvergenceStatus::Converging);
    }

    #[test]
    fn test_set_desired_is_distinct_until_changed() {
        let mut state = ConfigRevisionState::default();

        assert!(state.set_desired(Some(rev(1))));
        assert!(!state.set_desired(Some(rev(1))));
        assert!(state.set_desired(None));
        assert!(!state.set_desired(None));
    }

    #[test]
    fn test_into_store_splits_kinds() {
        let store = ReconcilerError::Store(StoreError::Unavailable("down".into()));
        assert!(store.into_store().is_ok());

        let closed = ReconcilerError::TelemetryClosed;
        assert!(matches!(
            closed.into_store(),
            Err(ReconcilerError::TelemetryClosed)
        ));
    }

    #[test]
    fn test_revision_display() {
        assert_eq!(Revision::Unconfigured.to_string(), "none");
        assert_eq!(
            Revision::Id(rev(1)).to_string(),
            "00000000-0000-0000-0000-000000000001"
        );
    }
}
