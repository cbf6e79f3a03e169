//! Telemetry collaborator interface.
//!
//! The monitor never speaks the pub/sub protocol itself. It asks a
//! [`Telemetry`] implementation for a [`DeviceHandle`] per node and consumes
//! three feeds from it: the node's current address, named metric values, and
//! the raw packet type sequence.

use std::sync::Arc;

use async_trait::async_trait;
use edge_monitor_id::{NodeUuid, Uuid};
use futures_util::stream::BoxStream;
use thiserror::Error;
use tokio::sync::watch;

use crate::node::{NodeAddress, NodeDescriptor};

/// Metric carrying the agent's loaded config revision.
pub const CONFIG_REVISION_METRIC: &str = "Config_Revision";

/// Packet types published by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// The node came online.
    Birth,
    /// The node went offline.
    Death,
    /// Metric update.
    Data,
    /// Command addressed to the node.
    Command,
}

/// Value of a published metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Null,
    Bool(bool),
    Text(String),
    Uuid(Uuid),
}

/// Errors acquiring telemetry for a node.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The transport has no device for this node.
    #[error("no telemetry device for node {0}")]
    NotFound(NodeUuid),
}

/// Live view of one node's telemetry.
///
/// `address` and `metric` are updating values: `None` means nothing has been
/// published yet. Every publish notifies receivers, even when the value is
/// unchanged.
pub trait DeviceHandle: Send + Sync {
    /// The node's current protocol address.
    fn address(&self) -> watch::Receiver<Option<NodeAddress>>;

    /// The latest value of a named metric.
    fn metric(&self, name: &str) -> watch::Receiver<Option<MetricValue>>;

    /// Packet types in arrival order, starting from subscription.
    fn packets(&self) -> BoxStream<'static, PacketType>;
}

/// Telemetry transport interface.
#[async_trait]
pub trait Telemetry: Send + Sync {
    /// Look up the device handle for a node.
    async fn device(&self, node: &NodeDescriptor) -> Result<Arc<dyn DeviceHandle>, TelemetryError>;
}
