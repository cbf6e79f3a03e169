//! In-memory collaborators.
//!
//! Used by the binary until a real telemetry transport is wired in, and by
//! the tests to drive monitors deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use edge_monitor_id::{AppUuid, NodeUuid, RevisionId};
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::cluster::{ResourceFeed, ResourceStream, WatchError};
use crate::cmdesc::{CommandError, CommandEscalation, CommandRequest};
use crate::node::{NodeAddress, NodeDescriptor, ResourceEvent};
use crate::store::{ConfigStore, StoreError};
use crate::telemetry::{DeviceHandle, MetricValue, PacketType, Telemetry, TelemetryError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Device whose feeds are driven by hand.
pub struct MockDevice {
    address: Mutex<Option<watch::Sender<Option<NodeAddress>>>>,
    metrics: Mutex<HashMap<String, watch::Sender<Option<MetricValue>>>>,
    packets: Mutex<Vec<mpsc::UnboundedSender<PacketType>>>,
    disconnected: Mutex<bool>,
}

impl MockDevice {
    pub fn new() -> Self {
        let (address, _) = watch::channel(None);
        Self {
            address: Mutex::new(Some(address)),
            metrics: Mutex::new(HashMap::new()),
            packets: Mutex::new(Vec::new()),
            disconnected: Mutex::new(false),
        }
    }

    /// Publish the node's address.
    pub fn set_address(&self, address: Option<NodeAddress>) {
        if let Some(tx) = lock(&self.address).as_ref() {
            tx.send_replace(address);
        }
    }

    /// The last published address.
    pub fn current_address(&self) -> Option<NodeAddress> {
        lock(&self.address).as_ref().and_then(|tx| tx.borrow().clone())
    }

    /// Drop every feed, as if the transport lost the device.
    ///
    /// Existing receivers see their channels close. Later subscriptions
    /// are closed from the start.
    pub fn disconnect(&self) {
        lock(&self.address).take();
        lock(&self.metrics).clear();
        lock(&self.packets).clear();
        *lock(&self.disconnected) = true;
    }

    /// Publish a metric value. Receivers are notified even if it is unchanged.
    pub fn publish_metric(&self, name: &str, value: MetricValue) {
        self.metric_sender(name, |tx| {
            tx.send_replace(Some(value));
        });
    }

    /// Deliver a packet to every current packet subscriber.
    pub fn publish_packet(&self, packet: PacketType) {
        lock(&self.packets).retain(|tx| tx.send(packet).is_ok());
    }

    /// End every packet stream handed out so far.
    pub fn close_packets(&self) {
        lock(&self.packets).clear();
    }

    fn metric_sender<R>(
        &self,
        name: &str,
        f: impl FnOnce(&watch::Sender<Option<MetricValue>>) -> R,
    ) -> R {
        let mut metrics = lock(&self.metrics);
        let tx = metrics
            .entry(name.to_string())
            .or_insert_with(|| watch::channel(None).0);
        f(tx)
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceHandle for MockDevice {
    fn address(&self) -> watch::Receiver<Option<NodeAddress>> {
        match lock(&self.address).as_ref() {
            Some(tx) => tx.subscribe(),
            None => watch::channel(None).1,
        }
    }

    fn metric(&self, name: &str) -> watch::Receiver<Option<MetricValue>> {
        if *lock(&self.disconnected) {
            return watch::channel(None).1;
        }
        self.metric_sender(name, watch::Sender::subscribe)
    }

    fn packets(&self) -> BoxStream<'static, PacketType> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !*lock(&self.disconnected) {
            lock(&self.packets).push(tx);
        }
        UnboundedReceiverStream::new(rx).boxed()
    }
}

/// Telemetry handing out [`MockDevice`]s.
///
/// A device is created on first use. Its address is seeded from the node's
/// descriptor unless one was already published.
#[derive(Default)]
pub struct MockTelemetry {
    devices: Mutex<HashMap<NodeUuid, Arc<MockDevice>>>,
    unavailable: Mutex<HashSet<NodeUuid>>,
    acquisitions: Mutex<HashMap<NodeUuid, usize>>,
}

impl MockTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The device for a node, created if needed.
    pub fn device_for(&self, node: NodeUuid) -> Arc<MockDevice> {
        Arc::clone(lock(&self.devices).entry(node).or_default())
    }

    /// Make device lookups for `node` fail.
    pub fn set_unavailable(&self, node: NodeUuid) {
        lock(&self.unavailable).insert(node);
    }

    /// How many times a monitor acquired the node's device.
    pub fn acquisitions(&self, node: NodeUuid) -> usize {
        lock(&self.acquisitions).get(&node).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Telemetry for MockTelemetry {
    async fn device(&self, node: &NodeDescriptor) -> Result<Arc<dyn DeviceHandle>, TelemetryError> {
        if lock(&self.unavailable).contains(&node.uuid) {
            return Err(TelemetryError::NotFound(node.uuid));
        }

        let device = self.device_for(node.uuid);
        if device.current_address().is_none() && node.address.is_some() {
            device.set_address(node.address.clone());
        }
        *lock(&self.acquisitions).entry(node.uuid).or_default() += 1;

        Ok(device as Arc<dyn DeviceHandle>)
    }
}

/// Config store backed by a map.
#[derive(Default)]
pub struct MockConfigStore {
    revisions: Mutex<HashMap<NodeUuid, RevisionId>>,
    failing: Mutex<HashSet<NodeUuid>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<()>>>,
    queries: AtomicUsize,
}

impl MockConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or remove a node's stored revision. Does not notify.
    pub fn set_revision(&self, node: NodeUuid, revision: Option<RevisionId>) {
        let mut revisions = lock(&self.revisions);
        match revision {
            Some(revision) => revisions.insert(node, revision),
            None => revisions.remove(&node),
        };
    }

    /// Make queries for `node` fail.
    pub fn fail_node(&self, node: NodeUuid) {
        lock(&self.failing).insert(node);
    }

    /// Send a coarse change notification to every subscriber.
    pub fn notify_change(&self) {
        lock(&self.subscribers).retain(|tx| tx.send(()).is_ok());
    }

    /// Total revision queries served.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for MockConfigStore {
    fn changes(&self, _app: AppUuid) -> BoxStream<'static, ()> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        UnboundedReceiverStream::new(rx).boxed()
    }

    async fn get_revision(
        &self,
        _app: AppUuid,
        node: NodeUuid,
    ) -> Result<Option<RevisionId>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        if lock(&self.failing).contains(&node) {
            return Err(StoreError::Unavailable(format!("node {node} is failing")));
        }
        Ok(lock(&self.revisions).get(&node).copied())
    }
}

/// A command as received by [`RecordingEscalation`].
#[derive(Debug, Clone)]
pub struct SentCommand {
    pub at: tokio::time::Instant,
    pub request: CommandRequest,
}

/// Command escalation that records every request.
#[derive(Default)]
pub struct RecordingEscalation {
    sent: Mutex<Vec<SentCommand>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl RecordingEscalation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every following command.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold each command for `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    /// Every command received so far.
    pub fn sent(&self) -> Vec<SentCommand> {
        lock(&self.sent).clone()
    }

    pub fn count(&self) -> usize {
        lock(&self.sent).len()
    }
}

#[async_trait]
impl CommandEscalation for RecordingEscalation {
    async fn send(&self, request: &CommandRequest) -> Result<(), CommandError> {
        lock(&self.sent).push(SentCommand {
            at: tokio::time::Instant::now(),
            request: request.clone(),
        });

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(CommandError::Rejected {
                status: 503,
                body: "escalation unavailable".to_string(),
            });
        }
        Ok(())
    }
}

/// Resource feed driven through a channel. It can be watched once.
pub struct ChannelResourceFeed {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Result<ResourceEvent, WatchError>>>>,
}

impl ChannelResourceFeed {
    pub fn new() -> (Self, mpsc::UnboundedSender<Result<ResourceEvent, WatchError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl ResourceFeed for ChannelResourceFeed {
    async fn watch(&self) -> Result<ResourceStream, WatchError> {
        let rx = lock(&self.rx)
            .take()
            .ok_or_else(|| WatchError::Connect("feed already watched".to_string()))?;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_monitor_id::Uuid;

    fn node(n: u128) -> NodeDescriptor {
        NodeDescriptor {
            uuid: NodeUuid::from_uuid(Uuid::from_u128(n)).unwrap(),
            address: Some(NodeAddress::new("Site", format!("Cell{n}"))),
            is_agent_kind: true,
        }
    }

    #[tokio::test]
    async fn test_telemetry_seeds_address_from_descriptor() {
        let telemetry = MockTelemetry::new();
        let desc = node(1);

        let device = telemetry.device(&desc).await.unwrap();
        assert_eq!(*device.address().borrow(), desc.address);
        assert_eq!(telemetry.acquisitions(desc.uuid), 1);
    }

    #[tokio::test]
    async fn test_published_address_is_kept() {
        let telemetry = MockTelemetry::new();
        let desc = node(1);
        let published = NodeAddress::new("Other", "Place");
        telemetry.device_for(desc.uuid).set_address(Some(published.clone()));

        let device = telemetry.device(&desc).await.unwrap();
        assert_eq!(*device.address().borrow(), Some(published));
    }

    #[tokio::test]
    async fn test_unavailable_device() {
        let telemetry = MockTelemetry::new();
        let desc = node(2);
        telemetry.set_unavailable(desc.uuid);

        assert!(matches!(
            telemetry.device(&desc).await,
            Err(TelemetryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_packets_fan_out() {
        let device = MockDevice::new();
        let mut first = device.packets();
        let mut second = device.packets();

        device.publish_packet(PacketType::Death);
        assert_eq!(first.next().await, Some(PacketType::Death));
        assert_eq!(second.next().await, Some(PacketType::Death));

        device.close_packets();
        assert_eq!(first.next().await, None);
    }

    #[tokio::test]
    async fn test_disconnect_closes_feeds() {
        let device = MockDevice::new();
        device.set_address(Some(NodeAddress::new("Site", "Cell")));
        let mut address = device.address();
        let mut metric = device.metric("Config_Revision");
        let mut packets = device.packets();

        device.disconnect();

        assert!(address.changed().await.is_err());
        assert!(metric.changed().await.is_err());
        assert_eq!(packets.next().await, None);
        assert!(device.current_address().is_none());
        assert!(device.address().changed().await.is_err());
    }

    #[tokio::test]
    async fn test_feed_watches_once() {
        let (feed, _tx) = ChannelResourceFeed::new();
        assert!(feed.watch().await.is_ok());
        assert!(matches!(feed.watch().await, Err(WatchError::Connect(_))));
    }
}
