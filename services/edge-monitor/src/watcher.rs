//! Entity set watcher.
//!
//! Turns the cluster's node resources into the current [`EntitySet`] and
//! publishes it through a `watch` channel, so a new subscriber immediately
//! sees the latest snapshot. The watcher is the only writer.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use edge_monitor_id::NodeUuid;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::{ResourceFeed, WatchError};
use crate::node::{NodeDescriptor, NodeSpec, ResourceEvent, ResourceOp};

/// The nodes that should currently be monitored, unique by uuid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitySet {
    nodes: BTreeMap<NodeUuid, NodeDescriptor>,
}

impl EntitySet {
    /// Build a snapshot from resources keyed by name.
    ///
    /// Resources that do not parse are dropped with a warning. If two
    /// resources claim the same uuid, the one whose name sorts last wins.
    pub fn from_resources(resources: &BTreeMap<String, NodeSpec>) -> Self {
        let mut nodes = BTreeMap::new();

        for (name, spec) in resources {
            let descriptor = match spec.to_descriptor() {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    warn!(resource = %name, error = %err, "Ignoring node resource");
                    continue;
                }
            };

            if let Some(previous) = nodes.insert(descriptor.uuid, descriptor) {
                warn!(resource = %name, node = %previous.uuid, "Duplicate node uuid, later resource wins");
            }
        }

        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, uuid: &NodeUuid) -> bool {
        self.nodes.contains_key(uuid)
    }

    pub fn get(&self, uuid: &NodeUuid) -> Option<&NodeDescriptor> {
        self.nodes.get(uuid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.nodes.values()
    }

    /// The descriptors as a value set, for diffing.
    pub fn to_set(&self) -> BTreeSet<NodeDescriptor> {
        self.nodes.values().cloned().collect()
    }
}

impl FromIterator<NodeDescriptor> for EntitySet {
    fn from_iter<I: IntoIterator<Item = NodeDescriptor>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().map(|d| (d.uuid, d)).collect(),
        }
    }
}

/// Maintains the resource table and publishes entity set snapshots.
pub struct EntitySetWatcher {
    resources: BTreeMap<String, NodeSpec>,
    tx: watch::Sender<EntitySet>,
}

impl EntitySetWatcher {
    /// Create a watcher publishing an empty set.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(EntitySet::default());
        Self {
            resources: BTreeMap::new(),
            tx,
        }
    }

    /// Subscribe to snapshots. The receiver sees the current set at once.
    pub fn subscribe(&self) -> watch::Receiver<EntitySet> {
        self.tx.subscribe()
    }

    /// The current snapshot.
    pub fn current(&self) -> EntitySet {
        self.tx.borrow().clone()
    }

    /// Apply one notification and republish the full set.
    ///
    /// Subscribers are only woken if the set actually changed.
    pub fn apply(&mut self, event: ResourceEvent) {
        let name = event.resource.name;
        match event.op {
            ResourceOp::Add | ResourceOp::Update => {
                self.resources.insert(name, event.resource.spec);
            }
            ResourceOp::Delete => {
                self.resources.remove(&name);
            }
        }

        let next = EntitySet::from_resources(&self.resources);
        let changed = self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        debug!(
            resources = self.resources.len(),
            changed,
            "Resource notification applied"
        );
    }

    /// Consume the feed until cancelled.
    ///
    /// Any feed error, including the feed ending, stops the watcher and is
    /// returned; resumption is the feed's responsibility.
    pub async fn run(
        &mut self,
        feed: &dyn ResourceFeed,
        cancel: CancellationToken,
    ) -> Result<(), WatchError> {
        let mut stream = feed.watch().await?;
        info!("Entity set watch started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Entity set watcher shutting down");
                    return Ok(());
                }

                item = stream.next() => match item {
                    Some(Ok(event)) => self.apply(event),
                    Some(Err(err)) => return Err(err),
                    None => return Err(WatchError::Closed),
                },
            }
        }
    }

    /// Run in a background task, handing a failure to `on_error`.
    pub fn spawn<F>(
        mut self,
        feed: Arc<dyn ResourceFeed>,
        cancel: CancellationToken,
        on_error: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(WatchError) + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(err) = self.run(&*feed, cancel).await {
                warn!(error = %err, "Entity set watch failed");
                on_error(err);
            }
        })
    }
}

impl Default for EntitySetWatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeResource;

    const A: &str = "11111111-1111-4111-8111-111111111111";
    const B: &str = "22222222-2222-4222-8222-222222222222";

    fn resource(name: &str, uuid: Option<&str>, agent: bool) -> NodeResource {
        NodeResource {
            name: name.to_string(),
            spec: NodeSpec {
                uuid: uuid.map(str::to_string),
                address: None,
                edge_agent: agent,
            },
        }
    }

    #[test]
    fn test_malformed_resources_are_dropped() {
        let mut watcher = EntitySetWatcher::new();
        watcher.apply(ResourceEvent::add(resource("good", Some(A), true)));
        watcher.apply(ResourceEvent::add(resource("no-uuid", None, true)));
        watcher.apply(ResourceEvent::add(resource("bad-uuid", Some("xyz"), true)));

        let set = watcher.current();
        assert_eq!(set.len(), 1);
        assert!(set.contains(&A.parse().unwrap()));
    }

    #[test]
    fn test_update_and_delete() {
        let mut watcher = EntitySetWatcher::new();
        watcher.apply(ResourceEvent::add(resource("a", Some(A), false)));
        watcher.apply(ResourceEvent::update(resource("a", Some(A), true)));

        let node = A.parse().unwrap();
        assert!(watcher.current().get(&node).unwrap().is_agent_kind);

        watcher.apply(ResourceEvent::delete(resource("a", Some(A), true)));
        assert!(watcher.current().is_empty());
    }

    #[test]
    fn test_duplicate_uuid_last_name_wins() {
        let mut resources = BTreeMap::new();
        resources.insert("a".to_string(), resource("a", Some(B), false).spec);
        resources.insert("z".to_string(), resource("z", Some(B), true).spec);

        let set = EntitySet::from_resources(&resources);
        assert_eq!(set.len(), 1);
        assert!(set.get(&B.parse().unwrap()).unwrap().is_agent_kind);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_latest() {
        let mut watcher = EntitySetWatcher::new();
        watcher.apply(ResourceEvent::add(resource("a", Some(A), true)));
        watcher.apply(ResourceEvent::add(resource("b", Some(B), true)));

        let rx = watcher.subscribe();
        assert_eq!(rx.borrow().len(), 2);
    }

    #[tokio::test]
    async fn test_identical_recompute_does_not_notify() {
        let mut watcher = EntitySetWatcher::new();
        watcher.apply(ResourceEvent::add(resource("a", Some(A), true)));

        let mut rx = watcher.subscribe();
        watcher.apply(ResourceEvent::update(resource("a", Some(A), true)));
        assert!(!rx.has_changed().unwrap());

        watcher.apply(ResourceEvent::add(resource("b", Some(B), true)));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 2);
    }
}
