//! Cluster resource feed interface and the file-backed feed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tracing::{debug, info};

use crate::node::{NodeResource, ResourceEvent};

/// Errors from the cluster resource feed.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The feed could not be established.
    #[error("failed to start resource watch: {0}")]
    Connect(String),

    /// The feed broke after it was established.
    #[error("resource watch failed: {0}")]
    Stream(String),

    /// The feed ended.
    #[error("resource watch closed")]
    Closed,

    /// Reading a resource source failed.
    #[error("failed to read resources: {0}")]
    Io(#[from] std::io::Error),

    /// A resource source did not decode.
    #[error("failed to decode resources: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Stream of resource notifications.
pub type ResourceStream = BoxStream<'static, Result<ResourceEvent, WatchError>>;

/// Source of cluster resource notifications.
///
/// Implementations own reconnection and resumption; a stream that yields an
/// error is considered failed.
#[async_trait]
pub trait ResourceFeed: Send + Sync {
    /// Start watching. The stream first replays the current resources.
    async fn watch(&self) -> Result<ResourceStream, WatchError>;
}

/// Feed that reads a fixed resource list from a JSON file.
///
/// Every listed resource is announced as an `Add`, then the stream stays
/// open without further changes.
#[derive(Debug, Clone)]
pub struct StaticResourceFeed {
    path: PathBuf,
}

impl StaticResourceFeed {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ResourceFeed for StaticResourceFeed {
    async fn watch(&self) -> Result<ResourceStream, WatchError> {
        debug!(path = %self.path.display(), "Loading node resources");

        let raw = tokio::fs::read(&self.path).await?;
        let resources: Vec<NodeResource> = serde_json::from_slice(&raw)?;

        info!(
            path = %self.path.display(),
            count = resources.len(),
            "Loaded node resources"
        );

        let adds = resources.into_iter().map(|r| Ok(ResourceEvent::add(r)));
        Ok(stream::iter(adds).chain(stream::pending()).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ResourceOp;
    use std::io::Write;

    #[tokio::test]
    async fn test_static_feed_replays_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"name": "a", "spec": {{"uuid": "5d3c1e8a-2f4b-4c6d-8e9f-0a1b2c3d4e5f", "edgeAgent": true}}}},
                {{"name": "b", "spec": {{}}}}
            ]"#
        )
        .unwrap();

        let feed = StaticResourceFeed::new(file.path());
        let mut stream = feed.watch().await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.op, ResourceOp::Add);
        assert_eq!(first.resource.name, "a");
        assert!(first.resource.spec.edge_agent);

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.resource.name, "b");
        assert!(second.resource.spec.uuid.is_none());
    }

    #[tokio::test]
    async fn test_static_feed_missing_file() {
        let feed = StaticResourceFeed::new("/nonexistent/edge-monitor/nodes.json");
        assert!(matches!(feed.watch().await, Err(WatchError::Io(_))));
    }

    #[tokio::test]
    async fn test_static_feed_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();

        let feed = StaticResourceFeed::new(file.path());
        assert!(matches!(feed.watch().await, Err(WatchError::Decode(_))));
    }
}
