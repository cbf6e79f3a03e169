//! Configuration store interface and HTTP client.
//!
//! The store only exposes a coarse "something in this application changed"
//! signal. Callers re-query the revision of the object they care about on
//! every notification.

use std::time::Duration;

use async_trait::async_trait;
use edge_monitor_id::{AppUuid, NodeUuid, RevisionId, Uuid};
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::StatusCode;
use thiserror::Error;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error};

/// Errors from configuration store queries.
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP transport error.
    #[error("config store request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with an unexpected status.
    #[error("config store returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The revision header is missing or not a UUID.
    #[error("invalid revision header: {0}")]
    InvalidRevision(String),

    /// The store is not reachable for another reason.
    #[error("config store unavailable: {0}")]
    Unavailable(String),
}

/// Configuration store interface.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Coarse change notifications for an application.
    fn changes(&self, app: AppUuid) -> BoxStream<'static, ()>;

    /// Current revision of `node`'s entry under `app`, `None` if it has none.
    async fn get_revision(
        &self,
        app: AppUuid,
        node: NodeUuid,
    ) -> Result<Option<RevisionId>, StoreError>;
}

/// HTTP client for the configuration store.
///
/// Revisions are read with `HEAD /v1/app/{app}/object/{object}` and taken
/// from the `ETag` header. Change notifications are a fixed-interval poll.
pub struct HttpConfigStore {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

impl HttpConfigStore {
    /// Create a new store client.
    pub fn new(base_url: &str, poll_interval: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
        })
    }
}

#[async_trait]
impl ConfigStore for HttpConfigStore {
    fn changes(&self, app: AppUuid) -> BoxStream<'static, ()> {
        debug!(app = %app, poll_secs = self.poll_interval.as_secs(), "Polling config store for changes");

        let start = tokio::time::Instant::now() + self.poll_interval;
        let interval = tokio::time::interval_at(start, self.poll_interval);
        IntervalStream::new(interval).map(|_| ()).boxed()
    }

    async fn get_revision(
        &self,
        app: AppUuid,
        node: NodeUuid,
    ) -> Result<Option<RevisionId>, StoreError> {
        let url = format!("{}/v1/app/{}/object/{}", self.base_url, app, node);
        debug!(url = %url, "Fetching config revision");

        let response = self.client.head(&url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, node = %node, "Failed to fetch config revision");
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .ok_or_else(|| StoreError::InvalidRevision("missing ETag".to_string()))?
            .to_str()
            .map_err(|e| StoreError::InvalidRevision(e.to_string()))?;

        parse_etag(etag)
    }
}

/// Parse an `ETag` header value into a revision.
///
/// Accepts quoted, unquoted and weak (`W/"..."`) forms. The nil UUID means
/// the object exists without a revision.
pub fn parse_etag(etag: &str) -> Result<Option<RevisionId>, StoreError> {
    let raw = etag.trim();
    let raw = raw.strip_prefix("W/").unwrap_or(raw);
    let raw = raw.trim_matches('"');

    let uuid = Uuid::try_parse(raw).map_err(|_| StoreError::InvalidRevision(etag.to_string()))?;
    Ok(RevisionId::from_uuid(uuid))
}
