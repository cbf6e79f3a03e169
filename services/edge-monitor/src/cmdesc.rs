//! Command escalation interface and HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::node::NodeAddress;

/// Command that tells an edge agent to reload its configuration.
pub const RELOAD_CONFIG_COMMAND: &str = "Node Control/Reload Edge Agent Config";

/// Metric type of a command value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MetricType {
    Boolean,
}

/// A command to deliver to a node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRequest {
    /// Target node; carried in the URL, not the body.
    #[serde(skip)]
    pub address: NodeAddress,

    /// Command metric name.
    pub name: String,

    /// Value type.
    #[serde(rename = "type")]
    pub metric_type: MetricType,

    /// Value to write.
    pub value: serde_json::Value,
}

impl CommandRequest {
    /// The config reload command for `address`.
    pub fn reload_config(address: NodeAddress) -> Self {
        Self {
            address,
            name: RELOAD_CONFIG_COMMAND.to_string(),
            metric_type: MetricType::Boolean,
            value: serde_json::Value::Bool(true),
        }
    }
}

/// Errors delivering a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// HTTP transport error.
    #[error("command request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The escalation service refused the command.
    #[error("command rejected with {status}: {body}")]
    Rejected { status: u16, body: String },

    /// No completion within the dispatch timeout.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// The service URL cannot carry a command path.
    #[error("invalid command escalation URL '{0}'")]
    InvalidUrl(String),
}

/// Command escalation interface.
#[async_trait]
pub trait CommandEscalation: Send + Sync {
    /// Deliver a command. Resolves once the service has accepted or refused it.
    async fn send(&self, request: &CommandRequest) -> Result<(), CommandError>;
}

/// HTTP client for the command escalation service.
pub struct HttpCommandEscalation {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpCommandEscalation {
    /// Create a new command escalation client.
    pub fn new(base_url: &str) -> Result<Self, CommandError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let base_url = Url::parse(base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| CommandError::InvalidUrl(base_url.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// `{base}/v1/address/{group}/{node}`, each part percent-encoded.
    fn command_url(&self, address: &NodeAddress) -> Result<Url, CommandError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| CommandError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["v1", "address", address.group.as_str(), address.node.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl CommandEscalation for HttpCommandEscalation {
    async fn send(&self, request: &CommandRequest) -> Result<(), CommandError> {
        let url = self.command_url(&request.address)?;
        debug!(url = %url, command = %request.name, "Sending command");

        let response = self.client.post(url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, address = %request.address, "Command rejected");
            return Err(CommandError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_reload_request_body() {
        let request = CommandRequest::reload_config(NodeAddress::new("Site", "Cell-1"));
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "name": "Node Control/Reload Edge Agent Config",
                "type": "Boolean",
                "value": true,
            })
        );
    }

    #[tokio::test]
    async fn test_send_posts_to_address() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/address/Site/Cell-1"))
            .and(body_json(serde_json::json!({
                "name": RELOAD_CONFIG_COMMAND,
                "type": "Boolean",
                "value": true,
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpCommandEscalation::new(&server.uri()).unwrap();
        let request = CommandRequest::reload_config(NodeAddress::new("Site", "Cell-1"));

        client.send(&request).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_encodes_address_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/address/Site%20%231/Cell%3F2"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpCommandEscalation::new(&format!("{}/", server.uri())).unwrap();
        let request = CommandRequest::reload_config(NodeAddress::new("Site #1", "Cell?2"));

        client.send(&request).await.unwrap();
    }

    #[test]
    fn test_base_url_is_validated() {
        assert!(matches!(
            HttpCommandEscalation::new("not a url"),
            Err(CommandError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpCommandEscalation::new("mailto:ops@example.com"),
            Err(CommandError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_command_url_keeps_base_path() {
        let client = HttpCommandEscalation::new("http://cmdesc.local/api/").unwrap();
        let url = client
            .command_url(&NodeAddress::new("Site", "Cell-1"))
            .unwrap();

        assert_eq!(url.as_str(), "http://cmdesc.local/api/v1/address/Site/Cell-1");
    }

    #[tokio::test]
    async fn test_send_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let client = HttpCommandEscalation::new(&server.uri()).unwrap();
        let request = CommandRequest::reload_config(NodeAddress::new("Site", "Cell-1"));

        let err = client.send(&request).await.unwrap_err();
        match err {
            CommandError::Rejected { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
