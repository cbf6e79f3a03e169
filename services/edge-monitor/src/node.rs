//! Node descriptors and the cluster resources they are parsed from.

use std::fmt;
use std::str::FromStr;

use edge_monitor_id::{IdError, NodeUuid};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Sparkplug-style `group/node` address of an edge node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeAddress {
    /// Group ID.
    pub group: String,

    /// Node ID within the group.
    pub node: String,
}

impl NodeAddress {
    /// Create an address from its two parts.
    pub fn new(group: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            node: node.into(),
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.node)
    }
}

impl FromStr for NodeAddress {
    type Err = NodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((group, node))
                if !group.is_empty() && !node.is_empty() && !node.contains('/') =>
            {
                Ok(Self::new(group, node))
            }
            _ => Err(NodeParseError::InvalidAddress(s.to_string())),
        }
    }
}

/// A monitorable node as seen by the orchestrator.
///
/// Equality is by value; lifecycle identity is `uuid`. The field order makes
/// the derived `Ord` sort by uuid first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeDescriptor {
    /// Node UUID.
    pub uuid: NodeUuid,

    /// Address declared on the resource, if any.
    pub address: Option<NodeAddress>,

    /// Whether the node runs an edge agent (config reload and restart apply).
    pub is_agent_kind: bool,
}

/// Errors turning a resource into a descriptor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeParseError {
    /// The resource has no uuid.
    #[error("resource has no uuid")]
    MissingUuid,

    /// The uuid does not parse.
    #[error("invalid uuid: {0}")]
    InvalidUuid(#[from] IdError),

    /// The address is not `group/node`.
    #[error("invalid address '{0}', expected group/node")]
    InvalidAddress(String),
}

/// Specification payload of a cluster node resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    /// Node UUID as a string.
    #[serde(default)]
    pub uuid: Option<String>,

    /// `group/node` address.
    #[serde(default)]
    pub address: Option<String>,

    /// True for edge agent deployments.
    #[serde(default)]
    pub edge_agent: bool,
}

impl NodeSpec {
    /// Parse the spec into a descriptor.
    ///
    /// Only the uuid is required. An address that does not parse is left
    /// out with a warning; the node's telemetry address is used instead.
    pub fn to_descriptor(&self) -> Result<NodeDescriptor, NodeParseError> {
        let uuid = match self.uuid.as_deref() {
            None => return Err(NodeParseError::MissingUuid),
            Some(raw) => NodeUuid::parse(raw)?,
        };

        let address = match self.address.as_deref().map(str::parse::<NodeAddress>) {
            Some(Ok(address)) => Some(address),
            Some(Err(err)) => {
                warn!(node = %uuid, error = %err, "Ignoring node address");
                None
            }
            None => None,
        };

        Ok(NodeDescriptor {
            uuid,
            address,
            is_agent_kind: self.edge_agent,
        })
    }
}

/// A named cluster resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResource {
    /// Resource name, unique within the watched collection.
    pub name: String,

    /// Specification payload.
    pub spec: NodeSpec,
}

/// Watch operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOp {
    Add,
    Update,
    Delete,
}

/// One notification from the cluster resource feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEvent {
    /// What happened.
    pub op: ResourceOp,

    /// The resource after the change (the last known state for deletes).
    pub resource: NodeResource,
}

impl ResourceEvent {
    pub fn add(resource: NodeResource) -> Self {
        Self {
            op: ResourceOp::Add,
            resource,
        }
    }

    pub fn update(resource: NodeResource) -> Self {
        Self {
            op: ResourceOp::Update,
            resource,
        }
    }

    pub fn delete(resource: NodeResource) -> Self {
        Self {
            op: ResourceOp::Delete,
            resource,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const NODE: &str = "5d3c1e8a-2f4b-4c6d-8e9f-0a1b2c3d4e5f";

    #[rstest]
    #[case("Site/Cell-1", true)]
    #[case("Site/", false)]
    #[case("/Cell", false)]
    #[case("Site", false)]
    #[case("Site/Cell/Extra", false)]
    fn test_address_parse(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(input.parse::<NodeAddress>().is_ok(), ok);
    }

    #[test]
    fn test_address_display() {
        assert_eq!(NodeAddress::new("Site", "Cell-1").to_string(), "Site/Cell-1");
    }

    #[test]
    fn test_spec_to_descriptor() {
        let spec = NodeSpec {
            uuid: Some(NODE.to_string()),
            address: Some("Site/Cell-1".to_string()),
            edge_agent: true,
        };

        let descriptor = spec.to_descriptor().unwrap();
        assert_eq!(descriptor.uuid.to_string(), NODE);
        assert_eq!(descriptor.address, Some(NodeAddress::new("Site", "Cell-1")));
        assert!(descriptor.is_agent_kind);
    }

    #[test]
    fn test_spec_without_uuid_is_rejected() {
        let spec = NodeSpec {
            address: Some("Site/Cell-1".to_string()),
            ..Default::default()
        };
        assert_eq!(spec.to_descriptor(), Err(NodeParseError::MissingUuid));
    }

    #[test]
    fn test_spec_with_bad_uuid_is_rejected() {
        let spec = NodeSpec {
            uuid: Some("garbage".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            spec.to_descriptor(),
            Err(NodeParseError::InvalidUuid(_))
        ));
    }

    #[test]
    fn test_spec_with_bad_address_keeps_node() {
        let spec = NodeSpec {
            uuid: Some(NODE.to_string()),
            address: Some("Site/Cell/Extra".to_string()),
            edge_agent: true,
        };

        let descriptor = spec.to_descriptor().unwrap();
        assert_eq!(descriptor.uuid.to_string(), NODE);
        assert!(descriptor.address.is_none());
        assert!(descriptor.is_agent_kind);
    }

    #[test]
    fn test_spec_deserializes_camel_case() {
        let json = serde_json::json!({
            "uuid": NODE,
            "edgeAgent": true,
        });

        let spec: NodeSpec = serde_json::from_value(json).unwrap();
        assert!(spec.edge_agent);
        assert!(spec.address.is_none());
    }
}
