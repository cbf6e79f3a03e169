//! # edge-monitor-id
//!
//! Typed identifiers for the edge monitor.
//!
//! ## Design Principles
//!
//! - Every identifier in the fleet is a plain UUID; the Rust type says what
//!   it identifies so node, application and revision UUIDs cannot be mixed
//! - Parsing is strict; display is always the hyphenated lowercase form
//! - The nil UUID is a sentinel on the wire, never a valid revision
//!
//! ## Example
//!
//! ```
//! use edge_monitor_id::{NodeUuid, RevisionId};
//!
//! let node: NodeUuid = "0e2b1f0c-6a6e-4b8e-9d5b-55c2c7f2e1a4".parse().unwrap();
//! assert_eq!(node.to_string(), "0e2b1f0c-6a6e-4b8e-9d5b-55c2c7f2e1a4");
//!
//! assert!(RevisionId::from_uuid(uuid::Uuid::nil()).is_none());
//! ```

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export uuid for consumers that need raw UUID operations
pub use uuid::Uuid;
