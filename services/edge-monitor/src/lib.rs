//! Edge Monitor Library
//!
//! The edge monitor supervises a fleet of edge nodes. It follows the set of
//! node resources declared in the cluster and keeps one monitor task per
//! node. For edge agents the monitor reloads the agent's configuration when
//! the revision it reports drifts from the config store, and requests a
//! restart for as long as the node stays offline.
//!
//! ## Architecture
//!
//! ```text
//! ResourceFeed ──> EntitySetWatcher ──(watch)──> MonitorOrchestrator
//!                                                ├── NodeMonitor::Agent(uuid)
//!                                                │   ├── ConfigReconciler
//!                                                │   └── OfflineEscalator
//!                                                └── NodeMonitor::Plain(uuid)
//!                                                    └── OfflineEscalator
//! ```
//!
//! ## Modules
//!
//! - `cluster`: resource feed interface and the file-backed feed
//! - `watcher`: entity set snapshots
//! - `orchestrator`: one monitor task per node
//! - `monitor`: config reconciliation and offline escalation
//! - `telemetry`, `store`, `cmdesc`: collaborator interfaces and clients
//! - `mock`: in-memory collaborators

pub mod cluster;
pub mod cmdesc;
pub mod config;
pub mod events;
pub mod mock;
pub mod monitor;
pub mod node;
pub mod orchestrator;
pub mod store;
pub mod telemetry;
pub mod watcher;

pub use events::{log_event, EventReceiver, EventSender, MonitorEvent};
pub use monitor::{MonitorDeps, MonitorKind, MonitorSettings, NodeMonitor};
pub use node::{NodeAddress, NodeDescriptor};
pub use orchestrator::MonitorOrchestrator;
pub use watcher::{EntitySet, EntitySetWatcher};
