//! Node clients: how the scheduler hands tasks to local and remote nodes
//! and learns how they ended.

pub mod api;
pub mod assigned;
pub mod client;
pub mod context;
pub mod dispatch;
pub mod error;
mod lifecycle;
pub mod local;
pub mod nodework;
pub mod remote;
#[cfg(feature = "remote")]
mod remote_api;
pub mod runloop;
pub mod startable;
#[cfg(test)]
mod testlog;

pub use api::{EventReader, NodeApi, ResultRetriever, StateController};
pub use assigned::AssignedTasks;
pub use client::{NodeClient, NodeClientKind};
pub use context::NodeContext;
pub use dispatch::{InfoStreamReceiver, LocalStreamReceiver};
pub use error::{NodeClientError, NodeClientResult};
pub use local::{LocalNode, LocalNodeClient, NodeError};
pub use nodework::{ImportError, NodeWork, NodeWorkPacker};
pub use remote::RemoteNodeClient;
pub use runloop::{DoneCallback, NodeClientLoop, Stopper, UnitOutcome};
pub use startable::{ErrorTracker, StartableTask, TaskResources};
