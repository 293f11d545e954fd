use std::sync::Arc;

use sandnode_common::Machine;

use crate::error::NodeClientResult;
use crate::startable::StartableTask;

/// Which failure-reporting style a client follows.
///
/// A `Local` client reports a failed hand-off from `add_task` itself. A
/// `Remote` client returns from `add_task` before any network call is made,
/// so upload and start failures only ever show up as a `task_failed` report
/// to the state controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeClientKind {
    Local,
    Remote,
}

/// A worker node as seen by the scheduler.
pub trait NodeClient: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> NodeClientKind;

    fn machines(&self) -> NodeClientResult<Vec<Machine>>;

    /// Hand a task to the node.
    ///
    /// An error means the task never reached the node. It stays tracked so
    /// the caller can resolve it through [`NodeClient::task_failed`].
    fn add_task(&self, task: Arc<StartableTask>) -> NodeClientResult<()>;

    /// Force-fail a task the node never started, for example because the
    /// assignment broke down halfway. Fails with
    /// [`crate::NodeClientError::UnknownTask`] when the task is not tracked.
    fn task_failed(&self, task_id: &str) -> NodeClientResult<()>;

    fn ready(&self) -> bool;
}
