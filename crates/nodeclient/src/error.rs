use sandnode_common::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeClientError {
    /// The machine list of the node has not been loaded.
    #[error("node {0} is not ready: machine list not loaded")]
    NotReady(String),
    #[error("{0}")]
    Action(String),
    /// Registry miss. Expected when two terminal triggers race for a task.
    #[error("task {0} is not assigned to this node")]
    UnknownTask(String),
    #[error("failed to create node work for task {task_id}: {reason}")]
    Import { task_id: String, reason: String },
}

impl From<ClientError> for NodeClientError {
    fn from(err: ClientError) -> Self {
        NodeClientError::Action(err.to_string())
    }
}

pub type NodeClientResult<T> = Result<T, NodeClientError>;
