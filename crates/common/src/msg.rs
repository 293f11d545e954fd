//! Push notifications sent by a node over its event stream.
//!
//! Every message is a JSON object carrying a `type` field. Only
//! `task_state` messages are understood today; everything else is kept as
//! an opaque body so callers can log it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MSG_TASK_STATE: &str = "task_state";
pub const STATE_TASK_DONE: &str = "task_done";
pub const STATE_TASK_FAILED: &str = "task_failed";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NodeMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeMsgType {
    TaskState,
    Other(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeTaskState {
    Done,
    Failed,
    Other(String),
}

impl NodeTaskState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            STATE_TASK_DONE => NodeTaskState::Done,
            STATE_TASK_FAILED => NodeTaskState::Failed,
            other => NodeTaskState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NodeTaskState::Done => STATE_TASK_DONE,
            NodeTaskState::Failed => STATE_TASK_FAILED,
            NodeTaskState::Other(raw) => raw,
        }
    }
}

impl NodeMsg {
    pub fn task_state(task_id: &str, state: NodeTaskState) -> Self {
        let mut body = Map::new();
        body.insert("task_id".into(), Value::String(task_id.to_string()));
        body.insert("state".into(), Value::String(state.as_str().to_string()));
        Self {
            msg_type: MSG_TASK_STATE.to_string(),
            body,
        }
    }

    pub fn kind(&self) -> NodeMsgType {
        match self.msg_type.as_str() {
            MSG_TASK_STATE => NodeMsgType::TaskState,
            other => NodeMsgType::Other(other.to_string()),
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        self.body.get("task_id").and_then(|v| v.as_str())
    }

    pub fn state(&self) -> Option<NodeTaskState> {
        self.body
            .get("state")
            .and_then(|v| v.as_str())
            .map(NodeTaskState::parse)
    }
}
