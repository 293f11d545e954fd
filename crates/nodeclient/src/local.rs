//! Client for the node running inside this process.

use std::sync::{Arc, Mutex, PoisonError};

use sandnode_common::Machine;
use thiserror::Error;
use tracing::{debug, info_span, Span};

use crate::assigned::AssignedTasks;
use crate::client::{NodeClient, NodeClientKind};
use crate::context::NodeContext;
use crate::error::{NodeClientError, NodeClientResult};
use crate::lifecycle::{self, Terminal};
use crate::startable::StartableTask;

pub const LOCAL_NODE_NAME: &str = "local";

#[derive(Debug, Error)]
#[error("{0}")]
pub struct NodeError(pub String);

/// An in-process node. State changes come back through a
/// [`crate::InfoStreamReceiver`].
pub trait LocalNode: Send + Sync {
    fn machines(&self) -> Vec<Machine>;
    fn add_work(&self, task_id: &str, machine_name: &str) -> Result<(), NodeError>;
}

pub struct LocalNodeClient {
    ctx: NodeContext,
    node: Arc<dyn LocalNode>,
    machines: Vec<Machine>,
    tasks: AssignedTasks,
    work_lock: Mutex<()>,
    span: Span,
}

impl LocalNodeClient {
    /// The machine list is copied from the node once, here.
    pub fn new(ctx: NodeContext, node: Arc<dyn LocalNode>) -> Self {
        let span = info_span!("local_node", node = LOCAL_NODE_NAME);
        Self {
            ctx,
            machines: node.machines(),
            node,
            tasks: AssignedTasks::in_span(&span),
            work_lock: Mutex::new(()),
            span,
        }
    }

    pub fn assigned_tasks(&self) -> &AssignedTasks {
        &self.tasks
    }

    /// Called by the node when a task finished.
    pub fn task_done(&self, task_id: &str) -> NodeClientResult<()> {
        self.terminal(task_id, Terminal::Done)
    }

    fn terminal(&self, task_id: &str, outcome: Terminal) -> NodeClientResult<()> {
        if !self.tasks.has(task_id) {
            return Err(NodeClientError::UnknownTask(task_id.to_string()));
        }
        let Some(task) = lifecycle::claim(&self.tasks, task_id, &self.span) else {
            return Ok(());
        };
        lifecycle::release(&task);
        lifecycle::finish(&self.ctx, &self.tasks, &task, outcome);
        Ok(())
    }
}

impl NodeClient for LocalNodeClient {
    fn name(&self) -> &str {
        LOCAL_NODE_NAME
    }

    fn kind(&self) -> NodeClientKind {
        NodeClientKind::Local
    }

    fn machines(&self) -> NodeClientResult<Vec<Machine>> {
        Ok(self.machines.clone())
    }

    fn add_task(&self, task: Arc<StartableTask>) -> NodeClientResult<()> {
        self.tasks.track(task.clone());

        let _guard = self.work_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.node
            .add_work(task.id(), &task.machine().name)
            .map_err(|e| NodeClientError::Action(e.to_string()))?;
        debug!(parent: task.span(), "Work added to local node");
        Ok(())
    }

    /// Also called by the node when a task failed.
    fn task_failed(&self, task_id: &str) -> NodeClientResult<()> {
        self.terminal(task_id, Terminal::Failed)
    }

    fn ready(&self) -> bool {
        true
    }
}
