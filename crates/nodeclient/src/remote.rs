//! Client for a node reached over the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use futures_util::FutureExt;
use sandnode_common::{Machine, NodeMsg, NodeMsgType, NodeTaskState};
use tracing::{debug, error, info, info_span, warn, Span};

use crate::api::{NodeApi, ResultRetriever};
use crate::assigned::AssignedTasks;
use crate::client::{NodeClient, NodeClientKind};
use crate::context::NodeContext;
use crate::dispatch::RemoteEventRelay;
use crate::error::{NodeClientError, NodeClientResult};
use crate::lifecycle::{self, Terminal};
use crate::nodework::{NodeWork, NodeWorkPacker};
use crate::runloop::NodeClientLoop;
use crate::startable::StartableTask;

pub struct RemoteNodeClient {
    me: Weak<RemoteNodeClient>,
    ctx: NodeContext,
    api: Arc<dyn NodeApi>,
    retriever: Arc<dyn ResultRetriever>,
    packer: Arc<dyn NodeWorkPacker>,
    runloop: Arc<NodeClientLoop>,
    tasks: AssignedTasks,
    machines: RwLock<Option<Vec<Machine>>>,
    events_open: AtomicBool,
    span: Span,
}

impl RemoteNodeClient {
    pub fn new(
        ctx: NodeContext,
        api: Arc<dyn NodeApi>,
        retriever: Arc<dyn ResultRetriever>,
        packer: Arc<dyn NodeWorkPacker>,
        runloop: Arc<NodeClientLoop>,
    ) -> Arc<Self> {
        let span = info_span!("remote_node", node = %api.name());
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            ctx,
            api,
            retriever,
            packer,
            runloop,
            tasks: AssignedTasks::in_span(&span),
            machines: RwLock::new(None),
            events_open: AtomicBool::new(false),
            span,
        })
    }

    pub fn runloop(&self) -> &Arc<NodeClientLoop> {
        &self.runloop
    }

    pub fn assigned_tasks(&self) -> &AssignedTasks {
        &self.tasks
    }

    fn this(&self) -> NodeClientResult<Arc<Self>> {
        self.me.upgrade().ok_or_else(|| {
            NodeClientError::Action(format!("node client {} is shutting down", self.api.name()))
        })
    }

    /// Load the machine list and open the event stream, waiting for both on
    /// the calling thread.
    pub fn init(&self) -> NodeClientResult<()> {
        let this = self.this()?;
        self.runloop.call_blocking(async move {
            this.load_machine_list().await?;
            this.start_reader().await
        })?
    }

    pub async fn load_machine_list(&self) -> NodeClientResult<()> {
        let machines = self.api.machine_list().await.map_err(|e| {
            NodeClientError::Action(format!("failed retrieving machine list: {e}"))
        })?;
        info!(parent: &self.span, count = machines.len(), "Machine list loaded");
        *self.machines.write().unwrap_or_else(PoisonError::into_inner) = Some(machines);
        Ok(())
    }

    /// Open the node event stream and keep reading it on the loop. Closing
    /// the reader is registered as the stopper of the reading unit.
    pub async fn start_reader(&self) -> NodeClientResult<()> {
        let sink = Arc::new(RemoteEventRelay::new(self.me.clone()));
        let reader = self.api.event_reader(sink);
        reader.open().await.map_err(|e| {
            NodeClientError::Action(format!("failed to open event reader: {e}"))
        })?;

        let closing = reader.clone();
        let submitted = self.runloop.submit_with(
            async move {
                reader.read_stream().await;
                anyhow::Ok(())
            },
            None,
            Some(Box::new(move || {
                async move { closing.close().await.map_err(anyhow::Error::from) }.boxed()
            })),
        );
        if !submitted {
            return Err(NodeClientError::Action(format!(
                "node client loop {} is stopped",
                self.runloop.name()
            )));
        }
        Ok(())
    }

    pub(crate) fn set_events_open(&self, open: bool) {
        self.events_open.store(open, Ordering::SeqCst);
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    pub(crate) async fn event_msg(&self, msg: NodeMsg) {
        match msg.kind() {
            NodeMsgType::TaskState => {}
            NodeMsgType::Other(msgtype) => {
                error!(parent: &self.span, msgtype = %msgtype, "Unhandled message type");
                return;
            }
        }

        let Some(task_id) = msg.task_id().map(str::to_string) else {
            error!(parent: &self.span, "Task state message without a task id");
            return;
        };
        if !self.tasks.has(&task_id) {
            warn!(parent: &self.span, task_id = %task_id, "State update for a task that is not tracked");
            return;
        }
        let Ok(this) = self.this() else {
            return;
        };

        match msg.state() {
            Some(NodeTaskState::Failed) => {
                self.runloop.submit(async move {
                    this.handle_task_failed(&task_id, true).await;
                    anyhow::Ok(())
                });
            }
            Some(NodeTaskState::Done) => {
                self.runloop.submit(async move {
                    this.handle_task_done(&task_id).await;
                    anyhow::Ok(())
                });
            }
            other => {
                let state = other.as_ref().map(NodeTaskState::as_str).unwrap_or("<missing>");
                error!(parent: &self.span, task_id = %task_id, state, "Unhandled task state");
            }
        }
    }

    async fn upload_and_start(&self, mut nodework: NodeWork, task: Arc<StartableTask>) {
        let uploaded = self.api.upload_taskwork(nodework.path()).await;
        if let Err(err) = nodework.delete() {
            warn!(parent: task.span(), error = %err, "Failed to remove uploaded node work");
        }

        if let Err(err) = uploaded {
            error!(parent: task.span(), node = %self.api.name(), error = %err, "Failed to upload work for task");
            task.errors()
                .fatal_error(format!("Failed to upload work to node {}. {err}", self.api.name()));
            self.handle_task_failed(task.id(), false).await;
            return;
        }

        if let Err(err) = self.api.start_task(task.id(), &task.machine().name).await {
            error!(parent: task.span(), node = %self.api.name(), error = %err, "Failed to start remote task");
            task.errors()
                .fatal_error(format!("Failed to start remote task on {}. {err}", self.api.name()));
            self.handle_task_failed(task.id(), false).await;
            return;
        }
        debug!(parent: task.span(), node = %self.api.name(), "Remote task started");
    }

    async fn retrieve_result(&self, task: &StartableTask) -> bool {
        match self.retriever.retrieve_result(task.id(), self.api.name()).await {
            Ok(()) => true,
            Err(err) => {
                error!(parent: task.span(), node = %self.api.name(), error = %err, "Failed to retrieve result for task");
                task.errors()
                    .fatal_error(format!("Failed to retrieve result from {}. {err}", self.api.name()));
                false
            }
        }
    }

    async fn handle_task_failed(&self, task_id: &str, retrieve: bool) {
        let Some(task) = lifecycle::claim(&self.tasks, task_id, &self.span) else {
            return;
        };
        lifecycle::release(&task);
        if retrieve {
            self.retrieve_result(&task).await;
        }
        lifecycle::finish(&self.ctx, &self.tasks, &task, Terminal::Failed);
    }

    async fn handle_task_done(&self, task_id: &str) {
        let Some(task) = lifecycle::claim(&self.tasks, task_id, &self.span) else {
            return;
        };
        lifecycle::release(&task);
        let outcome = if self.retrieve_result(&task).await {
            Terminal::Done
        } else {
            Terminal::Failed
        };
        lifecycle::finish(&self.ctx, &self.tasks, &task, outcome);
    }

    /// Failure path for when the loop no longer accepts work.
    fn fail_now(&self, task_id: &str) {
        let Some(task) = lifecycle::claim(&self.tasks, task_id, &self.span) else {
            return;
        };
        lifecycle::release(&task);
        lifecycle::finish(&self.ctx, &self.tasks, &task, Terminal::Failed);
    }
}

impl NodeClient for RemoteNodeClient {
    fn name(&self) -> &str {
        self.api.name()
    }

    fn kind(&self) -> NodeClientKind {
        NodeClientKind::Remote
    }

    fn machines(&self) -> NodeClientResult<Vec<Machine>> {
        match &*self.machines.read().unwrap_or_else(PoisonError::into_inner) {
            Some(machines) if !machines.is_empty() => Ok(machines.clone()),
            _ => Err(NodeClientError::NotReady(self.api.name().to_string())),
        }
    }

    fn add_task(&self, task: Arc<StartableTask>) -> NodeClientResult<()> {
        self.tasks.track(task.clone());

        let nodework = self
            .packer
            .create(task.analysis_id(), task.id())
            .map_err(|e| NodeClientError::Import {
                task_id: task.id().to_string(),
                reason: e.to_string(),
            })?
            .in_span(task.span());

        let this = self.this()?;
        let submitted = self.runloop.submit(async move {
            this.upload_and_start(nodework, task).await;
            anyhow::Ok(())
        });
        if !submitted {
            return Err(NodeClientError::Action(format!(
                "node client loop {} is stopped",
                self.runloop.name()
            )));
        }
        Ok(())
    }

    fn task_failed(&self, task_id: &str) -> NodeClientResult<()> {
        if !self.tasks.has(task_id) {
            return Err(NodeClientError::UnknownTask(task_id.to_string()));
        }

        let this = self.this()?;
        let failing = task_id.to_string();
        let submitted = self.runloop.submit(async move {
            this.handle_task_failed(&failing, false).await;
            anyhow::Ok(())
        });
        if !submitted {
            self.fail_now(task_id);
        }
        Ok(())
    }

    fn ready(&self) -> bool {
        let loaded = self
            .machines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|machines| !machines.is_empty());
        loaded && self.events_open.load(Ordering::SeqCst)
    }
}
