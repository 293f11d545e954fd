//! Routing of node state notifications to the client that owns the task.

use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use sandnode_common::{ClientError, EventSink, NodeMsg, NodeTaskState};
use tracing::{error, info, info_span, warn, Span};

use crate::client::NodeClient;
use crate::local::LocalNodeClient;
use crate::remote::RemoteNodeClient;

/// Receives task state changes from an in-process node.
pub trait InfoStreamReceiver: Send + Sync {
    fn task_state(&self, task_id: &str, state: NodeTaskState);
}

/// Forwards the state changes of a local node to its [`LocalNodeClient`].
///
/// The node needs its receiver before the client can be built, so the
/// client is bound afterwards with [`LocalStreamReceiver::set_client`].
/// The receiver never keeps the client alive.
pub struct LocalStreamReceiver {
    client: OnceLock<Weak<LocalNodeClient>>,
    span: Span,
}

impl Default for LocalStreamReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStreamReceiver {
    pub fn new() -> Self {
        Self {
            client: OnceLock::new(),
            span: info_span!("local_stream_receiver"),
        }
    }

    /// Bind the owning client. Only the first call takes effect.
    pub fn set_client(&self, client: &Arc<LocalNodeClient>) -> bool {
        let bound = self.client.set(Arc::downgrade(client)).is_ok();
        if !bound {
            warn!(parent: &self.span, "Stream receiver already has a client");
        }
        bound
    }

    fn client(&self) -> Option<Arc<LocalNodeClient>> {
        self.client.get().and_then(Weak::upgrade)
    }
}

impl InfoStreamReceiver for LocalStreamReceiver {
    fn task_state(&self, task_id: &str, state: NodeTaskState) {
        let Some(client) = self.client() else {
            error!(parent: &self.span, task_id, state = state.as_str(), "No client bound for task state update");
            return;
        };

        let handled = match state {
            NodeTaskState::Failed => client.task_failed(task_id),
            NodeTaskState::Done => client.task_done(task_id),
            NodeTaskState::Other(state) => {
                error!(parent: &self.span, task_id, state = %state, "Unhandled task state update");
                return;
            }
        };
        if let Err(err) = handled {
            warn!(parent: &self.span, task_id, error = %err, "Task state update was not applied");
        }
    }
}

/// Event sink of a remote client's event reader.
pub(crate) struct RemoteEventRelay {
    client: Weak<RemoteNodeClient>,
}

impl RemoteEventRelay {
    pub(crate) fn new(client: Weak<RemoteNodeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventSink for RemoteEventRelay {
    async fn message(&self, msg: NodeMsg) {
        if let Some(client) = self.client.upgrade() {
            client.event_msg(msg).await;
        }
    }

    fn read_end(&self) {
        if let Some(client) = self.client.upgrade() {
            client.set_events_open(false);
            warn!(parent: client.span(), "Event stream ended");
        }
    }

    fn connected(&self) {
        if let Some(client) = self.client.upgrade() {
            client.set_events_open(true);
            info!(parent: client.span(), "Event stream opened");
        }
    }

    fn connect_error(&self, error: &ClientError) {
        if let Some(client) = self.client.upgrade() {
            client.set_events_open(false);
            error!(parent: client.span(), error = %error, "Event stream connection failed");
        }
    }
}
