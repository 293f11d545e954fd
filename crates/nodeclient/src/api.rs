//! Collaborators a node client talks to.
//!
//! The remote client only sees these traits. The `remote` feature
//! implements them for the HTTP transport in `sandnode-nodeapi`; tests
//! implement them with in-memory fakes.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sandnode_common::{ClientError, EventSink, Machine};

#[async_trait]
pub trait NodeApi: Send + Sync {
    fn name(&self) -> &str;

    async fn machine_list(&self) -> Result<Vec<Machine>, ClientError>;

    async fn upload_taskwork(&self, path: &Path) -> Result<(), ClientError>;

    async fn start_task(&self, task_id: &str, machine_name: &str) -> Result<(), ClientError>;

    /// Create a reader for the node's push events, reporting into `sink`.
    fn event_reader(&self, sink: Arc<dyn EventSink>) -> Arc<dyn EventReader>;
}

#[async_trait]
pub trait EventReader: Send + Sync {
    async fn open(&self) -> Result<(), ClientError>;

    /// Read until the stream ends. Calls `read_end` on the sink when done.
    async fn read_stream(&self);

    async fn close(&self) -> Result<(), ClientError>;
}

#[async_trait]
pub trait ResultRetriever: Send + Sync {
    async fn retrieve_result(&self, task_id: &str, node: &str) -> Result<(), ClientError>;
}

/// Receives the terminal state of every task. Calls must not block.
pub trait StateController: Send + Sync {
    fn task_done(&self, task_id: &str, analysis_id: &str);
    fn task_failed(&self, task_id: &str, analysis_id: &str);
}
