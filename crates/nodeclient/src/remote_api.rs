//! Network transport for [`RemoteNodeClient`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sandnode_common::{ClientError, EventSink, Machine, NodeClientSettings};
use sandnode_nodeapi::{NodeApiClient, NodeEventReader, ResultRetrieverClient};

use crate::api::{EventReader, NodeApi, ResultRetriever};
use crate::context::NodeContext;
use crate::error::{NodeClientError, NodeClientResult};
use crate::nodework::NodeWorkPacker;
use crate::remote::RemoteNodeClient;
use crate::runloop::NodeClientLoop;

#[async_trait]
impl NodeApi for NodeApiClient {
    fn name(&self) -> &str {
        NodeApiClient::name(self)
    }

    async fn machine_list(&self) -> Result<Vec<Machine>, ClientError> {
        NodeApiClient::machine_list(self).await
    }

    async fn upload_taskwork(&self, path: &Path) -> Result<(), ClientError> {
        NodeApiClient::upload_taskwork(self, path).await
    }

    async fn start_task(&self, task_id: &str, machine_name: &str) -> Result<(), ClientError> {
        NodeApiClient::start_task(self, task_id, machine_name).await
    }

    fn event_reader(&self, sink: Arc<dyn EventSink>) -> Arc<dyn EventReader> {
        Arc::new(NodeEventReader::new(self.clone(), sink))
    }
}

#[async_trait]
impl EventReader for NodeEventReader {
    async fn open(&self) -> Result<(), ClientError> {
        NodeEventReader::open(self).await
    }

    async fn read_stream(&self) {
        NodeEventReader::read_stream(self).await
    }

    async fn close(&self) -> Result<(), ClientError> {
        NodeEventReader::close(self).await
    }
}

#[async_trait]
impl ResultRetriever for ResultRetrieverClient {
    async fn retrieve_result(&self, task_id: &str, node: &str) -> Result<(), ClientError> {
        ResultRetrieverClient::retrieve_result(self, task_id, node).await
    }
}

impl RemoteNodeClient {
    /// Build a client for the configured node `name`, with its own loop.
    ///
    /// The loop's worker executes units as soon as it is built. Something
    /// must still own its lifetime: [`NodeClientLoop::spawn_thread`] (or
    /// `run` on a thread of your own) waits for `stop` and then tears the
    /// runtime down. Call [`RemoteNodeClient::init`] before handing out work.
    pub fn connect(
        ctx: NodeContext,
        settings: &NodeClientSettings,
        name: &str,
        packer: Arc<dyn NodeWorkPacker>,
    ) -> NodeClientResult<Arc<Self>> {
        let node = settings.remote_nodes.get(name).ok_or_else(|| {
            NodeClientError::Action(format!("no remote node named {name} configured"))
        })?;

        let api = NodeApiClient::new(name, node)?;
        let retriever = ResultRetrieverClient::new(ctx.paths.result_retriever_socket());
        let runloop = NodeClientLoop::new(name)?
            .with_shutdown_timeout(Duration::from_millis(settings.loop_shutdown_timeout_ms));

        Ok(RemoteNodeClient::new(
            ctx,
            Arc::new(api),
            Arc::new(retriever),
            packer,
            Arc::new(runloop),
        ))
    }
}
