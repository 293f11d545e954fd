//! Client for the local result retriever service.
//!
//! The retriever listens on a Unix socket. A request is a single JSON line
//! naming the task and the node to fetch results from; the reply is a
//! single JSON line saying whether retrieval succeeded.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sandnode_common::ClientError;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    task_id: &'a str,
    node: &'a str,
}

#[derive(Debug, Deserialize)]
struct RetrieveReply {
    success: bool,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ResultRetrieverClient {
    socket: PathBuf,
    timeout: Duration,
}

impl ResultRetrieverClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Ask the retriever to fetch the results of `task_id` from `node`.
    ///
    /// A reply with `success: false` is reported as [`ClientError::Request`]
    /// carrying the retriever's reason.
    pub async fn retrieve_result(&self, task_id: &str, node: &str) -> Result<(), ClientError> {
        let exchange = self.exchange(task_id, node);
        let reply = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ClientError::Request(format!("result retrieval for {task_id} timed out")))??;

        if reply.success {
            debug!(task_id, node, "Results retrieved");
            return Ok(());
        }
        let reason = reply.reason.unwrap_or_else(|| "no reason given".to_string());
        Err(ClientError::Request(format!(
            "retrieving results of {task_id} from {node} failed: {reason}"
        )))
    }

    #[cfg(unix)]
    async fn exchange(&self, task_id: &str, node: &str) -> Result<RetrieveReply, ClientError> {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::UnixStream;

        let stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            ClientError::Connect(format!(
                "result retriever at {}: {e}",
                self.socket.display()
            ))
        })?;
        let (reader, mut writer) = stream.into_split();

        let mut line = serde_json::to_vec(&RetrieveRequest { task_id, node })
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;

        let mut reply = String::new();
        let read = BufReader::new(reader).read_line(&mut reply).await?;
        if read == 0 {
            return Err(ClientError::Closed);
        }
        serde_json::from_str(reply.trim()).map_err(|e| ClientError::Decode(e.to_string()))
    }

    #[cfg(not(unix))]
    async fn exchange(&self, _task_id: &str, _node: &str) -> Result<RetrieveReply, ClientError> {
        Err(ClientError::Connect(format!(
            "result retriever sockets are not supported on this platform ({})",
            self.socket.display()
        )))
    }
}
