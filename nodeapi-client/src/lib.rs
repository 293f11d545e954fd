//! Sandnode node API client
//!
//! Client library for talking to a remote analysis node: machine listing,
//! uploading task work, starting tasks, following the node's event stream
//! and asking the local result retriever to fetch results.

pub mod events;
pub mod retriever;

use std::path::Path;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use sandnode_common::{ClientError, Machine, RemoteNodeSettings};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

pub use events::{LineDecoder, LineError, NodeEventReader};
pub use retriever::ResultRetrieverClient;

const REQUEST_ID_HEADER: &str = "X-Request-Id";
const FILENAME_HEADER: &str = "X-Filename";
const DIGEST_HEADER: &str = "X-Content-Sha256";

#[derive(Serialize)]
struct StartTaskBody<'a> {
    machine: &'a str,
}

/// HTTP client for a single remote node.
#[derive(Clone, Debug)]
pub struct NodeApiClient {
    name: String,
    base_url: String,
    api_key: String,
    request_timeout: Duration,
    http: Client,
}

impl NodeApiClient {
    /// Build a client for node `name` from its settings.
    pub fn new(name: &str, settings: &RemoteNodeSettings) -> Result<Self, ClientError> {
        let request_timeout = Duration::from_secs(settings.request_timeout_secs);
        // No total timeout on the client: the event stream stays open for
        // as long as the node runs. Plain calls set theirs per request.
        let http = Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| ClientError::Connect(format!("http client error: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            request_timeout,
            http,
        })
    }

    /// Node name as configured.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.api_key)
            .header(REQUEST_ID_HEADER, Uuid::new_v4().to_string())
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ClientError> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            code: status.as_u16(),
            body,
        })
    }

    /// List the machines the node offers.
    pub async fn machine_list(&self) -> Result<Vec<Machine>, ClientError> {
        let builder = self
            .http
            .get(self.url("machines"))
            .timeout(self.request_timeout);
        let response = self.send(builder).await?;
        let machines = response
            .json::<Vec<Machine>>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        debug!(node = %self.name, count = machines.len(), "Loaded machine list");
        Ok(machines)
    }

    /// Upload the work archive of a task.
    pub async fn upload_taskwork(&self, path: &Path) -> Result<(), ClientError> {
        let content = tokio::fs::read(path).await?;
        let digest = hex::encode(Sha256::digest(&content));
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let builder = self
            .http
            .post(self.url("uploadwork"))
            .timeout(self.request_timeout)
            .header(FILENAME_HEADER, filename)
            .header(DIGEST_HEADER, digest)
            .header(reqwest::header::CONTENT_TYPE, "application/zip")
            .body(content);
        self.send(builder).await?;
        debug!(node = %self.name, path = %path.display(), "Uploaded task work");
        Ok(())
    }

    /// Start an uploaded task on one of the node's machines.
    pub async fn start_task(&self, task_id: &str, machine_name: &str) -> Result<(), ClientError> {
        let builder = self
            .http
            .post(self.url(&format!("task/{task_id}/start")))
            .timeout(self.request_timeout)
            .json(&StartTaskBody {
                machine: machine_name,
            });
        self.send(builder).await?;
        debug!(node = %self.name, task_id, machine = machine_name, "Started task");
        Ok(())
    }

    /// Open the node event stream. The response body is newline-delimited
    /// JSON and is read without a deadline.
    pub(crate) async fn open_events(&self) -> Result<Response, ClientError> {
        let builder = self
            .http
            .get(self.url("events"))
            .header(reqwest::header::ACCEPT, "application/x-ndjson");
        self.send(builder).await
    }
}
