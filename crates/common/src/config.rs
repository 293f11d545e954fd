//! Node client settings.
//!
//! Settings are read from a TOML file (missing file means defaults), then
//! `SANDNODE_*` environment variables are applied on top:
//!
//! - `SANDNODE_CWD`: working directory holding `storage/` and `operational/`
//! - `SANDNODE_RESULT_RETRIEVER_SOCK`: result retriever Unix socket
//!
//! ```toml
//! cwd = "/srv/sandnode"
//! loop_shutdown_timeout_ms = 5000
//!
//! [remote_nodes.node-a]
//! api_url = "http://10.0.0.5:8090"
//! api_key = "..."
//! ```

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::paths::StoragePaths;

pub const DEFAULT_LOOP_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeClientSettings {
    pub cwd: PathBuf,
    pub result_retriever_socket: Option<PathBuf>,
    pub loop_shutdown_timeout_ms: u64,
    pub remote_nodes: BTreeMap<String, RemoteNodeSettings>,
}

impl Default for NodeClientSettings {
    fn default() -> Self {
        Self {
            cwd: default_cwd(),
            result_retriever_socket: None,
            loop_shutdown_timeout_ms: DEFAULT_LOOP_SHUTDOWN_TIMEOUT_MS,
            remote_nodes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteNodeSettings {
    pub api_url: String,
    pub api_key: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_cwd() -> PathBuf {
    env::var("HOME")
        .map(|home| PathBuf::from(home).join(".sandnode"))
        .unwrap_or_else(|_| PathBuf::from(".sandnode"))
}

impl NodeClientSettings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut settings = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings {}", path.display()))?;
            Self::from_toml_str(&contents)
                .with_context(|| format!("invalid settings file {}", path.display()))?
        } else {
            debug!(path = %path.display(), "settings file not found, using defaults");
            Self::default()
        };

        settings.apply_overrides(|key| env::var(key).ok());
        Ok(settings)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let settings: NodeClientSettings = toml::from_str(contents)?;
        Ok(settings)
    }

    /// Applies `SANDNODE_*` overrides. `lookup` is `std::env::var` in
    /// production.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("SANDNODE_CWD") {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                self.cwd = PathBuf::from(trimmed);
            }
        }

        if let Some(value) = lookup("SANDNODE_RESULT_RETRIEVER_SOCK") {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                self.result_retriever_socket = Some(PathBuf::from(trimmed));
            }
        }
    }

    pub fn paths(&self) -> StoragePaths {
        let paths = StoragePaths::new(&self.cwd);
        match &self.result_retriever_socket {
            Some(socket) => paths.with_result_retriever(socket),
            None => paths,
        }
    }
}
