use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info_span, warn, Span};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("nothing to pack for task {0}")]
    Missing(String),
    #[error("i/o error while packing: {0}")]
    Io(#[from] io::Error),
}

/// Builds the archive of a task's working data that is sent to a node.
pub trait NodeWorkPacker: Send + Sync {
    fn create(&self, analysis_id: &str, task_id: &str) -> Result<NodeWork, ImportError>;
}

/// A packed work archive on disk. The file is removed by [`NodeWork::delete`]
/// or, failing that, when the value is dropped.
#[derive(Debug)]
pub struct NodeWork {
    path: PathBuf,
    deleted: bool,
    span: Span,
}

impl NodeWork {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            span: info_span!("node_work", path = %path.display()),
            path,
            deleted: false,
        }
    }

    /// Log under the span of the task the archive belongs to.
    pub fn in_span(mut self, parent: &Span) -> Self {
        self.span = info_span!(parent: parent, "node_work", path = %self.path.display());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn delete(&mut self) -> io::Result<()> {
        if self.deleted {
            return Ok(());
        }
        self.deleted = true;
        match std::fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

impl Drop for NodeWork {
    fn drop(&mut self) {
        if let Err(err) = self.delete() {
            warn!(parent: &self.span, error = %err, "Failed to remove node work");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testlog::CapturedLog;

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("T1.zip");
        std::fs::write(&path, b"zip").unwrap();

        let mut work = NodeWork::new(&path);
        work.delete().unwrap();
        assert!(!path.exists());
        work.delete().unwrap();
    }

    #[test]
    fn drop_removes_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("T1.zip");
        std::fs::write(&path, b"zip").unwrap();

        drop(NodeWork::new(&path));
        assert!(!path.exists());
    }

    #[test]
    fn drop_failure_logs_under_task_span() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be unlinked like a file.
        let path = dir.path().join("T1.zip");
        std::fs::create_dir(&path).unwrap();

        let log = CapturedLog::default();
        log.capture(|| {
            let task = info_span!("task", task_id = %"T1");
            drop(NodeWork::new(&path).in_span(&task));
        });

        let contents = log.contents();
        let line = contents
            .lines()
            .find(|l| l.contains("Failed to remove node work"))
            .unwrap();
        assert!(line.contains("task{task_id=T1}:node_work{"), "{line}");
        assert!(path.exists());
    }

    #[test]
    fn missing_archive_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut work = NodeWork::new(dir.path().join("gone.zip"));
        work.delete().unwrap();
    }
}
