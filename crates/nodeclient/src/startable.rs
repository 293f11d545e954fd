//! Task context handed from the scheduler to a node client.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sandnode_common::{Errors, Machine, Task};
use tracing::{info_span, warn, Span};

/// Resources reserved for a task, such as a locked machine slot.
pub trait TaskResources: Send + Sync {
    fn release(&self) -> Result<()>;
}

/// Collects the errors of one task. Fatal errors are what made the task
/// fail and end up in front of the analyst.
#[derive(Debug, Default)]
pub struct ErrorTracker {
    errors: Mutex<Errors>,
}

impl ErrorTracker {
    fn lock(&self) -> MutexGuard<'_, Errors> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn error(&self, message: impl Into<String>) {
        self.lock().errors.push(message.into());
    }

    pub fn fatal_error(&self, message: impl Into<String>) {
        self.lock().fatal.push(message.into());
    }

    pub fn has_fatal(&self) -> bool {
        !self.lock().fatal.is_empty()
    }

    pub fn snapshot(&self) -> Errors {
        self.lock().clone()
    }
}

pub struct StartableTask {
    task: Task,
    machine: Machine,
    span: Span,
    errors: ErrorTracker,
    resources: Mutex<Option<Box<dyn TaskResources>>>,
    errors_path: Option<PathBuf>,
    assigned_at: DateTime<Utc>,
    closed: AtomicBool,
    terminal: AtomicBool,
}

impl StartableTask {
    pub fn new(task: Task, machine: Machine) -> Self {
        let span = info_span!(
            "task",
            task_id = %task.id,
            analysis_id = %task.analysis_id,
            machine = %machine.name
        );
        Self {
            task,
            machine,
            span,
            errors: ErrorTracker::default(),
            resources: Mutex::new(None),
            errors_path: None,
            assigned_at: Utc::now(),
            closed: AtomicBool::new(false),
            terminal: AtomicBool::new(false),
        }
    }

    pub fn with_resources(mut self, resources: impl TaskResources + 'static) -> Self {
        self.resources = Mutex::new(Some(Box::new(resources)));
        self
    }

    /// Persist the tracked errors to `path` when the task is closed.
    pub fn with_errors_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.errors_path = Some(path.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.task.id
    }

    pub fn analysis_id(&self) -> &str {
        &self.task.analysis_id
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Logger of this task.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn errors(&self) -> &ErrorTracker {
        &self.errors
    }

    pub fn errors_path(&self) -> Option<&Path> {
        self.errors_path.as_deref()
    }

    pub fn assigned_at(&self) -> DateTime<Utc> {
        self.assigned_at
    }

    /// Release the reserved resources. Only the first call does anything.
    pub fn release_resources(&self) -> Result<()> {
        let resources = self
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match resources {
            Some(resources) => resources.release(),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the task context, writing its errors to disk if a path was set.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            bail!("task {} is already closed", self.task.id);
        }

        let Some(path) = &self.errors_path else {
            return Ok(());
        };
        let errors = self.errors.snapshot();
        if errors.is_empty() {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let encoded = serde_json::to_vec_pretty(&errors)?;
        std::fs::write(path, encoded)
            .with_context(|| format!("writing task errors to {}", path.display()))?;
        Ok(())
    }

    /// Claim the right to report this task terminal. True for the first
    /// caller only.
    pub(crate) fn claim_terminal(&self) -> bool {
        let first = !self.terminal.swap(true, Ordering::SeqCst);
        if !first {
            warn!(parent: &self.span, "Task already has a terminal state in progress");
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingSlot(Arc<AtomicUsize>);

    impl TaskResources for CountingSlot {
        fn release(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn task() -> StartableTask {
        StartableTask::new(
            Task::new("T1", "20240101-ABCDEF"),
            Machine::new("win10-1", "windows"),
        )
    }

    #[test]
    fn resources_are_released_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let task = task().with_resources(CountingSlot(released.clone()));

        task.release_resources().unwrap();
        task.release_resources().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_writes_errors_and_refuses_second_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks").join("T1").join("errors.json");
        let task = task().with_errors_path(&path);
        task.errors().error("slow guest");
        task.errors().fatal_error("upload failed");
        assert!(task.errors().has_fatal());

        task.close().unwrap();
        let written: Errors = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written.fatal, vec!["upload failed"]);
        assert_eq!(written.errors, vec!["slow guest"]);

        assert!(task.close().is_err());
        assert!(task.is_closed());
    }

    #[test]
    fn close_without_errors_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.json");
        let task = task().with_errors_path(&path);
        task.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn terminal_claim_is_granted_once() {
        let task = task();
        assert!(task.claim_terminal());
        assert!(!task.claim_terminal());
    }
}
