use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{error, info_span, Span};

use crate::error::{NodeClientError, NodeClientResult};
use crate::startable::StartableTask;

/// Tasks a node client accepted and has not finished yet.
///
/// Every operation takes the single lock for an in-memory map operation
/// only. A poisoned lock is recovered: the map itself cannot be left
/// half-updated by any of these operations.
pub struct AssignedTasks {
    tasks: Mutex<HashMap<String, Arc<StartableTask>>>,
    span: Span,
}

impl Default for AssignedTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl AssignedTasks {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            span: info_span!("assigned_tasks"),
        }
    }

    /// Registry that logs under the span of its owning client.
    pub fn in_span(parent: &Span) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            span: info_span!(parent: parent, "assigned_tasks"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<StartableTask>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has(&self, task_id: &str) -> bool {
        self.lock().contains_key(task_id)
    }

    /// Start tracking a task.
    ///
    /// Task ids are unique upstream, so an existing entry means a caller
    /// handed the same task out twice. The new entry wins and the previous
    /// one is returned so the caller can see it happened.
    pub fn track(&self, task: Arc<StartableTask>) -> Option<Arc<StartableTask>> {
        let task_id = task.id().to_string();
        let previous = self.lock().insert(task_id.clone(), task);
        if previous.is_some() {
            error!(parent: &self.span, task_id = %task_id, "Task was already tracked, replacing entry");
        }
        previous
    }

    pub fn get(&self, task_id: &str) -> NodeClientResult<Arc<StartableTask>> {
        self.lock()
            .get(task_id)
            .cloned()
            .ok_or_else(|| NodeClientError::UnknownTask(task_id.to_string()))
    }

    pub fn untrack(&self, task_id: &str) -> NodeClientResult<Arc<StartableTask>> {
        self.lock()
            .remove(task_id)
            .ok_or_else(|| NodeClientError::UnknownTask(task_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}
