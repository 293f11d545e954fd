//! Terminal handling shared by the local and remote clients.
//!
//! Order is fixed: release resources, (remote only) retrieve results, close
//! the task context, report to the state controller, untrack. Release and
//! close failures are logged and never stop the report or the untrack.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, warn, Span};

use crate::assigned::AssignedTasks;
use crate::context::NodeContext;
use crate::startable::StartableTask;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Terminal {
    Done,
    Failed,
}

/// Take a tracked task for terminal handling. `None` when the task is not
/// tracked here or another trigger already claimed it.
pub(crate) fn claim(tasks: &AssignedTasks, task_id: &str, span: &Span) -> Option<Arc<StartableTask>> {
    match tasks.get(task_id) {
        Ok(task) if task.claim_terminal() => Some(task),
        Ok(_) => None,
        Err(err) => {
            debug!(parent: span, task_id, error = %err, "Terminal state for a task that is not tracked");
            None
        }
    }
}

pub(crate) fn release(task: &StartableTask) {
    contained(task.span(), "release task resources", || task.release_resources());
}

pub(crate) fn finish(ctx: &NodeContext, tasks: &AssignedTasks, task: &StartableTask, outcome: Terminal) {
    contained(task.span(), "close started task context", || task.close());

    let reported = catch_unwind(AssertUnwindSafe(|| match outcome {
        Terminal::Done => ctx.state_controller.task_done(task.id(), task.analysis_id()),
        Terminal::Failed => ctx.state_controller.task_failed(task.id(), task.analysis_id()),
    }));
    if reported.is_err() {
        error!(parent: task.span(), ?outcome, "State controller panicked while reporting task");
    }

    if let Err(err) = tasks.untrack(task.id()) {
        warn!(parent: task.span(), error = %err, "Finished task was no longer tracked");
    }
}

fn contained(span: &Span, action: &str, step: impl FnOnce() -> anyhow::Result<()>) {
    match catch_unwind(AssertUnwindSafe(step)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            let reason = format!("{err:#}");
            error!(parent: span, error = %reason, "Failed to {action}");
        }
        Err(_) => error!(parent: span, "Unexpected panic while trying to {action}"),
    }
}
