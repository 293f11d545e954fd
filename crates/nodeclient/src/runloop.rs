//! Async execution context owned by one node connection.
//!
//! The scheduler is a plain thread. Network calls and the event stream of a
//! remote node run as units on a dedicated single-worker tokio runtime.
//! Units can be submitted from any thread; each can carry a completion
//! callback and a stopper that gets a chance to wind the unit down before
//! it is aborted on shutdown.

use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Span};

use crate::error::{NodeClientError, NodeClientResult};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(5000);

/// How a unit ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitOutcome {
    Completed,
    Failed(String),
    Cancelled,
    Panicked,
}

pub type DoneCallback = Box<dyn FnOnce(&UnitOutcome) + Send + 'static>;
pub type Stopper = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send + 'static>;

struct Outstanding {
    abort: AbortHandle,
    stopper: Option<Stopper>,
    finished: CancellationToken,
}

#[derive(Default)]
struct LoopState {
    stopping: bool,
    next_id: u64,
    outstanding: HashMap<u64, Outstanding>,
}

fn lock(state: &Mutex<LoopState>) -> MutexGuard<'_, LoopState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct NodeClientLoop {
    name: String,
    span: Span,
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    state: Arc<Mutex<LoopState>>,
    halted: CancellationToken,
    shutdown_timeout: Duration,
}

impl NodeClientLoop {
    pub fn new(name: &str) -> NodeClientResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(format!("nodeclient-{name}"))
            .enable_all()
            .build()
            .map_err(|e| {
                NodeClientError::Action(format!("failed to create event loop for {name}: {e}"))
            })?;

        Ok(Self {
            name: name.to_string(),
            span: info_span!("nodeclient_loop", node = %name),
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            state: Arc::new(Mutex::new(LoopState::default())),
            halted: CancellationToken::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        })
    }

    /// Bound for each stopper and for runtime teardown.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_stopping(&self) -> bool {
        lock(&self.state).stopping
    }

    /// Number of units that have not finished yet.
    pub fn outstanding(&self) -> usize {
        lock(&self.state).outstanding.len()
    }

    pub fn submit<F>(&self, unit: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.submit_with(unit, None, None)
    }

    /// Schedule `unit` on the loop. Returns false, and drops the unit
    /// without running it, once the loop is stopping.
    pub fn submit_with<F>(
        &self,
        unit: F,
        on_done: Option<DoneCallback>,
        stopper: Option<Stopper>,
    ) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut state = lock(&self.state);
        if state.stopping {
            warn!(parent: &self.span, "Unit submitted after loop stopped, it will never start");
            return false;
        }

        let id = state.next_id;
        state.next_id += 1;
        let finished = CancellationToken::new();
        let join = self.handle.spawn(unit);
        state.outstanding.insert(
            id,
            Outstanding {
                abort: join.abort_handle(),
                stopper,
                finished: finished.clone(),
            },
        );
        self.handle.spawn(watch(
            id,
            join,
            on_done,
            self.state.clone(),
            finished,
            self.span.clone(),
        ));
        true
    }

    /// Run `fut` on the loop and wait for its output on the calling thread.
    ///
    /// Must not be called from inside an async context.
    pub fn call_blocking<F, T>(&self, fut: F) -> NodeClientResult<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if Handle::try_current().is_ok() {
            return Err(NodeClientError::Action(format!(
                "blocking call on loop {} made from an async context",
                self.name
            )));
        }

        let (tx, rx) = oneshot::channel();
        let submitted = self.submit(async move {
            let _ = tx.send(fut.await);
            anyhow::Ok(())
        });
        if !submitted {
            return Err(NodeClientError::Action(format!(
                "node client loop {} is stopped",
                self.name
            )));
        }
        rx.blocking_recv().map_err(|_| {
            NodeClientError::Action(format!("call on loop {} was cancelled", self.name))
        })
    }

    /// Stop the loop. New submissions are rejected from here on. Every
    /// outstanding unit gets its stopper run, then is aborted, one unit at
    /// a time. When called from a plain thread this waits for all of that
    /// to finish.
    pub fn stop(&self) {
        let drained: Vec<Outstanding> = {
            let mut state = lock(&self.state);
            if state.stopping {
                debug!(parent: &self.span, "Loop already stopping");
                return;
            }
            state.stopping = true;
            state.outstanding.drain().map(|(_, unit)| unit).collect()
        };

        info!(parent: &self.span, units = drained.len(), "Stopping node client loop");
        let span = self.span.clone();
        let halted = self.halted.clone();
        let timeout = self.shutdown_timeout;
        let (done_tx, done_rx) = oneshot::channel::<()>();
        self.handle.spawn(async move {
            for unit in drained {
                cancel_unit(unit, timeout, &span).await;
            }
            halted.cancel();
            let _ = done_tx.send(());
        });

        if Handle::try_current().is_err() {
            let _ = done_rx.blocking_recv();
        }
    }

    /// Block the calling thread until [`NodeClientLoop::stop`] has finished,
    /// then tear the runtime down.
    pub fn run(&self) {
        if Handle::try_current().is_ok() {
            error!(parent: &self.span, "Loop cannot be run from inside an async context");
            return;
        }
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(runtime) = runtime else {
            warn!(parent: &self.span, "Loop was already run");
            return;
        };

        debug!(parent: &self.span, "Node client loop running");
        runtime.block_on(self.halted.cancelled());

        let timeout = self.shutdown_timeout;
        if catch_unwind(AssertUnwindSafe(move || runtime.shutdown_timeout(timeout))).is_err() {
            error!(parent: &self.span, "Unexpected error while tearing down the loop runtime");
        }
        info!(parent: &self.span, "Node client loop stopped");
    }

    /// Run the loop on a dedicated thread.
    pub fn spawn_thread(self: &Arc<Self>) -> std::io::Result<thread::JoinHandle<()>> {
        let runloop = self.clone();
        thread::Builder::new()
            .name(format!("nodeclient-loop-{}", self.name))
            .spawn(move || runloop.run())
    }
}

impl Drop for NodeClientLoop {
    fn drop(&mut self) {
        let runtime = self
            .runtime
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
    }
}

async fn watch(
    id: u64,
    join: JoinHandle<anyhow::Result<()>>,
    on_done: Option<DoneCallback>,
    state: Arc<Mutex<LoopState>>,
    finished: CancellationToken,
    span: Span,
) {
    let outcome = match join.await {
        Ok(Ok(())) => UnitOutcome::Completed,
        Ok(Err(err)) => {
            let reason = format!("{err:#}");
            error!(parent: &span, error = %reason, "Unit ended in unexpected error");
            UnitOutcome::Failed(reason)
        }
        Err(err) if err.is_cancelled() => UnitOutcome::Cancelled,
        Err(err) => {
            error!(parent: &span, error = %err, "Unit panicked");
            UnitOutcome::Panicked
        }
    };

    if let Some(on_done) = on_done {
        if catch_unwind(AssertUnwindSafe(|| on_done(&outcome))).is_err() {
            error!(parent: &span, "Unit completion callback panicked");
        }
    }

    lock(&state).outstanding.remove(&id);
    finished.cancel();
}

async fn cancel_unit(unit: Outstanding, timeout: Duration, span: &Span) {
    if let Some(stopper) = unit.stopper {
        match catch_unwind(AssertUnwindSafe(stopper)) {
            Ok(stopping) => {
                match tokio::time::timeout(timeout, AssertUnwindSafe(stopping).catch_unwind()).await
                {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(err))) => {
                        let reason = format!("{err:#}");
                        warn!(parent: span, error = %reason, "Unit stopper failed");
                    }
                    Ok(Err(_)) => error!(parent: span, "Unit stopper panicked"),
                    Err(_) => warn!(parent: span, "Unit stopper timed out"),
                }
            }
            Err(_) => error!(parent: span, "Unit stopper panicked"),
        }
    }

    unit.abort.abort();
    if tokio::time::timeout(timeout, unit.finished.cancelled())
        .await
        .is_err()
    {
        warn!(parent: span, "Unit did not acknowledge cancellation");
    }
}
