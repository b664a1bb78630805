//! Worker pool and serialization contexts
//!
//! [`Runtime`] owns a fixed-size tokio worker pool. Work spawned through it
//! is tracked so [`Runtime::stop`] can wait for it before joining the
//! workers, and panics are logged instead of taking the daemon down.
//!
//! [`Strand`] runs posted tasks one at a time in submission order on top of
//! whatever runtime it was created on.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::constants::runtime::{MAX_WORKERS, SHUTDOWN_GRACE, WORKER_THREAD_NAME};
use crate::error::{BiometryError, Result};

/// A unit of work posted to a dispatcher
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Execution context accepting tasks
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, task: Task);
}

pub type DispatcherPtr = Arc<dyn Dispatcher>;

pub(crate) fn log_join_error(context: &str, e: tokio::task::JoinError) {
    if e.is_panic() {
        let payload = e.into_panic();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        error!("{}: task panicked: {}", context, message);
    } else {
        debug!("{}: task cancelled", context);
    }
}

// ============================================================================
// Strand
// ============================================================================

/// Serializing dispatcher: tasks run one after another, never concurrently
pub struct Strand {
    queue: mpsc::UnboundedSender<Task>,
}

impl Strand {
    /// Create a strand draining on the given runtime
    pub fn new(handle: &Handle) -> Arc<Self> {
        let (queue, mut rx) = mpsc::unbounded_channel::<Task>();
        let runner = handle.clone();
        handle.spawn(async move {
            while let Some(task) = rx.recv().await {
                // Each task gets its own tokio task so a panic is contained,
                // and is awaited before the next one starts
                if let Err(e) = runner.spawn(task).await {
                    log_join_error("strand", e);
                }
            }
            debug!("Strand drained");
        });
        Arc::new(Self { queue })
    }

    /// Create a strand on the current runtime
    pub fn current() -> Result<Arc<Self>> {
        let handle = Handle::try_current()
            .map_err(|e| BiometryError::generic(format!("no runtime for strand: {}", e)))?;
        Ok(Self::new(&handle))
    }
}

impl Dispatcher for Strand {
    fn dispatch(&self, task: Task) {
        if self.queue.send(task).is_err() {
            error!("Strand is closed, dropping task");
        }
    }
}

// ============================================================================
// Runtime
// ============================================================================

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self.clone())
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Decrements the in-flight count even when the task panics
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Spawns work counted against a runtime's in-flight set, so
/// [`Runtime::stop`] waits for it instead of dropping it.
#[derive(Clone)]
pub struct Tracker {
    handle: Handle,
    in_flight: Arc<InFlight>,
}

impl Tracker {
    /// Tracker on the current runtime with its own in-flight set
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| BiometryError::generic(format!("no runtime for tracker: {}", e)))?;
        Ok(Self {
            handle,
            in_flight: Arc::new(InFlight::default()),
        })
    }

    /// Spawn `future`. The count is released even if it panics.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let guard = self.in_flight.enter();
        self.handle.spawn(async move {
            let _guard = guard;
            future.await
        })
    }

    /// Number of spawned tasks still running
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Fixed-size worker pool with explicit start and stop
pub struct Runtime {
    workers: usize,
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
    in_flight: Arc<InFlight>,
}

impl Runtime {
    /// Size the pool; no threads exist until [`Runtime::start`]
    pub fn with_workers(workers: usize) -> Result<Self> {
        if workers == 0 || workers > MAX_WORKERS {
            return Err(BiometryError::InvalidConfig {
                field: "workers".into(),
                reason: format!("must be between 1 and {}", MAX_WORKERS),
            });
        }
        Ok(Self {
            workers,
            runtime: Mutex::new(None),
            in_flight: Arc::new(InFlight::default()),
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    pub fn start(&self) -> Result<()> {
        let mut slot = self.runtime.lock();
        if slot.is_some() {
            return Ok(());
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.workers)
            .thread_name(WORKER_THREAD_NAME)
            .enable_all()
            .build()?;
        info!("Started runtime with {} workers", self.workers);
        *slot = Some(runtime);
        Ok(())
    }

    pub fn handle(&self) -> Result<Handle> {
        self.runtime
            .lock()
            .as_ref()
            .map(|rt| rt.handle().clone())
            .ok_or_else(|| BiometryError::generic("runtime is not running"))
    }

    /// Tracker spawning onto this pool and counted by [`Runtime::stop`]
    pub fn tracker(&self) -> Result<Tracker> {
        Ok(Tracker {
            handle: self.handle()?,
            in_flight: self.in_flight.clone(),
        })
    }

    /// Run tracked work on the pool. A panic is logged and the pool keeps going.
    pub fn spawn<F>(&self, future: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tracker = self.tracker()?;
        let task = tracker.spawn(future);
        tracker.handle.spawn(async move {
            if let Err(e) = task.await {
                log_join_error("worker", e);
            }
        });
        Ok(())
    }

    /// Drive a future to completion on the pool from outside of it
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        let handle = self.handle()?;
        Ok(handle.block_on(future))
    }

    /// Wait for tracked work to finish, then shut the workers down and join them.
    /// Must not be called from a worker thread.
    pub fn stop(&self) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };
        let in_flight = self.in_flight.clone();
        runtime.block_on(async move { in_flight.wait_idle().await });
        runtime.shutdown_timeout(SHUTDOWN_GRACE);
        info!("Runtime stopped");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Dispatcher for Runtime {
    fn dispatch(&self, task: Task) {
        if let Err(e) = self.spawn(task) {
            error!("Dropping task: {}", e);
        }
    }
}
