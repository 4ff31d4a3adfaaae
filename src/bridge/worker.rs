//! Bridge handle for async submissions.

use super::loop_impl::run_bridge_loop;
use super::request::{Job, WorkItem};
use super::BridgeError;
use crate::error::ToolError;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Builds the session resource. Always invoked on the worker thread.
pub type BridgeFactory<R> = Arc<dyn Fn() -> Result<R, ToolError> + Send + Sync>;

/// Resolves once the worker has built (or failed to build) its resource.
pub type Ready = oneshot::Receiver<Result<(), BridgeError>>;

const STATE_RUNNING: u8 = 0;
const STATE_CLOSED: u8 = 1;
const STATE_FAULTED: u8 = 2;

/// State shared between a bridge handle and its worker thread.
#[derive(Debug, Default)]
pub(crate) struct BridgeHealth {
    state: AtomicU8,
    pending: AtomicUsize,
    busy: AtomicBool,
}

impl BridgeHealth {
    pub(crate) fn mark_faulted(&self) {
        self.state.store(STATE_FAULTED, Ordering::SeqCst);
    }

    fn mark_closed(&self) {
        // A faulted bridge stays faulted.
        let _ = self.state.compare_exchange(
            STATE_RUNNING,
            STATE_CLOSED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    fn is_faulted(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_FAULTED
    }

    fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_RUNNING
    }

    pub(crate) fn begin_item(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.busy.store(true, Ordering::SeqCst);
    }

    pub(crate) fn end_item(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// Handle to one session's dedicated worker.
///
/// `submit` enqueues synchronously, so the order in which `submit` returns
/// is the order in which the worker executes. The handle is `Send + Sync`
/// even when `R` is not: only boxed closures cross the channel.
pub struct ExecutionBridge<R> {
    name: String,
    tx: Mutex<Option<mpsc::Sender<WorkItem<R>>>>,
    health: Arc<BridgeHealth>,
    stopped: Mutex<Option<oneshot::Receiver<()>>>,
    max_queue_depth: usize,
}

impl<R: 'static> ExecutionBridge<R> {
    /// Start a worker thread named `name` and build its resource there.
    ///
    /// `max_queue_depth` bounds operations waiting behind the running one;
    /// `0` leaves the queue unbounded.
    pub fn spawn(
        name: impl Into<String>,
        factory: BridgeFactory<R>,
        max_queue_depth: usize,
    ) -> Result<(Self, Ready), BridgeError> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<WorkItem<R>>();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stopped_tx, stopped_rx) = oneshot::channel();
        let health = Arc::new(BridgeHealth::default());

        let worker_health = health.clone();
        let worker_name = name.clone();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                run_bridge_loop(&worker_name, factory, rx, worker_health, ready_tx);
                let _ = stopped_tx.send(());
            })
            .map_err(|e| BridgeError::Spawn(e.to_string()))?;

        debug!(worker = %name, max_queue_depth, "Spawned bridge worker");
        Ok((
            Self {
                name,
                tx: Mutex::new(Some(tx)),
                health,
                stopped: Mutex::new(Some(stopped_rx)),
                max_queue_depth,
            },
            ready_rx,
        ))
    }
}

impl<R> ExecutionBridge<R> {
    /// Worker thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `op` behind everything already submitted.
    pub fn submit<T, F>(&self, op: F) -> Result<Completion<T>, BridgeError>
    where
        F: FnOnce(&mut R) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(op, true)
    }

    /// Like [`submit`](Self::submit) but ignores the queue bound. Used for
    /// the release item, which must not be refused by a full queue.
    pub(crate) fn submit_unbounded<T, F>(&self, op: F) -> Result<Completion<T>, BridgeError>
    where
        F: FnOnce(&mut R) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(op, false)
    }

    fn enqueue<T, F>(&self, op: F, bounded: bool) -> Result<Completion<T>, BridgeError>
    where
        F: FnOnce(&mut R) -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.health.is_faulted() {
            return Err(BridgeError::Faulted);
        }
        let guard = lock(&self.tx);
        let tx = guard.as_ref().ok_or(BridgeError::Closed)?;

        let depth = self.health.pending.load(Ordering::SeqCst);
        if bounded && self.max_queue_depth > 0 && depth >= self.max_queue_depth {
            return Err(BridgeError::Busy(depth));
        }

        let (resp_tx, resp_rx) = oneshot::channel();
        let job: Job<R> = Box::new(move |resource: &mut R| {
            let _ = resp_tx.send(op(resource));
        });

        self.health.pending.fetch_add(1, Ordering::SeqCst);
        if tx.send(WorkItem::Run(job)).is_err() {
            self.health.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(if self.health.is_faulted() {
                BridgeError::Faulted
            } else {
                BridgeError::Closed
            });
        }
        Ok(Completion { rx: resp_rx })
    }

    /// Refuse further submissions and let the worker stop once the queue
    /// drains. Safe to call more than once.
    pub fn shutdown(&self) {
        let sender = lock(&self.tx).take();
        if let Some(tx) = sender {
            self.health.mark_closed();
            let _ = tx.send(WorkItem::Shutdown);
            debug!(worker = %self.name, "Bridge shutdown requested");
        }
    }

    /// Wait for the worker thread to exit. Returns `false` on timeout.
    ///
    /// Only the first caller actually waits; later calls return `true`.
    pub async fn wait_stopped(&self, timeout: Duration) -> bool {
        let rx = lock(&self.stopped).take();
        match rx {
            // An error means the thread unwound without signalling: it is gone.
            Some(rx) => tokio::time::timeout(timeout, rx).await.is_ok(),
            None => true,
        }
    }

    pub fn is_faulted(&self) -> bool {
        self.health.is_faulted()
    }

    /// Shut down or faulted.
    pub fn is_closed(&self) -> bool {
        !self.health.is_running()
    }

    /// Operations queued but not yet started.
    pub fn pending(&self) -> usize {
        self.health.pending.load(Ordering::SeqCst)
    }

    /// Nothing running and nothing queued.
    pub fn is_idle(&self) -> bool {
        self.pending() == 0 && !self.health.busy.load(Ordering::SeqCst)
    }
}

impl<R> std::fmt::Debug for ExecutionBridge<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionBridge")
            .field("name", &self.name)
            .field("health", &self.health)
            .field("max_queue_depth", &self.max_queue_depth)
            .finish()
    }
}

/// Reply for one submitted operation.
#[must_use = "a completion does nothing unless awaited"]
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Completion<T> {
    /// Wait for the worker to run the operation.
    pub async fn wait(self) -> Result<T, BridgeError> {
        self.rx.await.map_err(|_| BridgeError::Faulted)
    }

    /// Stop waiting after `timeout`. The operation itself is not
    /// interrupted and still runs to completion on the worker.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<T, BridgeError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(BridgeError::Faulted),
            Err(_) => Err(BridgeError::Timeout(timeout)),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
