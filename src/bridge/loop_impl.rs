//! Bridge worker loop.

use super::request::WorkItem;
use super::worker::{BridgeFactory, BridgeHealth};
use super::BridgeError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Run the worker loop on the current (dedicated) thread.
///
/// Builds the resource, reports readiness, then executes work items one at
/// a time in channel order until `Shutdown` is received, every sender is
/// gone, or an operation panics. A panic poisons the bridge: the receiver is
/// dropped so queued replies resolve as faulted, and the resource is
/// discarded without any further calls.
pub(crate) fn run_bridge_loop<R: 'static>(
    name: &str,
    factory: BridgeFactory<R>,
    rx: mpsc::Receiver<WorkItem<R>>,
    health: Arc<BridgeHealth>,
    ready: oneshot::Sender<Result<(), BridgeError>>,
) {
    let built = panic::catch_unwind(AssertUnwindSafe(|| (*factory)()));
    let mut resource = match built {
        Ok(Ok(resource)) => {
            info!(worker = %name, "Session resource initialized");
            let _ = ready.send(Ok(()));
            resource
        }
        Ok(Err(e)) => {
            error!(worker = %name, error = %e, "Failed to initialize session resource");
            health.mark_faulted();
            let _ = ready.send(Err(BridgeError::InitFailed(e.to_string())));
            return;
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!(worker = %name, panic = %msg, "Resource factory panicked");
            health.mark_faulted();
            let _ = ready.send(Err(BridgeError::InitFailed(msg)));
            return;
        }
    };

    let mut executed: u64 = 0;
    let mut poisoned = false;
    while let Ok(item) = rx.recv() {
        match item {
            WorkItem::Run(job) => {
                health.begin_item();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(&mut resource)));
                health.end_item();
                executed += 1;
                if let Err(payload) = outcome {
                    error!(
                        worker = %name,
                        panic = %panic_message(payload.as_ref()),
                        "Operation panicked, poisoning bridge"
                    );
                    health.mark_faulted();
                    poisoned = true;
                    break;
                }
            }
            WorkItem::Shutdown => {
                debug!(worker = %name, executed, "Shutdown requested");
                break;
            }
        }
    }

    // Unrun items drop their reply senders here.
    drop(rx);

    if poisoned {
        if panic::catch_unwind(AssertUnwindSafe(move || drop(resource))).is_err() {
            warn!(worker = %name, "Discarding poisoned resource panicked");
        }
    } else {
        drop(resource);
    }
    info!(worker = %name, executed, poisoned, "Bridge worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
