//! Work items carried from callers to a bridge worker.

/// Boxed operation run against the worker-owned resource.
///
/// The closure is `Send` so it can cross into the worker thread; the
/// resource it receives never has to be.
pub type Job<R> = Box<dyn FnOnce(&mut R) + Send + 'static>;

/// Messages consumed by the worker loop, in channel order.
pub enum WorkItem<R> {
    /// Run one operation. The reply channel is captured inside the job.
    Run(Job<R>),
    /// Stop after everything queued before this item has run.
    Shutdown,
}

impl<R> std::fmt::Debug for WorkItem<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkItem::Run(_) => f.write_str("WorkItem::Run"),
            WorkItem::Shutdown => f.write_str("WorkItem::Shutdown"),
        }
    }
}
