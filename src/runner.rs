//! Deferred completion runner.
//!
//! Request handlers and completion callbacks never run on the receive
//! dispatcher or on timer contexts; they run here, on one serialized
//! worker task fed through a channel. Within one runner, deliveries
//! happen in the order the dispatcher enqueued them.
//!
//! # Architecture
//!
//! ```text
//! dispatcher ─┐
//! timeouts   ─┼─► mpsc::UnboundedSender<Arc<Operation>> ─► runner task
//! ```
//!
//! The runner task exits when every [`RunnerHandle`] has been dropped,
//! which is how the process tears the core down.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::operation::Operation;

/// Handle for enqueueing completions onto the runner task.
///
/// Cheaply cloneable; every connection sharing one runner holds a clone.
#[derive(Clone)]
pub struct RunnerHandle {
    tx: mpsc::UnboundedSender<Arc<Operation>>,
}

impl RunnerHandle {
    /// Queue an operation for delivery. Returns false when the runner
    /// task has already exited.
    pub(crate) fn enqueue(&self, operation: Arc<Operation>) -> bool {
        self.tx.send(operation).is_ok()
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Arc<Operation>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// Spawn the completion runner task.
///
/// Returns the handle used to feed it and the task's `JoinHandle`; the
/// task completes once all handles are gone and the queue drains.
pub fn spawn_runner() -> (RunnerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_loop(rx));
    (RunnerHandle { tx }, task)
}

async fn run_loop(mut rx: mpsc::UnboundedReceiver<Arc<Operation>>) {
    while let Some(operation) = rx.recv().await {
        operation.deliver();
        if !operation.is_outgoing() {
            // The dispatcher's reference to an incoming operation is the
            // creator's; release it once delivery is done.
            Operation::put(operation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runner_exits_when_all_handles_drop() {
        let (handle, task) = spawn_runner();
        let second = handle.clone();
        drop(handle);
        drop(second);
        task.await.unwrap();
    }
}
