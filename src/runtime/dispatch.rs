// src/runtime/dispatch.rs
//! Program-side handler dispatch.
//!
//! Non-async handler bodies are queued per priority and executed one at a
//! time by a single worker task that always drains `High` before `Standard`
//! before `Bulk`. Every queued job and spawned task holds an `InFlightGuard`
//! so a program can wait until it has gone quiet.
use crate::runtime::event::Priority;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::trace;

/// Counts outstanding work.
#[derive(Debug)]
pub struct InFlight {
    count: Arc<watch::Sender<usize>>,
}

impl Default for InFlight {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlight {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { count: Arc::new(tx) }
    }

    pub fn enter(&self) -> InFlightGuard {
        self.count.send_modify(|n| *n += 1);
        InFlightGuard {
            count: self.count.clone(),
        }
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolves once nothing is in flight.
    pub async fn idle(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

pub struct InFlightGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }
}

pub type Job = BoxFuture<'static, ()>;

struct Queued {
    job: Job,
    _guard: InFlightGuard,
}

/// Sequential, priority-ordered job runner.
pub struct Dispatcher {
    queues: [mpsc::UnboundedSender<Queued>; 3],
    worker: JoinHandle<()>,
}

impl Dispatcher {
    pub fn spawn(handle: &Handle) -> Self {
        let (high_tx, high) = mpsc::unbounded_channel();
        let (standard_tx, standard) = mpsc::unbounded_channel();
        let (bulk_tx, bulk) = mpsc::unbounded_channel();
        let worker = handle.spawn(drain(high, standard, bulk));
        Self {
            queues: [high_tx, standard_tx, bulk_tx],
            worker,
        }
    }

    /// Queues `job`; the guard keeps the job counted until it has run.
    pub fn enqueue(&self, priority: Priority, job: Job, guard: InFlightGuard) {
        let queued = Queued { job, _guard: guard };
        // Fails only after shutdown; the job and its guard are dropped.
        if self.queues[priority.index()].send(queued).is_err() {
            trace!(?priority, "dispatcher closed, job dropped");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn drain(
    mut high: mpsc::UnboundedReceiver<Queued>,
    mut standard: mpsc::UnboundedReceiver<Queued>,
    mut bulk: mpsc::UnboundedReceiver<Queued>,
) {
    loop {
        let queued = tokio::select! {
            biased;
            Some(q) = high.recv() => q,
            Some(q) = standard.recv() => q,
            Some(q) = bulk.recv() => q,
            else => break,
        };
        queued.job.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_jobs_drain_by_priority() {
        let in_flight = InFlight::new();
        let dispatcher = Dispatcher::spawn(&Handle::current());
        let order = Arc::new(Mutex::new(Vec::new()));
        // Block the worker until everything is queued.
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        dispatcher.enqueue(
            Priority::Standard,
            async move {
                let _ = release_rx.await;
            }
            .boxed(),
            in_flight.enter(),
        );
        tokio::task::yield_now().await;
        for (priority, tag) in [
            (Priority::Bulk, "bulk"),
            (Priority::Standard, "standard"),
            (Priority::High, "high"),
        ] {
            let order = order.clone();
            dispatcher.enqueue(priority, async move { order.lock().push(tag) }.boxed(), in_flight.enter());
        }
        assert_eq!(in_flight.count(), 4);
        release_tx.send(()).unwrap();
        in_flight.idle().await;
        assert_eq!(*order.lock(), vec!["high", "standard", "bulk"]);
    }

    #[tokio::test]
    async fn test_idle_when_nothing_queued() {
        let in_flight = InFlight::new();
        in_flight.idle().await;
        let guard = in_flight.enter();
        assert_eq!(in_flight.count(), 1);
        drop(guard);
        assert_eq!(in_flight.count(), 0);
    }
}
