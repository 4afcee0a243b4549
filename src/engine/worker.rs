//! Worker pool and sweep loop feeding runs to the executor.

use std::{sync::Arc, time::Duration};

use tokio::runtime::Handle;
use tracing::{debug, error, trace};

use crate::{
    Result,
    common::{Queue, Shutdown},
    runtime::Executor,
    store::Store,
    utils::time::Clock,
};

/// Upper bound of runs enqueued by one sweep.
const SWEEP_BATCH: usize = 512;

/// Spawns `count` workers, each pulling run ids from `queue` and driving them.
pub(crate) fn spawn_workers(
    handle: &Handle,
    prefix: &str,
    count: usize,
    executor: Arc<Executor>,
    queue: Arc<Queue<String>>,
    shutdown: Arc<Shutdown>,
) {
    for n in 0..count {
        let worker = format!("{}-{}", prefix, n);
        let executor = executor.clone();
        let queue = queue.clone();
        let shutdown = shutdown.clone();

        handle.spawn(async move {
            debug!(worker = %worker, "worker started");
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    Some(run_id) = queue.next_async() => {
                        match executor.drive(&run_id, &worker).await {
                            Ok(Some(status)) => debug!(run_id = %run_id, worker = %worker, status = %status, "run left"),
                            Ok(None) => trace!(run_id = %run_id, worker = %worker, "run skipped"),
                            Err(err) => error!(run_id = %run_id, worker = %worker, "failed to drive run: {}", err),
                        }
                    }
                }
            }
            debug!(worker = %worker, "worker stopped");
        });
    }
}

/// Enqueues runs that are due and not held by a live lease.
///
/// # Returns
///
/// Number of runs handed to the queue. A full queue stops the sweep early;
/// the remaining runs are picked up by the next one.
pub(crate) fn sweep(
    store: &Store,
    clock: &dyn Clock,
    queue: &Queue<String>,
) -> Result<usize> {
    let due = store.due_runs(clock.now_millis(), SWEEP_BATCH)?;
    let mut sent = 0;
    for run in due {
        if queue.try_send(run.id).is_err() {
            debug!("dispatch queue is full, deferring to the next sweep");
            break;
        }
        sent += 1;
    }
    if sent > 0 {
        debug!(count = sent, "sweep enqueued runs");
    }
    Ok(sent)
}

pub(crate) fn spawn_sweeper(
    handle: &Handle,
    interval: Duration,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    queue: Arc<Queue<String>>,
    shutdown: Arc<Shutdown>,
) {
    handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    if let Err(err) = sweep(&store, clock.as_ref(), &queue) {
                        error!("sweep failed: {}", err);
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::{
            DbStore, MemStore,
            data::{Run, RunStatus},
        },
        utils::time::ManualClock,
    };

    #[test]
    fn test_sweep_enqueues_due_runs_until_full() {
        let store = Store::new();
        MemStore::new().init(&store).unwrap();
        for (id, resumes_at) in [("a", 0), ("b", 50), ("c", 5_000), ("d", 10)] {
            let run = Run {
                id: id.into(),
                wid: "w".into(),
                status: RunStatus::Waiting,
                resumes_at,
                ..Default::default()
            };
            store.runs().create(&run).unwrap();
        }
        let clock = ManualClock::new(100);

        let queue = Queue::new(2);
        assert_eq!(sweep(&store, &clock, &queue).unwrap(), 2);
        assert_eq!(queue.try_next().as_deref(), Some("a"));
        assert_eq!(queue.try_next().as_deref(), Some("d"));

        let queue = Queue::new(16);
        assert_eq!(sweep(&store, &clock, &queue).unwrap(), 3);
    }
}
