// Blocking worker pool
//
// Fixed set of named OS threads fed through a crossbeam channel. Each job is
// run under a panic guard and reports back over a oneshot, so a panicking
// closure never takes its worker down.

use super::EngineError;
use crossbeam_channel::{Receiver, Sender};
use iptv_core::application::execute_guarded;
use std::panic::AssertUnwindSafe;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type BlockingJob = Box<dyn FnOnce() + Send + 'static>;

pub struct BlockingPool {
    sender: Option<Sender<BlockingJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl BlockingPool {
    /// Spawn `size` worker threads (at least one)
    pub fn new(size: usize) -> Result<Self, EngineError> {
        let size = size.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded::<BlockingJob>();

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("iptv-blocking-{id}"))
                .spawn(move || worker_loop(id, receiver))
                .map_err(|e| EngineError::Blocking(format!("failed to spawn worker {id}: {e}")))?;
            workers.push(handle);
        }

        info!(workers = size, "Blocking pool started");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Run `f` on a worker thread and await its value
    ///
    /// A panic inside `f` is returned as `EngineError::WorkerPanicked`.
    pub async fn run<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(EngineError::PoolShutdown)?;
        let (tx, rx) = oneshot::channel();

        let job: BlockingJob = Box::new(move || {
            let outcome = execute_guarded(AssertUnwindSafe(f));
            // Receiver gone means the caller stopped waiting
            let _ = tx.send(outcome);
        });
        sender.send(job).map_err(|_| EngineError::PoolShutdown)?;

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(EngineError::WorkerPanicked(message)),
            Err(_) => Err(EngineError::PoolShutdown),
        }
    }

    /// Stop accepting work, let queued jobs finish and join every worker
    pub async fn shutdown(mut self) {
        self.sender.take();
        let workers = std::mem::take(&mut self.workers);
        let count = workers.len();

        let joined = tokio::task::spawn_blocking(move || join_all(workers)).await;
        if let Err(e) = joined {
            warn!(error = %e, "Blocking pool join task failed");
        }
        info!(workers = count, "Blocking pool stopped");
    }
}

impl Drop for BlockingPool {
    fn drop(&mut self) {
        // Closing the channel ends every worker loop once the queue drains
        self.sender.take();
        if self.workers.is_empty() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            // Joining here would block an async worker thread
            debug!(workers = self.workers.len(), "Blocking pool dropped inside runtime, detaching workers");
            self.workers.clear();
        } else {
            join_all(std::mem::take(&mut self.workers));
        }
    }
}

fn worker_loop(id: usize, receiver: Receiver<BlockingJob>) {
    debug!(worker_id = id, "Blocking worker started");
    while let Ok(job) = receiver.recv() {
        job();
    }
    debug!(worker_id = id, "Blocking worker exiting");
}

fn join_all(workers: Vec<JoinHandle<()>>) {
    for handle in workers {
        if handle.join().is_err() {
            warn!("Blocking worker terminated abnormally");
        }
    }
}
