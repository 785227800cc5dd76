//! Bounded worker pool for inbound message processing.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{RpcError, RpcResult};

/// A unit of work handed to the pool.
pub type WorkerTask = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of workers draining one FIFO queue.
///
/// Tasks submitted after [`WorkerPool::shutdown`] are rejected; shutdown
/// itself drains whatever is already queued and then joins the workers.
pub struct WorkerPool {
    queue: Mutex<Option<mpsc::Sender<WorkerTask>>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(max_workers: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<WorkerTask>(queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let mut workers = Vec::with_capacity(max_workers.max(1));
        for worker_index in 0..max_workers.max(1) {
            let receiver = Arc::clone(&receiver);
            workers.push(tokio::spawn(async move {
                loop {
                    let task = {
                        let mut receiver = receiver.lock().await;
                        receiver.recv().await
                    };
                    match task {
                        Some(task) => task(),
                        None => break,
                    }
                }
                debug!(worker_index, "worker exiting");
            }));
        }

        Self {
            queue: Mutex::new(Some(sender)),
            workers: tokio::sync::Mutex::new(workers),
        }
    }

    /// Enqueue a task. Fails once the pool is shut down or the queue bound
    /// is reached.
    pub fn execute(&self, task: WorkerTask) -> RpcResult<()> {
        let queue = self.queue.lock().expect("worker queue poisoned");
        match queue.as_ref() {
            Some(sender) => sender
                .try_send(task)
                .map_err(|_| RpcError::runtime("worker queue full")),
            None => Err(RpcError::runtime("worker pool is shut down")),
        }
    }

    /// Close the queue, let workers drain it, then join them.
    pub async fn shutdown(&self) {
        let sender = self.queue.lock().expect("worker queue poisoned").take();
        drop(sender);
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
    }
}
