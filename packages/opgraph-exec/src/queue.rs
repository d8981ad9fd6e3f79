//! FIFO execution queue backed by one worker thread.
//!
//! Tasks run strictly in submission order; there is no intra-queue
//! reordering. A queue models one asynchronous device stream.

use crate::error::{ExecError, Result};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, sync_channel, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, trace};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Shutdown,
}

pub struct ExecutionQueue {
    name: String,
    sender: Mutex<Sender<Message>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    submitted: AtomicU64,
    completed: Arc<AtomicU64>,
}

impl ExecutionQueue {
    /// Start a queue with its own worker thread
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = channel::<Message>();
        let completed = Arc::new(AtomicU64::new(0));
        let worker_completed = Arc::clone(&completed);
        let thread_name = name.clone();

        let worker = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    match message {
                        Message::Run(task) => {
                            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                                error!(queue = %thread_name, "queue task panicked");
                            }
                            worker_completed.fetch_add(1, Ordering::Release);
                        }
                        Message::Shutdown => break,
                    }
                }
            })
            .map_err(|e| {
                ExecError::precondition(format!("failed to spawn queue worker '{}': {}", name, e))
            })?;

        Ok(Self {
            name,
            sender: Mutex::new(sender),
            worker: Mutex::new(Some(worker)),
            submitted: AtomicU64::new(0),
            completed,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a task behind everything submitted so far
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> Result<()> {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.sender
            .lock()
            .send(Message::Run(Box::new(task)))
            .map_err(|_| ExecError::precondition(format!("queue '{}' is shut down", self.name)))
    }

    /// Block the calling thread until every task submitted before this call
    /// has finished
    pub fn synchronize(&self) -> Result<()> {
        let (tx, rx) = sync_channel::<()>(1);
        self.submit(move || {
            let _ = tx.send(());
        })?;
        trace!(queue = %self.name, "synchronize");
        rx.recv()
            .map_err(|_| ExecError::precondition(format!("queue '{}' dropped a barrier", self.name)))
    }

    /// Tasks submitted but not yet finished
    pub fn pending(&self) -> u64 {
        let submitted = self.submitted.load(Ordering::Relaxed);
        let completed = self.completed.load(Ordering::Acquire);
        submitted.saturating_sub(completed)
    }
}

impl Drop for ExecutionQueue {
    fn drop(&mut self) {
        let _ = self.sender.lock().send(Message::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for ExecutionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionQueue")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}
