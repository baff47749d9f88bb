//! One-at-a-time task queue
//!
//! Jobs run on a single background consumer in submission order; a job
//! starts only after the previous one has finished. Used for the block-list
//! cascade so overlapping block and unblock notifications never interleave
//! their recomputation sweeps.

use std::future::Future;
use std::pin::Pin;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

enum Command {
    Run(Job),
    Flush(oneshot::Sender<()>),
}

/// Serialized FIFO of async jobs
pub struct SerialQueue {
    command_tx: mpsc::UnboundedSender<Command>,
    consumer: JoinHandle<()>,
}

impl SerialQueue {
    /// Start the consumer on `runtime`
    pub fn spawn(runtime: &Handle) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let consumer = runtime.spawn(Self::consumer_loop(command_rx));
        Self { command_tx, consumer }
    }

    /// Append a job; returns `false` if the consumer has stopped
    pub fn enqueue<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.command_tx.send(Command::Run(Box::pin(job))).is_ok()
    }

    /// Wait until every job enqueued before this call has finished
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.command_tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    async fn consumer_loop(mut command_rx: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!("serial queue consumer started");
        while let Some(command) = command_rx.recv().await {
            match command {
                Command::Run(job) => job.await,
                Command::Flush(done_tx) => {
                    let _ = done_tx.send(());
                }
            }
        }
        tracing::debug!("serial queue consumer stopped");
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}
