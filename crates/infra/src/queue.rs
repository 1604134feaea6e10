//! In-memory work queue of job ids.
//!
//! At-most-once: an id is gone once dequeued, whatever happens to the job
//! afterwards.

use forgejobs_core::JobId;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("job queue closed; {0} was not enqueued")]
pub struct QueueClosed(pub JobId);

/// Producer half; cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<JobId>,
}

/// Consumer half, owned by the worker.
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<JobId>,
}

pub fn job_queue() -> (JobQueue, JobReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (JobQueue { tx }, JobReceiver { rx })
}

impl JobQueue {
    pub fn enqueue(&self, id: JobId) -> Result<(), QueueClosed> {
        self.tx.send(id).map_err(|_| QueueClosed(id))
    }
}

impl JobReceiver {
    /// Wait for the next id; `None` once every producer is dropped.
    pub async fn recv(&mut self) -> Option<JobId> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_until_closed() {
        let (queue, mut rx) = job_queue();
        let a = JobId::new();
        let b = JobId::new();
        queue.enqueue(a).unwrap();
        queue.clone().enqueue(b).unwrap();
        drop(queue);

        assert_eq!(rx.recv().await, Some(a));
        assert_eq!(rx.recv().await, Some(b));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn enqueue_after_receiver_dropped_fails() {
        let (queue, rx) = job_queue();
        drop(rx);
        let id = JobId::new();
        assert_eq!(queue.enqueue(id), Err(QueueClosed(id)));
    }
}
