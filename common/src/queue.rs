//! Work queue between the enumerator and the transfer workers.
//!
//! The queue is an unbounded MPMC channel: enqueueing never blocks, dequeueing waits until an
//! item is available. Memory is bounded by the enumerator's backpressure valve instead of by the
//! channel capacity.

use anyhow::anyhow;

/// Element of the transfer queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Object(store::ObjectRecord),
    /// Tells the worker that dequeues it to stop. One is enqueued per worker.
    EndOfStream,
}

#[derive(Debug, Clone)]
pub struct TransferQueue {
    send: async_channel::Sender<WorkItem>,
    recv: async_channel::Receiver<WorkItem>,
}

impl Default for TransferQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferQueue {
    pub fn new() -> Self {
        let (send, recv) = async_channel::unbounded();
        Self { send, recv }
    }

    /// Enqueues `item` and returns the queue depth right after.
    pub fn push(&self, item: WorkItem) -> anyhow::Result<usize> {
        self.send
            .try_send(item)
            .map_err(|_| anyhow!("transfer queue is closed"))?;
        Ok(self.send.len())
    }

    /// Dequeues the oldest item, waiting while the queue is empty.
    pub async fn pop(&self) -> anyhow::Result<WorkItem> {
        self.recv
            .recv()
            .await
            .map_err(|_| anyhow!("transfer queue is closed"))
    }

    pub fn len(&self) -> usize {
        self.send.len()
    }

    pub fn is_empty(&self) -> bool {
        self.send.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str) -> store::ObjectRecord {
        store::ObjectRecord {
            key: key.to_string(),
            fingerprint: format!("fp-{key}"),
            size_hint: None,
        }
    }

    #[tokio::test]
    async fn fifo_order_and_depth() -> anyhow::Result<()> {
        let queue = TransferQueue::new();
        assert_eq!(queue.push(WorkItem::Object(record("a")))?, 1);
        assert_eq!(queue.push(WorkItem::Object(record("b")))?, 2);
        assert_eq!(queue.push(WorkItem::EndOfStream)?, 3);
        assert_eq!(queue.pop().await?, WorkItem::Object(record("a")));
        assert_eq!(queue.pop().await?, WorkItem::Object(record("b")));
        assert_eq!(queue.pop().await?, WorkItem::EndOfStream);
        assert!(queue.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn pop_waits_for_push() -> anyhow::Result<()> {
        let queue = TransferQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        assert!(!consumer.is_finished());
        queue.push(WorkItem::EndOfStream)?;
        assert_eq!(consumer.await??, WorkItem::EndOfStream);
        Ok(())
    }
}
