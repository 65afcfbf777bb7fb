use tokio::sync::mpsc::{self, error::TrySendError};

use crate::kafka::record::Record;

/// Records handed from the ingestion loop to the dispatch worker in one piece
pub type Batch = Vec<Record>;

#[derive(Debug)]
pub enum EnqueueError {
    /// The queue is at capacity; the batch is handed back for a retry
    Full(Batch),
    /// The worker dropped its end of the queue
    Closed(Batch),
}

/// Create the bounded single-producer, single-consumer queue between the
/// ingestion loop and the dispatch worker.
pub fn dispatch_queue(capacity: usize) -> (DispatchSender, DispatchReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (DispatchSender { tx }, DispatchReceiver { rx })
}

#[derive(Debug)]
pub struct DispatchSender {
    tx: mpsc::Sender<Batch>,
}

impl DispatchSender {
    /// Non-blocking enqueue, callable from a plain OS thread
    pub fn try_enqueue(&self, batch: Batch) -> Result<(), EnqueueError> {
        self.tx.try_send(batch).map_err(|e| match e {
            TrySendError::Full(batch) => EnqueueError::Full(batch),
            TrySendError::Closed(batch) => EnqueueError::Closed(batch),
        })
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

#[derive(Debug)]
pub struct DispatchReceiver {
    rx: mpsc::Receiver<Batch>,
}

impl DispatchReceiver {
    /// Next batch, or `None` once the sender is gone and the queue is drained
    pub async fn next_batch(&mut self) -> Option<Batch> {
        self.rx.recv().await
    }

    pub fn try_next_batch(&mut self) -> Option<Batch> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting new batches; already queued ones can still be received
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_queue_hands_batch_back() {
        let (tx, mut rx) = dispatch_queue(1);
        assert_eq!(tx.capacity(), 1);

        tx.try_enqueue(vec![Record::new_for_test("events", 0, 0)])
            .unwrap();
        match tx.try_enqueue(vec![Record::new_for_test("events", 0, 1)]) {
            Err(EnqueueError::Full(batch)) => assert_eq!(batch[0].offset(), 1),
            other => panic!("expected full queue, got {other:?}"),
        }

        let batch = rx.next_batch().await.unwrap();
        assert_eq!(batch[0].offset(), 0);

        drop(tx);
        assert!(rx.next_batch().await.is_none());
    }

    #[test]
    fn test_closed_queue_hands_batch_back() {
        let (tx, rx) = dispatch_queue(4);
        drop(rx);
        assert!(matches!(
            tx.try_enqueue(vec![Record::new_for_test("events", 0, 0)]),
            Err(EnqueueError::Closed(_))
        ));
    }
}
