use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatch::queue::DispatchReceiver;
use crate::dispatch::Dispatcher;

/// Drains the dispatch queue one batch at a time.
///
/// The worker runs until the ingestion loop drops its sender and the queue is
/// empty, or until `abort` fires. A graceful shutdown therefore finishes every
/// batch that made it into the queue.
pub struct DispatchWorker {
    receiver: DispatchReceiver,
    dispatcher: Dispatcher,
    abort: CancellationToken,
}

impl DispatchWorker {
    pub fn new(
        receiver: DispatchReceiver,
        dispatcher: Dispatcher,
        abort: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            dispatcher,
            abort,
        }
    }

    pub async fn run(mut self) {
        info!(mode = %self.dispatcher.mode(), "Dispatch worker started");
        let mut batches = 0u64;

        loop {
            let batch = tokio::select! {
                biased;
                _ = self.abort.cancelled() => {
                    warn!("Dispatch worker aborted while waiting for a batch");
                    break;
                }
                batch = self.receiver.next_batch() => batch,
            };

            let Some(batch) = batch else {
                break;
            };

            tokio::select! {
                biased;
                _ = self.abort.cancelled() => {
                    warn!("Dispatch worker aborted during a batch");
                    break;
                }
                _ = self.dispatcher.dispatch(batch) => {
                    batches += 1;
                }
            }
        }

        self.receiver.close();
        info!(batches, "Dispatch worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::queue::dispatch_queue;
    use crate::dispatch::DispatchMode;
    use crate::kafka::record::Record;
    use crate::test_utils::{RecordingCommit, RecordingExecutor};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_worker_drains_queue_after_sender_dropped() {
        let executor = Arc::new(RecordingExecutor::new());
        let commit = Arc::new(RecordingCommit::new());
        let (tx, rx) = dispatch_queue(4);

        for offset in 0..3 {
            tx.try_enqueue(vec![Record::new_for_test("events", 0, offset)])
                .unwrap();
        }
        drop(tx);

        let dispatcher = Dispatcher::new(DispatchMode::Single, executor.clone(), commit.clone());
        DispatchWorker::new(rx, dispatcher, CancellationToken::new())
            .run()
            .await;

        assert_eq!(executor.invocations(), 3);
        assert_eq!(commit.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_abort_stops_a_slow_worker() {
        let executor = Arc::new(RecordingExecutor::new().with_delay(Duration::from_secs(30)));
        let commit = Arc::new(RecordingCommit::new());
        let (tx, rx) = dispatch_queue(4);
        tx.try_enqueue(vec![Record::new_for_test("events", 0, 0)])
            .unwrap();

        let abort = CancellationToken::new();
        let dispatcher = Dispatcher::new(DispatchMode::Multi, executor, commit.clone());
        let handle = tokio::spawn(DispatchWorker::new(rx, dispatcher, abort.clone()).run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        abort.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop after abort")
            .unwrap();

        assert!(commit.calls().is_empty());
        drop(tx);
    }

    #[tokio::test]
    async fn test_abort_cancels_in_flight_partitions() {
        let executor = Arc::new(RecordingExecutor::new().with_delay(Duration::from_millis(200)));
        let commit = Arc::new(RecordingCommit::new());
        let (tx, rx) = dispatch_queue(4);
        tx.try_enqueue(
            (0..5)
                .map(|p| Record::new_for_test("events", p, 0))
                .collect(),
        )
        .unwrap();

        let abort = CancellationToken::new();
        let dispatcher = Dispatcher::new(DispatchMode::Single, executor.clone(), commit.clone());
        let handle = tokio::spawn(DispatchWorker::new(rx, dispatcher, abort.clone()).run());

        assert!(executor.wait_for_started(5, Duration::from_secs(1)).await);
        abort.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop after abort")
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(executor.invocations(), 0);
        assert!(commit.calls().is_empty());
        drop(tx);
    }
}
