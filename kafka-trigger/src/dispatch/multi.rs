use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error};

use crate::commit::CommitStrategy;
use crate::dispatch::executor::{invoke, FunctionExecutor, TriggerInput};
use crate::dispatch::queue::Batch;
use crate::kafka::types::{Partition, PartitionOffset};
use crate::metrics_consts::{CALLBACK_DURATION, CALLBACK_FAILURES};

/// Resume position per partition present in the batch: highest offset + 1
pub fn next_offsets(batch: &Batch) -> Vec<PartitionOffset> {
    let mut max_offsets: BTreeMap<&Partition, i64> = BTreeMap::new();
    for record in batch {
        max_offsets
            .entry(record.get_topic_partition())
            .and_modify(|max| *max = (*max).max(record.offset()))
            .or_insert(record.offset());
    }

    max_offsets
        .into_iter()
        .map(|(partition, max)| PartitionOffset::new(partition.clone(), max + 1))
        .collect()
}

/// Hands the whole batch to one callback invocation, then commits one offset
/// per partition.
pub struct MultiRecordDispatcher {
    executor: Arc<dyn FunctionExecutor>,
    commit: Arc<dyn CommitStrategy>,
}

impl MultiRecordDispatcher {
    pub fn new(executor: Arc<dyn FunctionExecutor>, commit: Arc<dyn CommitStrategy>) -> Self {
        Self { executor, commit }
    }

    pub async fn dispatch(&self, batch: Batch) {
        if batch.is_empty() {
            return;
        }

        // computed up front, the callback takes ownership of the records
        let offsets = next_offsets(&batch);
        let size = batch.len();

        let start = Instant::now();
        let result = invoke(self.executor.as_ref(), TriggerInput::Batch(batch)).await;
        metrics::histogram!(CALLBACK_DURATION, "mode" => "multi")
            .record(start.elapsed().as_secs_f64());

        if let Err(e) = result {
            let positions: Vec<String> = offsets
                .iter()
                .map(|o| format!("{}@{}", o.partition(), o.offset() - 1))
                .collect();
            error!(
                records = size,
                partitions = ?positions,
                "Batch callback failed: {e:#}"
            );
            metrics::counter!(CALLBACK_FAILURES, "mode" => "multi").increment(1);
        } else {
            debug!(records = size, partitions = offsets.len(), "Batch callback completed");
        }

        self.commit.commit(&offsets);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::record::Record;
    use crate::test_utils::{RecordingCommit, RecordingExecutor};

    fn partition(n: i32) -> Partition {
        Partition::new("events".to_string(), n)
    }

    #[test]
    fn test_next_offsets_per_partition() {
        let batch = vec![
            Record::new_for_test("events", 0, 10),
            Record::new_for_test("events", 1, 4),
            Record::new_for_test("events", 0, 12),
            Record::new_for_test("events", 0, 11),
        ];
        assert_eq!(
            next_offsets(&batch),
            vec![
                PartitionOffset::new(partition(0), 13),
                PartitionOffset::new(partition(1), 5),
            ]
        );
    }

    #[tokio::test]
    async fn test_one_invocation_and_one_commit_per_partition() {
        let executor = Arc::new(RecordingExecutor::new());
        let commit = Arc::new(RecordingCommit::new());
        let dispatcher = MultiRecordDispatcher::new(executor.clone(), commit.clone());

        let batch: Batch = (0..9)
            .map(|i| Record::new_for_test("events", i % 3, i64::from(i / 3)))
            .collect();
        dispatcher.dispatch(batch).await;

        assert_eq!(executor.invocations(), 1);
        assert_eq!(executor.processed().len(), 9);

        let calls = commit.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            (0..3)
                .map(|p| PartitionOffset::new(partition(p), 3))
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_failed_callback_still_commits() {
        let executor = Arc::new(RecordingExecutor::new().failing());
        let commit = Arc::new(RecordingCommit::new());
        let dispatcher = MultiRecordDispatcher::new(executor.clone(), commit.clone());

        dispatcher
            .dispatch(vec![Record::new_for_test("events", 2, 7)])
            .await;

        assert_eq!(executor.invocations(), 1);
        assert_eq!(
            commit.calls(),
            vec![vec![PartitionOffset::new(partition(2), 8)]]
        );
    }

    #[tokio::test]
    async fn test_panicking_callback_is_treated_as_failure() {
        let executor = Arc::new(RecordingExecutor::new().panicking_at(1));
        let commit = Arc::new(RecordingCommit::new());
        let dispatcher = MultiRecordDispatcher::new(executor.clone(), commit.clone());

        dispatcher
            .dispatch(vec![
                Record::new_for_test("events", 0, 0),
                Record::new_for_test("events", 0, 1),
            ])
            .await;

        assert_eq!(executor.started(), 1);
        assert_eq!(
            commit.calls(),
            vec![vec![PartitionOffset::new(partition(0), 2)]]
        );
    }
}
