use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::warn;

use crate::commit::CommitStrategy;
use crate::dispatch::executor::{invoke, FunctionExecutor, TriggerInput};
use crate::dispatch::queue::Batch;
use crate::kafka::record::Record;
use crate::kafka::types::{Partition, PartitionOffset};
use crate::metrics_consts::{CALLBACK_DURATION, CALLBACK_FAILURES};

/// Split a batch into per-partition runs, keeping arrival order inside each
/// partition and ordering partitions by first appearance.
pub fn group_by_partition(batch: Batch) -> Vec<(Partition, Vec<Record>)> {
    let mut groups: Vec<(Partition, Vec<Record>)> = Vec::new();
    for record in batch {
        let key = record.get_topic_partition();
        match groups.iter().position(|(partition, _)| partition == key) {
            Some(i) => groups[i].1.push(record),
            None => groups.push((key.clone(), vec![record])),
        }
    }
    groups
}

/// Invokes the callback once per record. Partitions run concurrently, records
/// within a partition run strictly in order, and each record's offset + 1 is
/// committed as soon as its callback returned.
///
/// Partition futures are driven by the task awaiting `dispatch`, so dropping
/// that future stops every partition: no callback or commit outlives an
/// aborted dispatch.
pub struct SingleRecordDispatcher {
    executor: Arc<dyn FunctionExecutor>,
    commit: Arc<dyn CommitStrategy>,
}

impl SingleRecordDispatcher {
    pub fn new(executor: Arc<dyn FunctionExecutor>, commit: Arc<dyn CommitStrategy>) -> Self {
        Self { executor, commit }
    }

    /// Returns once every partition of the batch has been handled
    pub async fn dispatch(&self, batch: Batch) {
        let partitions = group_by_partition(batch)
            .into_iter()
            .map(|(partition, records)| self.process_partition(partition, records));

        join_all(partitions).await;
    }

    async fn process_partition(&self, partition: Partition, records: Vec<Record>) {
        for record in records {
            let offset = record.offset();
            let next = PartitionOffset::new(partition.clone(), offset + 1);

            let start = Instant::now();
            let result = invoke(self.executor.as_ref(), TriggerInput::Single(record)).await;
            metrics::histogram!(CALLBACK_DURATION, "mode" => "single")
                .record(start.elapsed().as_secs_f64());

            if let Err(e) = result {
                warn!(
                    topic = partition.topic(),
                    partition = partition.partition_number(),
                    offset,
                    "Record callback failed: {e:#}"
                );
                metrics::counter!(CALLBACK_FAILURES, "mode" => "single").increment(1);
            }

            self.commit.commit(std::slice::from_ref(&next));
        }
    }
}
