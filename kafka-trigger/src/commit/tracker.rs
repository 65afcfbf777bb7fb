use std::collections::HashMap;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::kafka::types::{Partition, PartitionOffset};
use crate::metrics_consts::{COMMIT_REGRESSIONS, PARTITION_LAST_COMMITTED_OFFSET};

/// Last resume position handed to the broker, per partition.
///
/// Every commit strategy passes its offsets through [`CommitTracker::advance`]
/// so a partition's committed offset only ever moves forward, even when the
/// per-partition tasks of different batches finish out of order.
#[derive(Debug, Default)]
pub struct CommitTracker {
    committed: DashMap<Partition, i64>,
}

impl CommitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the offsets that move their partition forward and return them.
    ///
    /// Offsets at or below the last claimed one are dropped and counted. The
    /// check and the update happen under the partition's map entry, so two
    /// concurrent callers can never both claim a position for the same partition
    /// out of order.
    pub fn advance(&self, offsets: &[PartitionOffset]) -> Vec<PartitionOffset> {
        let mut advancing = Vec::with_capacity(offsets.len());

        for offset in offsets {
            let partition = offset.partition();
            let mut entry = self.committed.entry(partition.clone()).or_insert(i64::MIN);
            let previous = *entry;

            if offset.offset() > previous {
                *entry = offset.offset();
                drop(entry);

                debug!(
                    topic = partition.topic(),
                    partition = partition.partition_number(),
                    offset = offset.offset(),
                    "Advancing committed offset"
                );
                metrics::gauge!(
                    PARTITION_LAST_COMMITTED_OFFSET,
                    "topic" => partition.topic().to_string(),
                    "partition" => partition.partition_number().to_string()
                )
                .set(offset.offset() as f64);
                advancing.push(offset.clone());
            } else {
                drop(entry);

                warn!(
                    topic = partition.topic(),
                    partition = partition.partition_number(),
                    offset = offset.offset(),
                    last_committed = previous,
                    "Dropping commit that does not advance the partition"
                );
                metrics::counter!(
                    COMMIT_REGRESSIONS,
                    "topic" => partition.topic().to_string(),
                    "partition" => partition.partition_number().to_string()
                )
                .increment(1);
            }
        }

        advancing
    }

    pub fn committed_offset(&self, partition: &Partition) -> Option<i64> {
        self.committed.get(partition).map(|offset| *offset)
    }

    pub fn snapshot(&self) -> HashMap<Partition, i64> {
        self.committed
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}
