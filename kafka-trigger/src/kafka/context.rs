use dashmap::DashMap;
use rdkafka::consumer::{BaseConsumer, ConsumerContext, Rebalance};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::{ClientContext, Statistics, TopicPartitionList};
use tracing::{debug, error, info, warn};

use crate::kafka::types::{Partition, WatermarkOffsets};
use crate::metrics_consts::{COMMIT_FAILURES, REBALANCE_PARTITIONS};

/// Consumer context of the listener. Partition ownership is left to the group
/// protocol; the context reports what happens and keeps the watermarks of
/// owned partitions from the periodic librdkafka statistics.
#[derive(Debug, Default)]
pub struct ListenerContext {
    watermarks: DashMap<Partition, WatermarkOffsets>,
}

impl ListenerContext {
    /// Last watermarks seen in the statistics, unset when none were reported
    pub fn cached_watermarks(&self, partition: &Partition) -> WatermarkOffsets {
        self.watermarks
            .get(partition)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }

    pub fn record_watermarks(&self, partition: Partition, watermarks: WatermarkOffsets) {
        if watermarks.is_unset() {
            self.watermarks.remove(&partition);
        } else {
            self.watermarks.insert(partition, watermarks);
        }
    }

    fn forget(&self, partitions: &TopicPartitionList) {
        for elem in partitions.elements() {
            self.watermarks.remove(&Partition::from(elem));
        }
    }
}

impl ClientContext for ListenerContext {
    fn error(&self, error: KafkaError, reason: &str) {
        error!(error = ?error, "Kafka client error: {}", reason);
    }

    fn stats(&self, statistics: Statistics) {
        for (topic, topic_stats) in statistics.topics {
            for (id, partition) in topic_stats.partitions {
                // -1 is librdkafka's internal unassigned partition
                if id < 0 {
                    continue;
                }
                self.record_watermarks(
                    Partition::new(topic.clone(), id),
                    WatermarkOffsets::from_raw(partition.lo_offset, partition.hi_offset),
                );
            }
        }
    }
}

impl ConsumerContext for ListenerContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                if partitions.count() == 0 {
                    debug!("Skipping empty revoke rebalance");
                    return;
                }
                info!("Revoking {} partitions", partitions.count());
                self.forget(partitions);
                metrics::counter!(REBALANCE_PARTITIONS, "event_type" => "revoke")
                    .increment(partitions.count() as u64);
            }
            Rebalance::Assign(partitions) => {
                debug!(
                    "Pre-rebalance assign event for {} partitions",
                    partitions.count()
                );
            }
            Rebalance::Error(e) => {
                error!("Rebalance error: {}", e);
            }
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        if let Rebalance::Assign(partitions) = rebalance {
            if partitions.count() == 0 {
                debug!("Skipping empty assign rebalance");
                return;
            }
            let assigned: Vec<String> = partitions
                .elements()
                .iter()
                .map(|elem| format!("{}:{}", elem.topic(), elem.partition()))
                .collect();
            info!(partitions = ?assigned, "Assigned {} partitions", partitions.count());
            metrics::counter!(REBALANCE_PARTITIONS, "event_type" => "assign")
                .increment(partitions.count() as u64);
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!("Committed offsets for {} partitions", offsets.count()),
            // auto-commit fires on a timer even when nothing was stored
            Err(KafkaError::ConsumerCommit(rdkafka::types::RDKafkaErrorCode::NoOffset)) => {}
            Err(e) => {
                warn!("Offset commit failed: {e}");
                metrics::counter!(COMMIT_FAILURES, "source" => "auto_commit").increment(1);
            }
        }
    }
}
