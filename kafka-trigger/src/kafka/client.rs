use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tracing::{debug, info, warn};

use crate::kafka::context::ListenerContext;
use crate::kafka::record::Record;
use crate::kafka::types::{Partition, PartitionOffset, WatermarkOffsets};

/// Something observed by a single poll of the consumer.
#[derive(Debug, Clone)]
pub enum PollEvent {
    Record(Record),
    /// The consumer reached the current end of a partition
    EndOfPartition(Partition),
}

/// The consumer-side operations the listener and the scalers need from a
/// broker client.
///
/// All methods are blocking. The ingestion loop calls `poll`, `pause` and
/// `resume` from its own OS thread. The commit strategies are called directly
/// on the dispatch tasks, so an immediate commit holds its task for one broker
/// round trip. The HTTP handlers reach the metrics provider through
/// `spawn_blocking`.
pub trait BrokerClient: Send + Sync {
    /// Wait up to `timeout` for the next event. `Ok(None)` means nothing arrived.
    fn poll(&self, timeout: Duration) -> KafkaResult<Option<PollEvent>>;

    /// Synchronously commit the given resume positions
    fn commit(&self, offsets: &[PartitionOffset]) -> KafkaResult<()>;

    /// Store a resume position for the next auto-commit
    fn store_offset(&self, offset: &PartitionOffset) -> KafkaResult<()>;

    fn pause(&self, partitions: &[Partition]) -> KafkaResult<()>;

    fn resume(&self, partitions: &[Partition]) -> KafkaResult<()>;

    /// Partitions currently owned by this consumer
    fn assignment(&self) -> KafkaResult<Vec<Partition>>;

    /// Watermarks cached by the client for an owned partition, without a broker
    /// round trip. Unset until the client has reported them.
    fn get_watermark_offsets(&self, partition: &Partition) -> KafkaResult<WatermarkOffsets>;

    /// Watermarks queried from the broker
    fn query_watermark_offsets(
        &self,
        partition: &Partition,
        timeout: Duration,
    ) -> KafkaResult<WatermarkOffsets>;

    /// Committed resume positions of the consumer group, `None` where nothing was committed
    fn committed_offsets(
        &self,
        partitions: &[Partition],
        timeout: Duration,
    ) -> KafkaResult<HashMap<Partition, Option<i64>>>;

    /// Partition numbers of a topic from the broker metadata
    fn fetch_partitions(&self, topic: &str, timeout: Duration) -> KafkaResult<Vec<i32>>;

    /// Flush stored offsets and leave the group
    fn close(&self);
}

fn to_partition_list(partitions: &[Partition]) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    for partition in partitions {
        tpl.add_partition(partition.topic(), partition.partition_number());
    }
    tpl
}

fn to_offset_list(offsets: &[PartitionOffset]) -> KafkaResult<TopicPartitionList> {
    let mut tpl = TopicPartitionList::new();
    for offset in offsets {
        tpl.add_partition_offset(
            offset.topic(),
            offset.partition_number(),
            Offset::Offset(offset.offset()),
        )?;
    }
    Ok(tpl)
}

/// `BrokerClient` over librdkafka's `BaseConsumer`, subscribed to a single topic.
pub struct RdKafkaClient {
    consumer: BaseConsumer<ListenerContext>,
    topic: String,
}

impl RdKafkaClient {
    /// Create the consumer and subscribe it to `topic`
    pub fn new(config: &ClientConfig, topic: &str) -> Result<Self> {
        let consumer: BaseConsumer<ListenerContext> = config
            .create_with_context(ListenerContext::default())
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[topic])
            .with_context(|| format!("Failed to subscribe to topic {topic}"))?;

        info!(topic, "Subscribed consumer");

        Ok(Self {
            consumer,
            topic: topic.to_string(),
        })
    }
}

impl BrokerClient for RdKafkaClient {
    fn poll(&self, timeout: Duration) -> KafkaResult<Option<PollEvent>> {
        match self.consumer.poll(timeout) {
            None => Ok(None),
            Some(Ok(msg)) => Ok(Some(PollEvent::Record(Record::from_borrowed_message(&msg)))),
            // librdkafka reports EOF per partition of the subscribed topic
            Some(Err(KafkaError::PartitionEOF(partition))) => Ok(Some(
                PollEvent::EndOfPartition(Partition::new(self.topic.clone(), partition)),
            )),
            Some(Err(e)) => Err(e),
        }
    }

    fn commit(&self, offsets: &[PartitionOffset]) -> KafkaResult<()> {
        let tpl = to_offset_list(offsets)?;
        self.consumer.commit(&tpl, CommitMode::Sync)
    }

    fn store_offset(&self, offset: &PartitionOffset) -> KafkaResult<()> {
        // store_offsets takes the resume position as-is, unlike store_offset
        // which adds one to the offset of a consumed message
        let tpl = to_offset_list(std::slice::from_ref(offset))?;
        self.consumer.store_offsets(&tpl)
    }

    fn pause(&self, partitions: &[Partition]) -> KafkaResult<()> {
        self.consumer.pause(&to_partition_list(partitions))
    }

    fn resume(&self, partitions: &[Partition]) -> KafkaResult<()> {
        self.consumer.resume(&to_partition_list(partitions))
    }

    fn assignment(&self) -> KafkaResult<Vec<Partition>> {
        let tpl = self.consumer.assignment()?;
        Ok(tpl.elements().into_iter().map(Partition::from).collect())
    }

    fn get_watermark_offsets(&self, partition: &Partition) -> KafkaResult<WatermarkOffsets> {
        Ok(self.consumer.context().cached_watermarks(partition))
    }

    fn query_watermark_offsets(
        &self,
        partition: &Partition,
        timeout: Duration,
    ) -> KafkaResult<WatermarkOffsets> {
        let (low, high) = self.consumer.fetch_watermarks(
            partition.topic(),
            partition.partition_number(),
            timeout,
        )?;
        Ok(WatermarkOffsets::from_raw(low, high))
    }

    fn committed_offsets(
        &self,
        partitions: &[Partition],
        timeout: Duration,
    ) -> KafkaResult<HashMap<Partition, Option<i64>>> {
        let tpl = self
            .consumer
            .committed_offsets(to_partition_list(partitions), timeout)?;

        Ok(tpl
            .elements()
            .into_iter()
            .map(|elem| {
                let committed = match elem.offset() {
                    Offset::Offset(offset) if offset >= 0 => Some(offset),
                    _ => None,
                };
                (Partition::from(elem), committed)
            })
            .collect())
    }

    fn fetch_partitions(&self, topic: &str, timeout: Duration) -> KafkaResult<Vec<i32>> {
        let metadata = self.consumer.fetch_metadata(Some(topic), timeout)?;
        let Some(topic_metadata) = metadata.topics().iter().find(|t| t.name() == topic) else {
            return Ok(vec![]);
        };
        if let Some(err) = topic_metadata.error() {
            return Err(KafkaError::MetadataFetch(err.into()));
        }
        Ok(topic_metadata.partitions().iter().map(|p| p.id()).collect())
    }

    fn close(&self) {
        match self.consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => debug!("Flushed stored offsets on close"),
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
            Err(e) => warn!("Failed to flush stored offsets on close: {e}"),
        }
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "Unsubscribed consumer");
    }
}
