use std::fmt;

use rdkafka::topic_partition_list::TopicPartitionListElem;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    topic: String,
    partition_number: i32,
}

impl Partition {
    pub fn new(topic: String, partition_number: i32) -> Self {
        Self {
            topic,
            partition_number,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_number(&self) -> i32 {
        self.partition_number
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition_number)
    }
}

impl From<TopicPartitionListElem<'_>> for Partition {
    fn from(elem: TopicPartitionListElem<'_>) -> Self {
        Self::new(elem.topic().to_string(), elem.partition())
    }
}

/// A position to resume consumption from: the offset of the next record
/// that has not been processed yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionOffset {
    partition: Partition,
    offset: i64,
}

impl PartitionOffset {
    pub fn new(partition: Partition, offset: i64) -> Self {
        Self { partition, offset }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn topic(&self) -> &str {
        self.partition.topic()
    }

    pub fn partition_number(&self) -> i32 {
        self.partition.partition_number()
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

/// Low and high watermarks of a partition. librdkafka reports unknown
/// watermarks as negative sentinels, which are normalized to `None` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatermarkOffsets {
    pub low: Option<i64>,
    pub high: Option<i64>,
}

impl WatermarkOffsets {
    pub fn new(low: i64, high: i64) -> Self {
        Self {
            low: Some(low),
            high: Some(high),
        }
    }

    pub fn from_raw(low: i64, high: i64) -> Self {
        Self {
            low: (low >= 0).then_some(low),
            high: (high >= 0).then_some(high),
        }
    }

    pub fn unset() -> Self {
        Self::default()
    }

    pub fn is_unset(&self) -> bool {
        self.low.is_none() && self.high.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermarks_normalize_negative_sentinels() {
        let wm = WatermarkOffsets::from_raw(-1001, -1001);
        assert!(wm.is_unset());

        let wm = WatermarkOffsets::from_raw(0, 42);
        assert_eq!(wm, WatermarkOffsets::new(0, 42));
        assert!(!wm.is_unset());
    }

    #[test]
    fn test_partition_display() {
        let partition = Partition::new("events".to_string(), 3);
        assert_eq!(partition.to_string(), "events:3");
    }
}
