use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rdkafka::error::KafkaResult;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::kafka::client::BrokerClient;
use crate::kafka::types::{Partition, WatermarkOffsets};
use crate::metrics_consts::{CONSUMER_LAG, LAG_QUERY_FAILURES, PARTITION_COUNT};

/// Consumer lag of a topic at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSample {
    pub total_lag: i64,
    pub partition_count: i32,
    pub timestamp: DateTime<Utc>,
}

impl MetricsSample {
    pub fn new(total_lag: i64, partition_count: i32, timestamp: DateTime<Utc>) -> Self {
        Self {
            total_lag,
            partition_count,
            timestamp,
        }
    }
}

/// Lag of one partition given its watermarks and the group's committed position.
///
/// Without a commit the whole retained range counts. With one, retention may
/// have deleted records past the commit, so the lag is capped by the range.
pub fn partition_lag(watermarks: WatermarkOffsets, committed: Option<i64>) -> i64 {
    let (low, high) = (watermarks.low.unwrap_or(0), watermarks.high.unwrap_or(0));
    let lag = match committed {
        None => high - low,
        Some(committed) => (high - committed).min(high - low),
    };
    lag.max(0)
}

/// Partition list of the topic, reloaded from metadata when stale
#[derive(Debug)]
pub struct PartitionCache {
    partitions: Vec<Partition>,
    loaded_at: Option<Instant>,
    ttl: Duration,
}

impl PartitionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            partitions: Vec::new(),
            loaded_at: None,
            ttl,
        }
    }

    /// Cached partitions, or `None` when empty, expired, or invalidated
    pub fn get(&self, now: Instant) -> Option<&[Partition]> {
        let loaded_at = self.loaded_at?;
        if self.partitions.is_empty() || now.saturating_duration_since(loaded_at) > self.ttl {
            return None;
        }
        Some(&self.partitions)
    }

    pub fn store(&mut self, partitions: Vec<Partition>, now: Instant) {
        self.partitions = partitions;
        self.loaded_at = Some(now);
    }

    pub fn invalidate(&mut self) {
        self.loaded_at = None;
    }
}

pub struct MetricsProvider {
    topic: String,
    consumer_group: String,
    client: Arc<dyn BrokerClient>,
    operation_timeout: Duration,
    partitions: Mutex<PartitionCache>,
    last: RwLock<Option<MetricsSample>>,
}

impl MetricsProvider {
    pub fn new(
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
        client: Arc<dyn BrokerClient>,
        operation_timeout: Duration,
        metadata_refresh_interval: Duration,
    ) -> Self {
        Self {
            topic: topic.into(),
            consumer_group: consumer_group.into(),
            client,
            operation_timeout,
            partitions: Mutex::new(PartitionCache::new(metadata_refresh_interval)),
            last: RwLock::new(None),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Compute the current lag of the consumer group. Blocks on broker calls.
    ///
    /// Never fails: a metadata failure yields an empty sample, a lag query
    /// failure yields zero lag over the known partitions.
    pub fn get_metrics(&self) -> MetricsSample {
        let now = Utc::now();

        let partitions = match self.partitions() {
            Ok(partitions) => partitions,
            Err(e) => {
                warn!(topic = %self.topic, "Failed to load partition metadata: {e}");
                metrics::counter!(LAG_QUERY_FAILURES, "operation" => "metadata").increment(1);
                return self.record(MetricsSample::new(0, 0, now));
            }
        };

        let partition_count = i32::try_from(partitions.len()).unwrap_or(i32::MAX);
        if partitions.is_empty() {
            return self.record(MetricsSample::new(0, 0, now));
        }

        let total_lag = match self.total_lag(&partitions) {
            Ok(lag) => lag,
            Err(e) => {
                warn!(
                    topic = %self.topic,
                    consumer_group = %self.consumer_group,
                    "Failed to compute consumer lag: {e}"
                );
                metrics::counter!(LAG_QUERY_FAILURES, "operation" => "lag").increment(1);
                0
            }
        };

        self.record(MetricsSample::new(total_lag, partition_count, now))
    }

    pub fn last_calculated_metrics(&self) -> Option<MetricsSample> {
        *self.last.read().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn set_last_calculated_metrics(&self, sample: MetricsSample) {
        *self.last.write().unwrap_or_else(PoisonError::into_inner) = Some(sample);
    }

    /// Force the next `get_metrics` to reload the partition list
    pub fn invalidate_partitions(&self) {
        self.partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .invalidate();
    }

    fn record(&self, sample: MetricsSample) -> MetricsSample {
        metrics::gauge!(CONSUMER_LAG, "topic" => self.topic.clone()).set(sample.total_lag as f64);
        metrics::gauge!(PARTITION_COUNT, "topic" => self.topic.clone())
            .set(f64::from(sample.partition_count));
        *self.last.write().unwrap_or_else(PoisonError::into_inner) = Some(sample);
        sample
    }

    fn partitions(&self) -> KafkaResult<Vec<Partition>> {
        let mut cache = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if let Some(partitions) = cache.get(now) {
            return Ok(partitions.to_vec());
        }

        let partitions: Vec<Partition> = self
            .client
            .fetch_partitions(&self.topic, self.operation_timeout)?
            .into_iter()
            .map(|n| Partition::new(self.topic.clone(), n))
            .collect();

        debug!(topic = %self.topic, partitions = partitions.len(), "Loaded partition metadata");
        cache.store(partitions.clone(), now);
        Ok(partitions)
    }

    fn total_lag(&self, partitions: &[Partition]) -> KafkaResult<i64> {
        let committed = self
            .client
            .committed_offsets(partitions, self.operation_timeout)?;

        let owned: HashSet<Partition> = match self.client.assignment() {
            Ok(assigned) => assigned.into_iter().collect(),
            Err(e) => {
                debug!("Failed to read assignment, querying all watermarks: {e}");
                HashSet::new()
            }
        };

        let mut total_lag = 0i64;
        let mut highest: Option<(&Partition, i64)> = None;

        for partition in partitions {
            let committed = committed.get(partition).copied().flatten();
            let watermarks = self.watermarks(partition, owned.contains(partition), committed)?;
            let lag = partition_lag(watermarks, committed);

            total_lag = total_lag.saturating_add(lag);
            match highest {
                Some((_, max)) if lag <= max => {}
                _ => highest = Some((partition, lag)),
            }
        }

        if let Some((partition, lag)) = highest.filter(|(_, lag)| *lag > 0) {
            info!(
                topic = partition.topic(),
                partition = partition.partition_number(),
                lag,
                total_lag,
                "Partition with highest lag"
            );
        }

        Ok(total_lag)
    }

    /// Owned partitions use the client's cached watermarks unless they look
    /// uninitialized; everything else goes to the broker.
    fn watermarks(
        &self,
        partition: &Partition,
        owned: bool,
        committed: Option<i64>,
    ) -> KafkaResult<WatermarkOffsets> {
        if owned {
            let cached = self
                .client
                .get_watermark_offsets(partition)
                .unwrap_or_else(|_| WatermarkOffsets::unset());
            let stale = cached.is_unset()
                || cached.high.is_none()
                || (cached.low == Some(0) && committed.is_none());
            if !stale {
                return Ok(cached);
            }
        }
        self.client
            .query_watermark_offsets(partition, self.operation_timeout)
    }
}
