//! Shared test utilities for the kafka-trigger crate.
//!
//! [`InMemoryCluster`] holds partition logs and consumer group offsets.
//! [`MockBrokerClient`] is a `BrokerClient` over it that behaves like a group
//! consumer owning every partition: it resumes from the group's committed
//! offsets, round-robins over partitions, and flushes stored offsets on every
//! poll and on close the way librdkafka's auto-commit does.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use anyhow::anyhow;
use async_trait::async_trait;
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::types::RDKafkaErrorCode;

use crate::commit::CommitStrategy;
use crate::dispatch::executor::{FunctionExecutor, TriggerInput};
use crate::kafka::client::{BrokerClient, PollEvent};
use crate::kafka::record::Record;
use crate::kafka::types::{Partition, PartitionOffset, WatermarkOffsets};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ClusterState {
    topic: String,
    logs: Vec<Vec<Vec<u8>>>,
    low_watermarks: Vec<i64>,
    committed: HashMap<(String, i32), i64>,
}

/// A single-topic log shared by every mock client created from it
#[derive(Clone)]
pub struct InMemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl InMemoryCluster {
    pub fn new(topic: &str, partitions: i32) -> Self {
        let count = usize::try_from(partitions).unwrap_or(0);
        Self {
            state: Arc::new(Mutex::new(ClusterState {
                topic: topic.to_string(),
                logs: vec![Vec::new(); count],
                low_watermarks: vec![0; count],
                committed: HashMap::new(),
            })),
        }
    }

    pub fn topic(&self) -> String {
        lock(&self.state).topic.clone()
    }

    pub fn partition_count(&self) -> i32 {
        i32::try_from(lock(&self.state).logs.len()).unwrap_or(i32::MAX)
    }

    /// Append a value and return its offset
    pub fn produce(&self, partition: i32, value: Vec<u8>) -> i64 {
        let mut state = lock(&self.state);
        let log = &mut state.logs[partition as usize];
        log.push(value);
        log.len() as i64 - 1
    }

    /// Simulate retention deleting everything below `offset`
    pub fn truncate_before(&self, partition: i32, offset: i64) {
        lock(&self.state).low_watermarks[partition as usize] = offset;
    }

    pub fn watermarks(&self, partition: i32) -> WatermarkOffsets {
        let state = lock(&self.state);
        let index = partition as usize;
        WatermarkOffsets::new(state.low_watermarks[index], state.logs[index].len() as i64)
    }

    pub fn committed(&self, group: &str, partition: &Partition) -> Option<i64> {
        lock(&self.state)
            .committed
            .get(&(group.to_string(), partition.partition_number()))
            .copied()
    }

    pub fn set_committed(&self, group: &str, partition: &Partition, offset: i64) {
        lock(&self.state)
            .committed
            .insert((group.to_string(), partition.partition_number()), offset);
    }

    fn read(&self, partition: i32, offset: i64) -> Option<Vec<u8>> {
        let state = lock(&self.state);
        state.logs[partition as usize]
            .get(usize::try_from(offset).ok()?)
            .cloned()
    }
}

#[derive(Default)]
struct ClientState {
    positions: HashMap<i32, i64>,
    paused: HashSet<i32>,
    stored: HashMap<i32, i64>,
    stored_log: Vec<PartitionOffset>,
    commit_log: Vec<Vec<PartitionOffset>>,
    next_partition: i32,
    eof_sent: HashSet<i32>,
    pause_calls: usize,
}

pub struct MockBrokerClient {
    cluster: InMemoryCluster,
    group: String,
    state: Mutex<ClientState>,
    fail_commits: AtomicBool,
    fail_metadata: AtomicBool,
    fail_lag_queries: AtomicBool,
    failing_polls: AtomicUsize,
    cached_watermarks_unset: AtomicBool,
    emit_partition_eof: AtomicBool,
    watermark_queries: AtomicUsize,
    metadata_calls: AtomicUsize,
    closed: AtomicBool,
}

impl MockBrokerClient {
    pub fn new(cluster: InMemoryCluster, group: &str) -> Self {
        Self {
            cluster,
            group: group.to_string(),
            state: Mutex::new(ClientState::default()),
            fail_commits: AtomicBool::new(false),
            fail_metadata: AtomicBool::new(false),
            fail_lag_queries: AtomicBool::new(false),
            failing_polls: AtomicUsize::new(0),
            cached_watermarks_unset: AtomicBool::new(false),
            emit_partition_eof: AtomicBool::new(false),
            watermark_queries: AtomicUsize::new(0),
            metadata_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_partition_eof(self) -> Self {
        self.emit_partition_eof.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn fail_metadata(&self, fail: bool) {
        self.fail_metadata.store(fail, Ordering::SeqCst);
    }

    pub fn fail_lag_queries(&self, fail: bool) {
        self.fail_lag_queries.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` polls return an error
    pub fn fail_next_polls(&self, count: usize) {
        self.failing_polls.store(count, Ordering::SeqCst);
    }

    pub fn set_cached_watermarks_unset(&self, unset: bool) {
        self.cached_watermarks_unset.store(unset, Ordering::SeqCst);
    }

    pub fn watermark_queries(&self) -> usize {
        self.watermark_queries.load(Ordering::SeqCst)
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Every offset handed to `store_offset`, in call order
    pub fn stored_offsets(&self) -> Vec<PartitionOffset> {
        lock(&self.state).stored_log.clone()
    }

    /// Every `commit` call including failed ones, in call order
    pub fn commit_calls(&self) -> Vec<Vec<PartitionOffset>> {
        lock(&self.state).commit_log.clone()
    }

    pub fn paused_partitions(&self) -> Vec<i32> {
        let mut paused: Vec<i32> = lock(&self.state).paused.iter().copied().collect();
        paused.sort_unstable();
        paused
    }

    pub fn pause_calls(&self) -> usize {
        lock(&self.state).pause_calls
    }

    /// What the auto-commit timer does: write stored offsets to the group
    pub fn flush_stored_offsets(&self) {
        let stored: Vec<(i32, i64)> = lock(&self.state).stored.drain().collect();
        let topic = self.cluster.topic();
        for (partition, offset) in stored {
            self.cluster
                .set_committed(&self.group, &Partition::new(topic.clone(), partition), offset);
        }
    }

    fn next_event(&self) -> Option<PollEvent> {
        let topic = self.cluster.topic();
        let partitions = self.cluster.partition_count();
        let mut state = lock(&self.state);

        for step in 0..partitions {
            let partition = (state.next_partition + step) % partitions;
            if state.paused.contains(&partition) {
                continue;
            }

            let key = Partition::new(topic.clone(), partition);
            let watermarks = self.cluster.watermarks(partition);
            let low = watermarks.low.unwrap_or(0);
            let high = watermarks.high.unwrap_or(0);
            let committed = self.cluster.committed(&self.group, &key);
            let position = state
                .positions
                .entry(partition)
                .or_insert_with(|| committed.unwrap_or(low));
            if *position < low {
                *position = low;
            }

            if *position < high {
                let offset = *position;
                *position += 1;
                state.next_partition = (partition + 1) % partitions;
                state.eof_sent.remove(&partition);
                let value = self.cluster.read(partition, offset);
                return Some(PollEvent::Record(Record::consumed(
                    key,
                    offset,
                    SystemTime::now(),
                    None,
                    value,
                    vec![],
                )));
            }

            if self.emit_partition_eof.load(Ordering::SeqCst) && state.eof_sent.insert(partition) {
                return Some(PollEvent::EndOfPartition(key));
            }
        }

        None
    }
}

impl BrokerClient for MockBrokerClient {
    fn poll(&self, timeout: Duration) -> KafkaResult<Option<PollEvent>> {
        if self
            .failing_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(KafkaError::MessageConsumption(
                RDKafkaErrorCode::BrokerTransportFailure,
            ));
        }

        self.flush_stored_offsets();

        if self.is_closed() {
            std::thread::sleep(timeout);
            return Ok(None);
        }

        match self.next_event() {
            Some(event) => Ok(Some(event)),
            None => {
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn commit(&self, offsets: &[PartitionOffset]) -> KafkaResult<()> {
        lock(&self.state).commit_log.push(offsets.to_vec());
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::RequestTimedOut));
        }
        for offset in offsets {
            self.cluster
                .set_committed(&self.group, offset.partition(), offset.offset());
        }
        Ok(())
    }

    fn store_offset(&self, offset: &PartitionOffset) -> KafkaResult<()> {
        let mut state = lock(&self.state);
        state
            .stored
            .insert(offset.partition_number(), offset.offset());
        state.stored_log.push(offset.clone());
        Ok(())
    }

    fn pause(&self, partitions: &[Partition]) -> KafkaResult<()> {
        let mut state = lock(&self.state);
        state.pause_calls += 1;
        for partition in partitions {
            state.paused.insert(partition.partition_number());
        }
        Ok(())
    }

    fn resume(&self, partitions: &[Partition]) -> KafkaResult<()> {
        let mut state = lock(&self.state);
        for partition in partitions {
            state.paused.remove(&partition.partition_number());
        }
        Ok(())
    }

    fn assignment(&self) -> KafkaResult<Vec<Partition>> {
        if self.is_closed() {
            return Ok(vec![]);
        }
        let topic = self.cluster.topic();
        Ok((0..self.cluster.partition_count())
            .map(|p| Partition::new(topic.clone(), p))
            .collect())
    }

    fn get_watermark_offsets(&self, partition: &Partition) -> KafkaResult<WatermarkOffsets> {
        if self.cached_watermarks_unset.load(Ordering::SeqCst) {
            return Ok(WatermarkOffsets::unset());
        }
        Ok(self.cluster.watermarks(partition.partition_number()))
    }

    fn query_watermark_offsets(
        &self,
        partition: &Partition,
        _timeout: Duration,
    ) -> KafkaResult<WatermarkOffsets> {
        self.watermark_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_lag_queries.load(Ordering::SeqCst) {
            return Err(KafkaError::MetadataFetch(RDKafkaErrorCode::RequestTimedOut));
        }
        Ok(self.cluster.watermarks(partition.partition_number()))
    }

    fn committed_offsets(
        &self,
        partitions: &[Partition],
        _timeout: Duration,
    ) -> KafkaResult<HashMap<Partition, Option<i64>>> {
        if self.fail_lag_queries.load(Ordering::SeqCst) {
            return Err(KafkaError::MetadataFetch(RDKafkaErrorCode::RequestTimedOut));
        }
        Ok(partitions
            .iter()
            .map(|p| (p.clone(), self.cluster.committed(&self.group, p)))
            .collect())
    }

    fn fetch_partitions(&self, topic: &str, _timeout: Duration) -> KafkaResult<Vec<i32>> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_metadata.load(Ordering::SeqCst) {
            return Err(KafkaError::MetadataFetch(
                RDKafkaErrorCode::BrokerTransportFailure,
            ));
        }
        if topic != self.cluster.topic() {
            return Ok(vec![]);
        }
        Ok((0..self.cluster.partition_count()).collect())
    }

    fn close(&self) {
        self.flush_stored_offsets();
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Executor that records what it was given, optionally slow or failing
#[derive(Default)]
pub struct RecordingExecutor {
    processed: Mutex<Vec<(Partition, i64)>>,
    started: AtomicUsize,
    invocations: AtomicUsize,
    delay: Option<Duration>,
    fail: bool,
    panic_at: Option<i64>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every invocation returns an error after recording its records
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Panic, without recording anything, when handed a record at `offset`
    pub fn panicking_at(mut self, offset: i64) -> Self {
        self.panic_at = Some(offset);
        self
    }

    /// (partition, offset) of every completed record, in completion order
    pub fn processed(&self) -> Vec<(Partition, i64)> {
        lock(&self.processed).clone()
    }

    pub fn offsets_for(&self, partition: &Partition) -> Vec<i64> {
        lock(&self.processed)
            .iter()
            .filter(|(p, _)| p == partition)
            .map(|(_, offset)| *offset)
            .collect()
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` records completed; false on timeout
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while lock(&self.processed).len() < count {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    /// Wait until at least `count` invocations started; false on timeout
    pub async fn wait_for_started(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.started() < count {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

#[async_trait]
impl FunctionExecutor for RecordingExecutor {
    async fn execute(&self, input: TriggerInput) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(offset) = self.panic_at {
            if input.records().iter().any(|r| r.offset() == offset) {
                panic!("callback panicked at offset {offset}");
            }
        }

        {
            let mut processed = lock(&self.processed);
            for record in input.records() {
                processed.push((record.get_topic_partition().clone(), record.offset()));
            }
        }
        self.invocations.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            return Err(anyhow!("callback failed"));
        }
        Ok(())
    }
}

/// Commit strategy that only records its calls
#[derive(Default)]
pub struct RecordingCommit {
    calls: Mutex<Vec<Vec<PartitionOffset>>>,
}

impl RecordingCommit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Vec<PartitionOffset>> {
        lock(&self.calls).clone()
    }
}

impl CommitStrategy for RecordingCommit {
    fn commit(&self, offsets: &[PartitionOffset]) {
        lock(&self.calls).push(offsets.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_client_resumes_from_committed_offsets() {
        let cluster = InMemoryCluster::new("events", 2);
        for i in 0..6 {
            cluster.produce(i % 2, format!("v{i}").into_bytes());
        }
        cluster.set_committed("group", &Partition::new("events".to_string(), 0), 2);

        let client = MockBrokerClient::new(cluster, "group");
        let mut seen = Vec::new();
        while let Some(PollEvent::Record(record)) = client.poll(Duration::ZERO).unwrap() {
            seen.push((record.partition(), record.offset()));
        }

        seen.sort();
        assert_eq!(seen, vec![(0, 2), (1, 0), (1, 1), (1, 2)]);
    }

    #[test]
    fn test_paused_partitions_are_skipped() {
        let cluster = InMemoryCluster::new("events", 2);
        cluster.produce(0, b"a".to_vec());
        cluster.produce(1, b"b".to_vec());

        let client = MockBrokerClient::new(cluster, "group");
        let p0 = Partition::new("events".to_string(), 0);
        client.pause(std::slice::from_ref(&p0)).unwrap();
        assert_eq!(client.paused_partitions(), vec![0]);

        match client.poll(Duration::ZERO).unwrap() {
            Some(PollEvent::Record(record)) => assert_eq!(record.partition(), 1),
            other => panic!("unexpected poll result {other:?}"),
        }
        assert!(client.poll(Duration::ZERO).unwrap().is_none());

        client.resume(&[p0]).unwrap();
        match client.poll(Duration::ZERO).unwrap() {
            Some(PollEvent::Record(record)) => assert_eq!(record.partition(), 0),
            other => panic!("unexpected poll result {other:?}"),
        }
    }

    #[test]
    fn test_stored_offsets_flush_on_close() {
        let cluster = InMemoryCluster::new("events", 1);
        let client = MockBrokerClient::new(cluster.clone(), "group");
        let p0 = Partition::new("events".to_string(), 0);

        client
            .store_offset(&PartitionOffset::new(p0.clone(), 3))
            .unwrap();
        assert_eq!(cluster.committed("group", &p0), None);

        client.close();
        assert_eq!(cluster.committed("group", &p0), Some(3));
        assert!(client.is_closed());
    }
}
