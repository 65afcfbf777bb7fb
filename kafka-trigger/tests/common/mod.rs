//! Shared helpers for the listener integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kafka_trigger::commit::CommitMode;
use kafka_trigger::dispatch::DispatchMode;
use kafka_trigger::kafka::{Partition, PartitionOffset};
use kafka_trigger::listener::{KafkaListener, ListenerConfig};
use kafka_trigger::test_utils::{InMemoryCluster, MockBrokerClient, RecordingExecutor};

pub const TOPIC: &str = "trigger-integration-test";
pub const GROUP: &str = "trigger-integration-group";
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Listener config with short intervals so tests finish quickly
pub fn fast_config(dispatch_mode: DispatchMode, commit_mode: CommitMode) -> ListenerConfig {
    ListenerConfig {
        subscriber_interval: Duration::from_millis(50),
        poll_slice: Duration::from_millis(10),
        channel_full_retry_interval: Duration::from_millis(5),
        dispatch_mode,
        commit_mode,
        ..ListenerConfig::new(TOPIC)
    }
}

/// Produce `count` records spread round-robin over the cluster's partitions
pub fn produce_round_robin(cluster: &InMemoryCluster, count: usize) {
    let partitions = cluster.partition_count();
    for i in 0..count {
        let partition = i32::try_from(i).unwrap() % partitions;
        cluster.produce(partition, format!("record-{i}").into_bytes());
    }
}

pub fn partition(n: i32) -> Partition {
    Partition::new(TOPIC.to_string(), n)
}

pub struct Harness {
    pub client: Arc<MockBrokerClient>,
    pub executor: Arc<RecordingExecutor>,
    pub listener: KafkaListener,
}

/// Build and start a listener over a fresh mock client in `GROUP`
pub fn start_listener(
    cluster: &InMemoryCluster,
    config: ListenerConfig,
    executor: RecordingExecutor,
) -> Harness {
    let client = Arc::new(MockBrokerClient::new(cluster.clone(), GROUP));
    let executor = Arc::new(executor);
    let mut listener = KafkaListener::new(config, client.clone(), executor.clone());
    listener.start().unwrap();
    Harness {
        client,
        executor,
        listener,
    }
}

/// Group offsets committed per partition, in commit order
#[allow(dead_code)] // Used by some test files only
pub fn commits_by_partition(calls: &[Vec<PartitionOffset>]) -> HashMap<Partition, Vec<i64>> {
    let mut by_partition: HashMap<Partition, Vec<i64>> = HashMap::new();
    for offset in calls.iter().flatten() {
        by_partition
            .entry(offset.partition().clone())
            .or_default()
            .push(offset.offset());
    }
    by_partition
}
