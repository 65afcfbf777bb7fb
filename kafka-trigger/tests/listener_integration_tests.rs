use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use kafka_trigger::commit::CommitMode;
use kafka_trigger::dispatch::DispatchMode;
use kafka_trigger::kafka::BrokerClient;
use kafka_trigger::test_utils::{InMemoryCluster, RecordingExecutor};
use rstest::rstest;

mod common;
use common::*;

#[rstest]
#[case::single_partition(1)]
#[case::four_partitions(4)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_resumes_after_committed_offsets(#[case] partitions: i32) {
    let per_partition = 80 / i64::from(partitions);
    let cluster = InMemoryCluster::new(TOPIC, partitions);
    produce_round_robin(&cluster, 80);

    let mut first = start_listener(
        &cluster,
        fast_config(DispatchMode::Single, CommitMode::Buffered),
        RecordingExecutor::new(),
    );
    assert!(first.executor.wait_for(80, WAIT_TIMEOUT).await);
    assert!(first.listener.stop(STOP_TIMEOUT).await);

    for p in 0..partitions {
        assert_eq!(cluster.committed(GROUP, &partition(p)), Some(per_partition));
    }

    produce_round_robin(&cluster, 80);

    let mut second = start_listener(
        &cluster,
        fast_config(DispatchMode::Single, CommitMode::Buffered),
        RecordingExecutor::new(),
    );
    assert!(second.executor.wait_for(80, WAIT_TIMEOUT).await);
    assert!(second.listener.stop(STOP_TIMEOUT).await);

    let before: HashSet<_> = first.executor.processed().into_iter().collect();
    let after: Vec<_> = second.executor.processed();
    assert_eq!(after.len(), 80);
    assert!(after.iter().all(|record| !before.contains(record)));

    for p in 0..partitions {
        let offsets: BTreeSet<i64> = second
            .executor
            .offsets_for(&partition(p))
            .into_iter()
            .collect();
        assert_eq!(
            offsets,
            (per_partition..2 * per_partition).collect::<BTreeSet<i64>>()
        );
        assert_eq!(
            cluster.committed(GROUP, &partition(p)),
            Some(2 * per_partition)
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multi_dispatch_commits_once_per_partition() {
    let cluster = InMemoryCluster::new(TOPIC, 3);
    produce_round_robin(&cluster, 30);

    let mut harness = start_listener(
        &cluster,
        fast_config(DispatchMode::Multi, CommitMode::Immediate),
        RecordingExecutor::new(),
    );
    assert!(harness.executor.wait_for(30, WAIT_TIMEOUT).await);
    assert!(harness.listener.stop(STOP_TIMEOUT).await);

    let calls = harness.client.commit_calls();
    assert_eq!(calls.len(), harness.executor.invocations());
    for call in &calls {
        let partitions: HashSet<_> = call.iter().map(|o| o.partition().clone()).collect();
        assert_eq!(partitions.len(), call.len());
    }
    for p in 0..3 {
        assert_eq!(cluster.committed(GROUP, &partition(p)), Some(10));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_dispatch_preserves_partition_order_and_commits_monotonically() {
    let cluster = InMemoryCluster::new(TOPIC, 4);
    produce_round_robin(&cluster, 100);

    let mut config = fast_config(DispatchMode::Single, CommitMode::Immediate);
    config.max_batch_size = 7;
    let mut harness = start_listener(
        &cluster,
        config,
        RecordingExecutor::new().with_delay(Duration::from_millis(1)),
    );
    assert!(harness.executor.wait_for(100, WAIT_TIMEOUT).await);
    assert!(harness.listener.stop(STOP_TIMEOUT).await);

    let commits = commits_by_partition(&harness.client.commit_calls());
    for p in 0..4 {
        let processed = harness.executor.offsets_for(&partition(p));
        assert_eq!(processed, (0..25).collect::<Vec<i64>>());

        let committed = &commits[&partition(p)];
        assert!(committed.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(committed.last(), Some(&25));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failing_callback_still_advances_offsets() {
    let cluster = InMemoryCluster::new(TOPIC, 2);
    produce_round_robin(&cluster, 10);

    let mut harness = start_listener(
        &cluster,
        fast_config(DispatchMode::Single, CommitMode::Buffered),
        RecordingExecutor::new().failing(),
    );
    assert!(harness.executor.wait_for(10, WAIT_TIMEOUT).await);
    assert!(harness.listener.stop(STOP_TIMEOUT).await);

    assert_eq!(cluster.committed(GROUP, &partition(0)), Some(5));
    assert_eq!(cluster.committed(GROUP, &partition(1)), Some(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_small_queue_applies_backpressure_without_loss() {
    let cluster = InMemoryCluster::new(TOPIC, 2);
    produce_round_robin(&cluster, 40);

    let mut config = fast_config(DispatchMode::Multi, CommitMode::Buffered);
    config.channel_capacity = 1;
    config.max_batch_size = 2;
    let mut harness = start_listener(
        &cluster,
        config,
        RecordingExecutor::new().with_delay(Duration::from_millis(10)),
    );
    assert!(harness.executor.wait_for(40, WAIT_TIMEOUT).await);
    assert!(harness.listener.stop(STOP_TIMEOUT).await);

    let processed: HashSet<_> = harness.executor.processed().into_iter().collect();
    assert_eq!(processed.len(), 40);
    assert!(harness.client.pause_calls() >= 1);
    assert!(harness.client.paused_partitions().is_empty());
    assert_eq!(cluster.committed(GROUP, &partition(0)), Some(20));
    assert_eq!(cluster.committed(GROUP, &partition(1)), Some(20));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_poll_errors_and_end_of_partition_are_not_fatal() {
    let cluster = InMemoryCluster::new(TOPIC, 2);
    produce_round_robin(&cluster, 6);

    let client = std::sync::Arc::new(
        kafka_trigger::test_utils::MockBrokerClient::new(cluster.clone(), GROUP)
            .with_partition_eof(),
    );
    client.fail_next_polls(3);
    let executor = std::sync::Arc::new(RecordingExecutor::new());
    let mut listener = kafka_trigger::listener::KafkaListener::new(
        fast_config(DispatchMode::Single, CommitMode::Buffered),
        client.clone(),
        executor.clone(),
    );
    listener.start().unwrap();

    assert!(executor.wait_for(6, WAIT_TIMEOUT).await);
    cluster.produce(0, b"late".to_vec());
    assert!(executor.wait_for(7, WAIT_TIMEOUT).await);
    assert!(listener.stop(STOP_TIMEOUT).await);

    assert_eq!(cluster.committed(GROUP, &partition(0)), Some(4));
    assert!(client.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_paused_partition_is_held_back_until_resumed() {
    let cluster = InMemoryCluster::new(TOPIC, 2);
    produce_round_robin(&cluster, 10);

    let client = std::sync::Arc::new(kafka_trigger::test_utils::MockBrokerClient::new(
        cluster.clone(),
        GROUP,
    ));
    client.pause(&[partition(1)]).unwrap();
    let executor = std::sync::Arc::new(RecordingExecutor::new());
    let mut listener = kafka_trigger::listener::KafkaListener::new(
        fast_config(DispatchMode::Single, CommitMode::Buffered),
        client.clone(),
        executor.clone(),
    );
    listener.start().unwrap();

    assert!(executor.wait_for(5, WAIT_TIMEOUT).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(executor.offsets_for(&partition(1)).is_empty());

    client.resume(&[partition(1)]).unwrap();
    assert!(executor.wait_for(10, WAIT_TIMEOUT).await);
    assert!(listener.stop(STOP_TIMEOUT).await);
    assert_eq!(executor.offsets_for(&partition(1)), vec![0, 1, 2, 3, 4]);
}
