// ==== Ingestion ====
/// Counter for errors returned by the consumer poll
pub const POLL_ERRORS: &str = "kafka_trigger_poll_errors_total";

/// Counter for end-of-partition events observed while polling
pub const PARTITION_EOF_EVENTS: &str = "kafka_trigger_partition_eof_total";

/// Counter for times the assignment was paused behind a full dispatch queue
pub const PARTITION_PAUSES: &str = "kafka_trigger_partition_pauses_total";

// ==== Dispatch queue ====
/// Counter for flushes that had to wait because the dispatch queue was full
pub const QUEUE_FULL_WAITS: &str = "kafka_trigger_queue_full_waits_total";

/// Histogram of batch sizes handed to the dispatch queue
pub const BATCH_SIZE: &str = "kafka_trigger_batch_size";

/// Counter for batches dropped by a flush that was aborted or found the queue closed
pub const BATCHES_DROPPED: &str = "kafka_trigger_batches_dropped_total";

// ==== Dispatch ====
/// Counter for callback invocations that returned an error
pub const CALLBACK_FAILURES: &str = "kafka_trigger_callback_failures_total";

/// Histogram for callback duration in seconds
pub const CALLBACK_DURATION: &str = "kafka_trigger_callback_duration_seconds";

// ==== Commits ====
/// Counter for offsets dropped because they did not advance the partition
pub const COMMIT_REGRESSIONS: &str = "kafka_trigger_commit_regressions_total";

/// Counter for failed synchronous commits and offset stores
pub const COMMIT_FAILURES: &str = "kafka_trigger_commit_failures_total";

/// Gauge for the last offset handed to the broker per partition
pub const PARTITION_LAST_COMMITTED_OFFSET: &str = "kafka_trigger_partition_last_committed_offset";

// ==== Scaling ====
/// Gauge for total consumer lag over all partitions of the topic
pub const CONSUMER_LAG: &str = "kafka_trigger_consumer_lag";

/// Gauge for the number of partitions of the topic
pub const PARTITION_COUNT: &str = "kafka_trigger_partition_count";

/// Gauge for the last target worker count computed by the target scaler
pub const TARGET_WORKER_COUNT: &str = "kafka_trigger_target_worker_count";

/// Counter for metadata or watermark queries that failed
pub const LAG_QUERY_FAILURES: &str = "kafka_trigger_lag_query_failures_total";

// ==== Rebalance ====
/// Counter for partitions assigned to or revoked from this consumer
pub const REBALANCE_PARTITIONS: &str = "kafka_trigger_rebalance_partitions_total";
