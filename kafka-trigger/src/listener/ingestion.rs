use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::accumulator::{BatchAccumulator, FlushOutcome};
use crate::kafka::client::{BrokerClient, PollEvent};
use crate::kafka::types::Partition;
use crate::metrics_consts::{PARTITION_EOF_EVENTS, PARTITION_PAUSES, POLL_ERRORS};

const MAX_ERROR_BACKOFF_STEPS: u32 = 10;
const ERROR_BACKOFF_STEP: Duration = Duration::from_millis(100);

/// The polling side of a listener. Runs on its own OS thread.
pub(crate) struct IngestionLoop {
    pub(crate) client: Arc<dyn BrokerClient>,
    pub(crate) accumulator: BatchAccumulator,
    pub(crate) max_batch_size: usize,
    pub(crate) subscriber_interval: Duration,
    pub(crate) poll_slice: Duration,
    pub(crate) shutdown: CancellationToken,
    pub(crate) abort: CancellationToken,
}

impl IngestionLoop {
    /// Poll until shutdown, then flush what is left, close the queue, and
    /// signal `done`.
    pub(crate) fn run(mut self, done: oneshot::Sender<()>) {
        info!(
            max_batch_size = self.max_batch_size,
            interval_ms = self.subscriber_interval.as_millis() as u64,
            "Ingestion loop started"
        );

        let mut consecutive_errors = 0u32;
        let mut records = 0u64;

        'outer: while !self.shutdown.is_cancelled() {
            let batch_start = Instant::now();

            loop {
                if self.shutdown.is_cancelled() {
                    break;
                }
                let elapsed = batch_start.elapsed();
                if elapsed >= self.subscriber_interval {
                    break;
                }
                let wait = (self.subscriber_interval - elapsed).min(self.poll_slice);

                match self.client.poll(wait) {
                    Ok(Some(PollEvent::Record(record))) => {
                        consecutive_errors = 0;
                        records += 1;
                        if self.accumulator.add(record) >= self.max_batch_size
                            && !self.flush()
                        {
                            break 'outer;
                        }
                    }
                    Ok(Some(PollEvent::EndOfPartition(partition))) => {
                        info!(
                            topic = partition.topic(),
                            partition = partition.partition_number(),
                            "Reached end of partition"
                        );
                        metrics::counter!(PARTITION_EOF_EVENTS).increment(1);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        consecutive_errors += 1;
                        error!(consecutive_errors, "Error polling Kafka: {e}");
                        metrics::counter!(POLL_ERRORS).increment(1);
                        let backoff =
                            ERROR_BACKOFF_STEP * consecutive_errors.min(MAX_ERROR_BACKOFF_STEPS);
                        let remaining =
                            self.subscriber_interval.saturating_sub(batch_start.elapsed());
                        self.sleep_unless_shutdown(backoff.min(remaining));
                    }
                }
            }

            if !self.flush() {
                break;
            }
        }

        // last records polled before the shutdown request
        self.flush();
        debug!(records, "Ingestion loop polled its last record");

        // dropping the accumulator drops the queue sender, which lets the
        // worker finish once the queue is drained
        drop(self.accumulator);

        if done.send(()).is_err() {
            warn!("Listener stopped waiting before the ingestion loop finished");
        }
        info!("Ingestion loop stopped");
    }

    /// Sleep in poll-slice steps, returning early once shutdown is requested
    fn sleep_unless_shutdown(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.shutdown.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(self.poll_slice));
        }
    }

    /// Returns false when polling should stop because nothing can be delivered anymore.
    ///
    /// While the queue is full the assigned partitions are paused and the
    /// client keeps being polled, so the consumer stays in its group without
    /// fetching more than it can hand over.
    fn flush(&mut self) -> bool {
        let client = self.client.clone();
        let mut paused: Option<Vec<Partition>> = None;
        let mut held = Vec::new();

        let outcome = self.accumulator.flush_with(&self.abort, |retry_interval| {
            if paused.is_none() {
                paused = Some(pause_assignment(client.as_ref()));
            }
            match client.poll(retry_interval) {
                Ok(Some(PollEvent::Record(record))) => held.push(record),
                Ok(Some(PollEvent::EndOfPartition(_))) | Ok(None) => {}
                Err(e) => {
                    warn!("Error polling Kafka while paused: {e}");
                    metrics::counter!(POLL_ERRORS).increment(1);
                    std::thread::sleep(retry_interval);
                }
            }
        });

        if let Some(partitions) = paused {
            resume_partitions(client.as_ref(), &partitions);
        }
        for record in held {
            self.accumulator.add(record);
        }

        match outcome {
            FlushOutcome::Empty | FlushOutcome::Enqueued(_) => true,
            FlushOutcome::Aborted(dropped) => {
                warn!(dropped, "Flush aborted, stopping ingestion");
                false
            }
            FlushOutcome::Closed(dropped) => {
                warn!(dropped, "Dispatch worker is gone, stopping ingestion");
                false
            }
        }
    }
}

/// Pause every assigned partition and return what was paused
fn pause_assignment(client: &dyn BrokerClient) -> Vec<Partition> {
    let partitions = match client.assignment() {
        Ok(partitions) => partitions,
        Err(e) => {
            warn!("Failed to read assignment, not pausing: {e}");
            return vec![];
        }
    };
    if partitions.is_empty() {
        return partitions;
    }

    match client.pause(&partitions) {
        Ok(()) => {
            info!(partitions = partitions.len(), "Paused consumption while queue is full");
            metrics::counter!(PARTITION_PAUSES).increment(1);
            partitions
        }
        Err(e) => {
            warn!("Failed to pause partitions: {e}");
            vec![]
        }
    }
}

fn resume_partitions(client: &dyn BrokerClient, partitions: &[Partition]) {
    if partitions.is_empty() {
        return;
    }
    match client.resume(partitions) {
        Ok(()) => info!(partitions = partitions.len(), "Resumed consumption"),
        // partitions revoked while paused cannot be resumed
        Err(e) => warn!("Failed to resume partitions: {e}"),
    }
}
