use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatch::queue::{Batch, DispatchSender, EnqueueError};
use crate::kafka::record::Record;
use crate::metrics_consts::{BATCHES_DROPPED, BATCH_SIZE, QUEUE_FULL_WAITS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending
    Empty,
    /// The batch of this many records is in the queue
    Enqueued(usize),
    /// The abort token fired while waiting for room; the records were dropped
    Aborted(usize),
    /// The worker is gone; the records were dropped
    Closed(usize),
}

/// Collects polled records and hands them to the dispatch queue as one batch.
///
/// Owned by the ingestion thread. A flush that meets a full queue sleeps and
/// retries, which stalls polling until the worker catches up.
pub struct BatchAccumulator {
    pending: Batch,
    sender: DispatchSender,
    retry_interval: Duration,
}

impl BatchAccumulator {
    pub fn new(sender: DispatchSender, retry_interval: Duration, size_hint: usize) -> Self {
        Self {
            pending: Vec::with_capacity(size_hint),
            sender,
            retry_interval,
        }
    }

    /// Append a record and return the number of records now pending
    pub fn add(&mut self, record: Record) -> usize {
        self.pending.push(record);
        self.pending.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Move everything pending into the queue, sleeping while it is full.
    pub fn flush(&mut self, abort: &CancellationToken) -> FlushOutcome {
        self.flush_with(abort, std::thread::sleep)
    }

    /// Move everything pending into the queue. While it is full, `wait` is
    /// called with the retry interval before every new attempt.
    ///
    /// Only `abort` ends the wait early; a graceful shutdown keeps the worker
    /// draining, so the wait resolves by itself.
    pub fn flush_with(
        &mut self,
        abort: &CancellationToken,
        mut wait: impl FnMut(Duration),
    ) -> FlushOutcome {
        if self.pending.is_empty() {
            return FlushOutcome::Empty;
        }

        let mut batch = std::mem::take(&mut self.pending);
        let size = batch.len();
        let mut logged_full = false;

        loop {
            match self.sender.try_enqueue(batch) {
                Ok(()) => {
                    metrics::histogram!(BATCH_SIZE).record(size as f64);
                    return FlushOutcome::Enqueued(size);
                }
                Err(EnqueueError::Closed(_)) => {
                    warn!(records = size, "Dispatch queue closed, dropping batch");
                    metrics::counter!(BATCHES_DROPPED, "reason" => "closed").increment(1);
                    return FlushOutcome::Closed(size);
                }
                Err(EnqueueError::Full(returned)) => {
                    if abort.is_cancelled() {
                        warn!(records = size, "Flush aborted while dispatch queue was full");
                        metrics::counter!(BATCHES_DROPPED, "reason" => "aborted").increment(1);
                        return FlushOutcome::Aborted(size);
                    }
                    if !logged_full {
                        info!(
                            records = size,
                            capacity = self.sender.capacity(),
                            "Queue full, waiting for processing"
                        );
                        metrics::counter!(QUEUE_FULL_WAITS).increment(1);
                        logged_full = true;
                    }
                    batch = returned;
                    wait(self.retry_interval);
                }
            }
        }
    }
}
