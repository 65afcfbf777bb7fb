//! Commit strategies.
//!
//! A strategy turns "these records were handled" into a durable resume
//! position on the broker. Both strategies are at-least-once: a position is
//! only handed over after the callback of the record before it completed, and
//! the [`CommitTracker`] drops anything that would move a partition backwards.

pub mod tracker;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::warn;

use crate::kafka::client::BrokerClient;
use crate::kafka::types::PartitionOffset;
use crate::metrics_consts::COMMIT_FAILURES;

pub use tracker::CommitTracker;

pub trait CommitStrategy: Send + Sync {
    /// Hand resume positions to the broker. Failures are logged, never returned.
    fn commit(&self, offsets: &[PartitionOffset]);
}

/// Store offsets locally and let librdkafka's auto-commit timer flush them.
/// Never blocks on the broker.
pub struct BufferedCommit {
    client: Arc<dyn BrokerClient>,
    tracker: Arc<CommitTracker>,
}

impl BufferedCommit {
    pub fn new(client: Arc<dyn BrokerClient>, tracker: Arc<CommitTracker>) -> Self {
        Self { client, tracker }
    }
}

impl CommitStrategy for BufferedCommit {
    fn commit(&self, offsets: &[PartitionOffset]) {
        for offset in self.tracker.advance(offsets) {
            if let Err(e) = self.client.store_offset(&offset) {
                warn!(
                    topic = offset.topic(),
                    partition = offset.partition_number(),
                    offset = offset.offset(),
                    "Failed to store offset: {e}"
                );
                metrics::counter!(COMMIT_FAILURES, "source" => "store").increment(1);
            }
        }
    }
}

/// Commit synchronously. The calling task waits one broker round trip.
pub struct ImmediateCommit {
    client: Arc<dyn BrokerClient>,
    tracker: Arc<CommitTracker>,
}

impl ImmediateCommit {
    pub fn new(client: Arc<dyn BrokerClient>, tracker: Arc<CommitTracker>) -> Self {
        Self { client, tracker }
    }
}

impl CommitStrategy for ImmediateCommit {
    fn commit(&self, offsets: &[PartitionOffset]) {
        let offsets = self.tracker.advance(offsets);
        if offsets.is_empty() {
            return;
        }

        if let Err(e) = self.client.commit(&offsets) {
            warn!(
                partitions = offsets.len(),
                "Failed to commit offsets: {e}"
            );
            metrics::counter!(COMMIT_FAILURES, "source" => "commit").increment(1);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    #[default]
    Buffered,
    Immediate,
}

impl CommitMode {
    pub fn strategy(
        self,
        client: Arc<dyn BrokerClient>,
        tracker: Arc<CommitTracker>,
    ) -> Arc<dyn CommitStrategy> {
        match self {
            CommitMode::Buffered => Arc::new(BufferedCommit::new(client, tracker)),
            CommitMode::Immediate => Arc::new(ImmediateCommit::new(client, tracker)),
        }
    }
}

impl FromStr for CommitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buffered" | "auto" => Ok(CommitMode::Buffered),
            "immediate" | "sync" => Ok(CommitMode::Immediate),
            other => Err(format!("unknown commit mode: {other}")),
        }
    }
}

impl fmt::Display for CommitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitMode::Buffered => write!(f, "buffered"),
            CommitMode::Immediate => write!(f, "immediate"),
        }
    }
}
