//! Kafka trigger: polls a topic, batches records per partition, drives them
//! through a processing callback with at-least-once commits, and estimates how
//! many workers the consumer lag calls for.
//!
//! ## Error logging (anyhow)
//!
//! When logging `anyhow::Error` or other error types with a cause chain, use
//! formats that include the full chain:
//!
//! - **Inline format:** `{e:#}` for the full chain on one line.
//! - **Structured field:** `error = ?e` for the chain with `Caused by:` sections.
//!
//! When constructing errors, use `.context()` / `.with_context()` so the
//! original error remains the source.

pub mod commit;
pub mod config;
pub mod dispatch;
pub mod kafka;
pub mod listener;
pub mod metrics_consts;
pub mod scaler;
pub mod server;

// Used in "mod tests" and tests/ directory (integration tests)
pub mod test_utils;

pub use commit::{CommitMode, CommitStrategy, CommitTracker};
pub use dispatch::{DispatchMode, FunctionExecutor, TriggerInput};
pub use kafka::{BrokerClient, Partition, PartitionOffset, Record};
pub use listener::{KafkaListener, ListenerConfig};
