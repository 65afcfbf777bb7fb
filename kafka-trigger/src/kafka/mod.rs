pub mod client;
pub mod config;
pub mod context;
pub mod record;
pub mod types;

pub use client::{BrokerClient, PollEvent, RdKafkaClient};
pub use config::ConsumerConfigBuilder;
pub use record::{HeaderError, Record, RecordHeader, RecordHeaders};
pub use types::{Partition, PartitionOffset, WatermarkOffsets};
