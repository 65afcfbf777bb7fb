//! Lag-driven autoscaling: the metrics provider samples consumer lag, the topic
//! scaler votes on the trend, and the target scaler computes a worker count.

pub mod metrics_provider;
pub mod registry;
pub mod target_scaler;
pub mod topic_scaler;

pub use metrics_provider::{partition_lag, MetricsProvider, MetricsSample, PartitionCache};
pub use registry::{ScalerKey, ScalerRegistry};
pub use target_scaler::{
    validate_with_partition_count, ScalerError, ScalerState, TargetScaler, TargetScalerContext,
    TargetScalerResult,
};
pub use topic_scaler::{ScaleMonitor, ScaleStatus, ScaleVote, TopicScaler, SAMPLES_TO_CONSIDER};
