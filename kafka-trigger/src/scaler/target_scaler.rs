use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::metrics_consts::TARGET_WORKER_COUNT;
use crate::scaler::metrics_provider::{MetricsProvider, MetricsSample};
use crate::scaler::registry::ScalerKey;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ScalerError {
    #[error("instance concurrency must be at least 1, got {0}")]
    InvalidConcurrency(i64),
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TargetScalerContext {
    /// Records one instance is expected to work through; defaults to the lag threshold
    pub instance_concurrency: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TargetScalerResult {
    pub target_worker_count: u32,
}

/// What the target scaler remembers between evaluations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ScalerState {
    pub last_target_worker_count: Option<u32>,
    pub last_scale_up_time: Option<DateTime<Utc>>,
}

fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Computes how many workers the lag calls for, one per `concurrency` records
/// of lag, never more than there are partitions. Scaling down is held back for
/// `scale_down_throttle` after the last scale up.
pub struct TargetScaler {
    key: ScalerKey,
    lag_threshold: i64,
    provider: Arc<MetricsProvider>,
    metrics_freshness: TimeDelta,
    scale_down_throttle: TimeDelta,
}

impl TargetScaler {
    pub fn new(key: ScalerKey, lag_threshold: i64, provider: Arc<MetricsProvider>) -> Self {
        Self {
            key,
            lag_threshold,
            provider,
            metrics_freshness: TimeDelta::seconds(180),
            scale_down_throttle: TimeDelta::seconds(60),
        }
    }

    pub fn with_metrics_freshness(mut self, freshness: Duration) -> Self {
        self.metrics_freshness = to_time_delta(freshness);
        self
    }

    pub fn with_scale_down_throttle(mut self, throttle: Duration) -> Self {
        self.scale_down_throttle = to_time_delta(throttle);
        self
    }

    pub fn key(&self) -> &ScalerKey {
        &self.key
    }

    /// Evaluate against the current metrics and update `state`. Blocks on broker
    /// calls when the last metrics are stale.
    pub fn get_scale_result(
        &self,
        state: &mut ScalerState,
        context: &TargetScalerContext,
    ) -> Result<TargetScalerResult, ScalerError> {
        let now = Utc::now();
        let metrics = self.validate_and_get_metrics(now);
        self.evaluate(state, context, &metrics, now)
    }

    /// The provider's last metrics if no older than the freshness window, otherwise new ones
    pub fn validate_and_get_metrics(&self, now: DateTime<Utc>) -> MetricsSample {
        match self.provider.last_calculated_metrics() {
            Some(metrics) if now - metrics.timestamp <= self.metrics_freshness => metrics,
            _ => {
                debug!(key = ?self.key, "Metrics stale, recomputing");
                self.provider.get_metrics()
            }
        }
    }

    pub fn evaluate(
        &self,
        state: &mut ScalerState,
        context: &TargetScalerContext,
        metrics: &MetricsSample,
        now: DateTime<Utc>,
    ) -> Result<TargetScalerResult, ScalerError> {
        // a live trigger is never scaled to zero
        if metrics.total_lag <= 0 {
            state.last_target_worker_count = Some(1);
            return Ok(self.result(1));
        }

        let concurrency = self.concurrency(context)?;
        let raw = metrics.total_lag / concurrency + i64::from(metrics.total_lag % concurrency != 0);
        let validated = validate_with_partition_count(raw, metrics.partition_count);
        let target = self.throttle(state, validated, now);

        if target != validated {
            debug!(
                key = ?self.key,
                desired = validated,
                kept = target,
                "Scale down throttled"
            );
        }
        if state.last_target_worker_count != Some(target) {
            info!(
                topic = %self.key.topic,
                consumer_group = %self.key.consumer_group,
                total_lag = metrics.total_lag,
                partition_count = metrics.partition_count,
                concurrency,
                target,
                "Target worker count changed"
            );
        }

        state.last_target_worker_count = Some(target);
        Ok(self.result(target))
    }

    pub fn concurrency(&self, context: &TargetScalerContext) -> Result<i64, ScalerError> {
        let concurrency = context
            .instance_concurrency
            .map(i64::from)
            .unwrap_or(self.lag_threshold);
        if concurrency < 1 {
            return Err(ScalerError::InvalidConcurrency(concurrency));
        }
        Ok(concurrency)
    }

    fn throttle(&self, state: &mut ScalerState, validated: u32, now: DateTime<Utc>) -> u32 {
        let Some(last) = state.last_target_worker_count else {
            if validated > 0 {
                state.last_scale_up_time = Some(now);
            }
            return validated;
        };

        if validated > last {
            state.last_scale_up_time = Some(now);
            return validated;
        }

        match state.last_scale_up_time {
            Some(scaled_up) if now - scaled_up < self.scale_down_throttle => last,
            _ => validated,
        }
    }

    fn result(&self, target_worker_count: u32) -> TargetScalerResult {
        metrics::gauge!(TARGET_WORKER_COUNT, "topic" => self.key.topic.clone())
            .set(f64::from(target_worker_count));
        TargetScalerResult {
            target_worker_count,
        }
    }
}

/// Cap the worker count at the partition count; extra workers would sit idle
pub fn validate_with_partition_count(target: i64, partition_count: i32) -> u32 {
    let capped = target.min(i64::from(partition_count)).max(0);
    u32::try_from(capped).unwrap_or(u32::MAX)
}
