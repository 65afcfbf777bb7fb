use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info};

use crate::scaler::metrics_provider::{MetricsProvider, MetricsSample};

/// Number of most recent samples the vote looks at
pub const SAMPLES_TO_CONSIDER: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleVote {
    None,
    ScaleOut,
    ScaleIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaleStatus {
    pub vote: ScaleVote,
}

/// Votes on the worker count from the trend of recent lag samples
#[derive(Debug, Clone)]
pub struct TopicScaler {
    topic: String,
    consumer_group: String,
    lag_threshold: i64,
}

impl TopicScaler {
    pub fn new(
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
        lag_threshold: i64,
    ) -> Self {
        Self {
            topic: topic.into(),
            consumer_group: consumer_group.into(),
            lag_threshold,
        }
    }

    pub fn get_scale_status(&self, worker_count: u32, samples: &[MetricsSample]) -> ScaleStatus {
        let vote = self.vote(worker_count, samples);
        if vote != ScaleVote::None {
            info!(
                topic = %self.topic,
                consumer_group = %self.consumer_group,
                worker_count,
                vote = ?vote,
                "Scale vote"
            );
        }
        ScaleStatus { vote }
    }

    fn vote(&self, worker_count: u32, samples: &[MetricsSample]) -> ScaleVote {
        if samples.len() < SAMPLES_TO_CONSIDER {
            return ScaleVote::None;
        }
        let window = &samples[samples.len() - SAMPLES_TO_CONSIDER..];
        let latest = window[SAMPLES_TO_CONSIDER - 1];

        let workers = i64::from(worker_count);
        let partitions = i64::from(latest.partition_count);

        // more workers than partitions leaves some idle
        if workers > partitions {
            debug!(workers, partitions, "More workers than partitions");
            return ScaleVote::ScaleIn;
        }
        if workers == partitions {
            return ScaleVote::None;
        }

        let increasing = window.windows(2).all(|w| w[0].total_lag < w[1].total_lag);
        if increasing {
            debug!(latest_lag = latest.total_lag, "Lag increasing across window");
            return ScaleVote::ScaleOut;
        }

        let decreasing = window.windows(2).all(|w| w[0].total_lag > w[1].total_lag);
        if decreasing {
            debug!(latest_lag = latest.total_lag, "Lag decreasing across window");
            if latest.total_lag < partitions.saturating_mul(self.lag_threshold) {
                return ScaleVote::ScaleIn;
            }
        }

        ScaleVote::None
    }
}

/// Host-facing scale monitor: keeps the sample window and evaluates it.
pub struct ScaleMonitor {
    descriptor_id: String,
    scaler: TopicScaler,
    provider: Arc<MetricsProvider>,
    samples: Mutex<VecDeque<MetricsSample>>,
}

impl ScaleMonitor {
    pub fn new(
        function_id: &str,
        consumer_group: &str,
        scaler: TopicScaler,
        provider: Arc<MetricsProvider>,
    ) -> Self {
        let descriptor_id = format!(
            "{function_id}-kafkatrigger-{}-{consumer_group}",
            provider.topic()
        )
        .to_lowercase();

        Self {
            descriptor_id,
            scaler,
            provider,
            samples: Mutex::new(VecDeque::with_capacity(SAMPLES_TO_CONSIDER)),
        }
    }

    pub fn descriptor_id(&self) -> &str {
        &self.descriptor_id
    }

    /// Take a fresh sample from the provider and push it into the window.
    /// Blocks on broker calls.
    pub fn sample(&self) -> MetricsSample {
        let sample = self.provider.get_metrics();
        self.record_sample(sample);
        sample
    }

    pub fn record_sample(&self, sample: MetricsSample) {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples.push_back(sample);
        while samples.len() > SAMPLES_TO_CONSIDER {
            samples.pop_front();
        }
    }

    pub fn samples(&self) -> Vec<MetricsSample> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    pub fn scale_status(&self, worker_count: u32) -> ScaleStatus {
        self.scaler.get_scale_status(worker_count, &self.samples())
    }
}
