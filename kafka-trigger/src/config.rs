use std::time::Duration;

use envconfig::Envconfig;
use rdkafka::ClientConfig;
use thiserror::Error;

use crate::commit::CommitMode;
use crate::dispatch::DispatchMode;
use crate::kafka::config::ConsumerConfigBuilder;
use crate::listener::{ListenerConfig, DEFAULT_POLL_SLICE};
use crate::scaler::ScalerKey;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // Kafka configuration
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "events")]
    pub kafka_topic: String,

    #[envconfig(default = "kafka-trigger")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String,

    #[envconfig(default = "kafka-trigger")]
    pub function_id: String,

    // Ingestion and dispatch
    #[envconfig(default = "64")]
    pub max_batch_size: usize,

    #[envconfig(default = "1")]
    pub subscriber_interval_secs: u64,

    #[envconfig(default = "10")]
    pub channel_capacity: usize,

    #[envconfig(default = "50")]
    pub channel_full_retry_interval_ms: u64,

    #[envconfig(default = "buffered")]
    pub commit_mode: String,

    #[envconfig(default = "single")]
    pub dispatch_mode: String,

    #[envconfig(default = "200")]
    pub auto_commit_interval_ms: u32,

    #[envconfig(default = "10")]
    pub shutdown_timeout_secs: u64,

    // Scaling
    #[envconfig(default = "1000")]
    pub lag_threshold: i64,

    #[envconfig(default = "180")]
    pub metrics_freshness_secs: u64,

    #[envconfig(default = "60")]
    pub scale_down_throttle_secs: u64,

    #[envconfig(default = "180")]
    pub metadata_refresh_interval_secs: u64,

    #[envconfig(default = "5")]
    pub metadata_timeout_secs: u64,

    // Optional librdkafka tuning
    pub session_timeout_ms: Option<u32>,

    pub max_poll_interval_ms: Option<u32>,

    pub queued_min_messages: Option<u32>,

    pub queued_max_messages_kbytes: Option<u32>,

    pub max_partition_fetch_bytes: Option<u32>,

    pub fetch_max_bytes: Option<u32>,

    #[envconfig(default = "180000")]
    pub metadata_max_age_ms: u32,

    #[envconfig(default = "5000")]
    pub statistics_interval_ms: u32,

    // HTTP server configuration
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::MustBePositive("MAX_BATCH_SIZE"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::MustBePositive("CHANNEL_CAPACITY"));
        }
        if self.subscriber_interval_secs == 0 {
            return Err(ConfigError::MustBePositive("SUBSCRIBER_INTERVAL_SECS"));
        }
        if self.lag_threshold <= 0 {
            return Err(ConfigError::MustBePositive("LAG_THRESHOLD"));
        }
        self.commit_mode()?;
        self.dispatch_mode()?;
        Ok(())
    }

    pub fn commit_mode(&self) -> Result<CommitMode, ConfigError> {
        self.commit_mode
            .parse()
            .map_err(|reason| ConfigError::Invalid {
                name: "COMMIT_MODE",
                reason,
            })
    }

    pub fn dispatch_mode(&self) -> Result<DispatchMode, ConfigError> {
        self.dispatch_mode
            .parse()
            .map_err(|reason| ConfigError::Invalid {
                name: "DISPATCH_MODE",
                reason,
            })
    }

    /// Get server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn subscriber_interval(&self) -> Duration {
        Duration::from_secs(self.subscriber_interval_secs)
    }

    pub fn channel_full_retry_interval(&self) -> Duration {
        Duration::from_millis(self.channel_full_retry_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn metrics_freshness(&self) -> Duration {
        Duration::from_secs(self.metrics_freshness_secs)
    }

    pub fn scale_down_throttle(&self) -> Duration {
        Duration::from_secs(self.scale_down_throttle_secs)
    }

    pub fn metadata_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.metadata_refresh_interval_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn to_listener_config(&self) -> Result<ListenerConfig, ConfigError> {
        Ok(ListenerConfig {
            topic: self.kafka_topic.clone(),
            max_batch_size: self.max_batch_size,
            subscriber_interval: self.subscriber_interval(),
            channel_capacity: self.channel_capacity,
            channel_full_retry_interval: self.channel_full_retry_interval(),
            dispatch_mode: self.dispatch_mode()?,
            commit_mode: self.commit_mode()?,
            poll_slice: DEFAULT_POLL_SLICE,
        })
    }

    pub fn consumer_config(&self) -> ClientConfig {
        let mut builder =
            ConsumerConfigBuilder::for_listener(&self.kafka_hosts, &self.kafka_consumer_group)
                .with_tls(self.kafka_tls)
                .with_offset_reset(&self.kafka_consumer_offset_reset)
                .with_auto_commit_interval_ms(self.auto_commit_interval_ms)
                .with_metadata_max_age_ms(self.metadata_max_age_ms)
                .with_statistics_interval_ms(self.statistics_interval_ms);

        if let Some(ms) = self.session_timeout_ms {
            builder = builder.with_session_timeout_ms(ms);
        }
        if let Some(ms) = self.max_poll_interval_ms {
            builder = builder.with_max_poll_interval_ms(ms);
        }
        if let Some(messages) = self.queued_min_messages {
            builder = builder.with_queued_min_messages(messages);
        }
        if let Some(kbytes) = self.queued_max_messages_kbytes {
            builder = builder.with_queued_max_messages_kbytes(kbytes);
        }
        if let Some(bytes) = self.max_partition_fetch_bytes {
            builder = builder.with_max_partition_fetch_bytes(bytes);
        }
        if let Some(bytes) = self.fetch_max_bytes {
            builder = builder.with_fetch_max_bytes(bytes);
        }

        builder.build()
    }

    pub fn scaler_key(&self) -> ScalerKey {
        ScalerKey::new(
            &self.kafka_topic,
            &self.kafka_consumer_group,
            &self.function_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::init_from_hashmap(&env).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert!(config.validate().is_ok());

        let listener = config.to_listener_config().unwrap();
        assert_eq!(listener.max_batch_size, 64);
        assert_eq!(listener.subscriber_interval, Duration::from_secs(1));
        assert_eq!(listener.channel_capacity, 10);
        assert_eq!(listener.channel_full_retry_interval, Duration::from_millis(50));
        assert_eq!(listener.dispatch_mode, DispatchMode::Single);
        assert_eq!(listener.commit_mode, CommitMode::Buffered);

        assert_eq!(config.metrics_freshness(), Duration::from_secs(180));
        assert_eq!(config.scale_down_throttle(), Duration::from_secs(60));
        assert_eq!(config.bind_address(), "0.0.0.0:8080");

        let consumer = config.consumer_config();
        assert_eq!(consumer.get("auto.commit.interval.ms"), Some("200"));
        assert_eq!(consumer.get("metadata.max.age.ms"), Some("180000"));
        assert_eq!(consumer.get("statistics.interval.ms"), Some("5000"));
        assert_eq!(consumer.get("session.timeout.ms"), None);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("KAFKA_TOPIC", "clicks"),
            ("DISPATCH_MODE", "multi"),
            ("COMMIT_MODE", "immediate"),
            ("SESSION_TIMEOUT_MS", "45000"),
            ("KAFKA_TLS", "true"),
        ]);

        let listener = config.to_listener_config().unwrap();
        assert_eq!(listener.topic, "clicks");
        assert_eq!(listener.dispatch_mode, DispatchMode::Multi);
        assert_eq!(listener.commit_mode, CommitMode::Immediate);

        let consumer = config.consumer_config();
        assert_eq!(consumer.get("session.timeout.ms"), Some("45000"));
        assert_eq!(consumer.get("security.protocol"), Some("ssl"));
        assert_eq!(config.scaler_key().topic, "clicks");
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let cases = [
            ("MAX_BATCH_SIZE", "MAX_BATCH_SIZE"),
            ("CHANNEL_CAPACITY", "CHANNEL_CAPACITY"),
            ("SUBSCRIBER_INTERVAL_SECS", "SUBSCRIBER_INTERVAL_SECS"),
            ("LAG_THRESHOLD", "LAG_THRESHOLD"),
        ];
        for (var, name) in cases {
            let config = config_from(&[(var, "0")]);
            assert_eq!(config.validate(), Err(ConfigError::MustBePositive(name)));
        }
    }

    #[test]
    fn test_validate_rejects_unknown_modes() {
        let config = config_from(&[("COMMIT_MODE", "eventually")]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                name: "COMMIT_MODE",
                ..
            })
        ));
    }
}
