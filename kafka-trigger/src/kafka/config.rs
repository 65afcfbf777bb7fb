use rdkafka::ClientConfig;

/// Kafka consumer configuration builder with the listener's defaults.
///
/// Offsets are stored explicitly by the commit strategy after the callback ran
/// (`enable.auto.offset.store=false`) and flushed to the broker by librdkafka's
/// auto-commit timer (`enable.auto.commit=true`). A strategy that commits
/// synchronously still works with this setup: the auto-commit timer simply has
/// nothing new to flush.
pub struct ConsumerConfigBuilder {
    config: ClientConfig,
}

impl ConsumerConfigBuilder {
    /// Create a config builder for the trigger listener.
    ///
    /// Sets: auto.commit=true, auto.offset.store=false, auto.commit.interval.ms=200,
    /// auto.offset.reset=earliest, metadata.max.age.ms=180000, socket keepalive,
    /// statistics.interval.ms=5000 (feeds the cached partition watermarks).
    pub fn for_listener(bootstrap_servers: &str, group_id: &str) -> Self {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id);

        config
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.commit.interval.ms", "200")
            .set("auto.offset.reset", "earliest")
            .set("metadata.max.age.ms", "180000")
            .set("socket.keepalive.enable", "true")
            .set("enable.partition.eof", "false")
            .set("statistics.interval.ms", "5000");

        Self { config }
    }

    /// Enable TLS/SSL for Kafka connection
    pub fn with_tls(mut self, enabled: bool) -> Self {
        if enabled {
            self.config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
        self
    }

    /// Add any custom configuration
    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.config.set(key, value);
        self
    }

    /// How often librdkafka flushes stored offsets to the broker
    pub fn with_auto_commit_interval_ms(mut self, ms: u32) -> Self {
        self.config.set("auto.commit.interval.ms", ms.to_string());
        self
    }

    pub fn with_offset_reset(mut self, policy: &str) -> Self {
        self.config.set("auto.offset.reset", policy);
        self
    }

    /// Emit an end-of-partition event whenever the consumer catches up
    pub fn with_partition_eof(mut self, enabled: bool) -> Self {
        self.config
            .set("enable.partition.eof", if enabled { "true" } else { "false" });
        self
    }

    pub fn with_metadata_max_age_ms(mut self, ms: u32) -> Self {
        self.config.set("metadata.max.age.ms", ms.to_string());
        self
    }

    /// How often librdkafka emits statistics, 0 disables them and with them
    /// the cached watermarks
    pub fn with_statistics_interval_ms(mut self, ms: u32) -> Self {
        self.config.set("statistics.interval.ms", ms.to_string());
        self
    }

    pub fn with_session_timeout_ms(mut self, ms: u32) -> Self {
        self.config.set("session.timeout.ms", ms.to_string());
        self
    }

    /// Set maximum time between poll() calls before consumer leaves group
    pub fn with_max_poll_interval_ms(mut self, ms: u32) -> Self {
        self.config.set("max.poll.interval.ms", ms.to_string());
        self
    }

    pub fn with_queued_min_messages(mut self, messages: u32) -> Self {
        self.config.set("queued.min.messages", messages.to_string());
        self
    }

    /// Set maximum bytes to prefetch across all partitions (in KB)
    pub fn with_queued_max_messages_kbytes(mut self, kbytes: u32) -> Self {
        self.config
            .set("queued.max.messages.kbytes", kbytes.to_string());
        self
    }

    pub fn with_max_partition_fetch_bytes(mut self, bytes: u32) -> Self {
        self.config
            .set("max.partition.fetch.bytes", bytes.to_string());
        self
    }

    pub fn with_fetch_max_bytes(mut self, bytes: u32) -> Self {
        self.config.set("fetch.max.bytes", bytes.to_string());
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_defaults() {
        let config = ConsumerConfigBuilder::for_listener("localhost:9092", "group").build();

        assert_eq!(config.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(config.get("group.id"), Some("group"));
        assert_eq!(config.get("enable.auto.commit"), Some("true"));
        assert_eq!(config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(config.get("auto.commit.interval.ms"), Some("200"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(config.get("metadata.max.age.ms"), Some("180000"));
        assert_eq!(config.get("statistics.interval.ms"), Some("5000"));
        assert_eq!(config.get("security.protocol"), None);
    }

    #[test]
    fn test_overrides() {
        let config = ConsumerConfigBuilder::for_listener("broker:9093", "group")
            .with_tls(true)
            .with_auto_commit_interval_ms(1000)
            .with_offset_reset("latest")
            .with_partition_eof(true)
            .with_session_timeout_ms(30000)
            .with_statistics_interval_ms(1000)
            .set("client.id", "trigger-1")
            .build();

        assert_eq!(config.get("security.protocol"), Some("ssl"));
        assert_eq!(config.get("auto.commit.interval.ms"), Some("1000"));
        assert_eq!(config.get("auto.offset.reset"), Some("latest"));
        assert_eq!(config.get("enable.partition.eof"), Some("true"));
        assert_eq!(config.get("session.timeout.ms"), Some("30000"));
        assert_eq!(config.get("statistics.interval.ms"), Some("1000"));
        assert_eq!(config.get("client.id"), Some("trigger-1"));
    }
}
