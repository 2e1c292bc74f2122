use crate::{PublishError, PublishResult};
use std::env;
use std::time::Duration;

pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "kafka:9092";
pub const DEFAULT_CLIENT_ID: &str = "keycloak-event-publisher";
pub const DEFAULT_ACKS: &str = "1";
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_LINGER_MS: u64 = 10;
pub const DEFAULT_BATCH_SIZE: usize = 16_384;
pub const DEFAULT_COMPRESSION: &str = "snappy";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_CLOSE_GRACE_MS: u64 = 10_000;

/// In-flight requests per connection stay at one so retries cannot reorder a key.
pub const MAX_IN_FLIGHT_PER_CONNECTION: u32 = 1;

const ACKS_VALUES: [&str; 4] = ["0", "1", "-1", "all"];
const COMPRESSION_VALUES: [&str; 5] = ["none", "gzip", "snappy", "lz4", "zstd"];

/// Producer settings, read once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerConfig {
    pub bootstrap_servers: String,
    pub client_id: String,
    pub acks: String,
    pub retries: u32,
    pub linger: Duration,
    pub batch_size: usize,
    pub compression: String,
    pub request_timeout: Duration,
    pub delivery_timeout: Duration,
    pub close_grace: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            acks: DEFAULT_ACKS.to_string(),
            retries: DEFAULT_RETRIES,
            linger: Duration::from_millis(DEFAULT_LINGER_MS),
            batch_size: DEFAULT_BATCH_SIZE,
            compression: DEFAULT_COMPRESSION.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            delivery_timeout: Duration::from_millis(DEFAULT_DELIVERY_TIMEOUT_MS),
            close_grace: Duration::from_millis(DEFAULT_CLOSE_GRACE_MS),
        }
    }
}

impl ProducerConfig {
    /// Reads the `KAFKA_*` variables from the process environment.
    ///
    /// - `KAFKA_BOOTSTRAP_SERVERS` (default `kafka:9092`)
    /// - `KAFKA_PRODUCER_CLIENT_ID` (default `keycloak-event-publisher`)
    /// - `KAFKA_ACKS` (default `1`)
    /// - `KAFKA_RETRIES` (default `3`)
    /// - `KAFKA_LINGER_MS` (default `10`)
    /// - `KAFKA_BATCH_SIZE` (default `16384`)
    /// - `KAFKA_COMPRESSION_TYPE` (default `snappy`)
    /// - `KAFKA_REQUEST_TIMEOUT_MS` (default `30000`)
    /// - `KAFKA_DELIVERY_TIMEOUT_MS` (default `120000`)
    /// - `KAFKA_CLOSE_GRACE_MS` (default `10000`)
    pub fn from_env() -> PublishResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> PublishResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let config = Self {
            bootstrap_servers: value("KAFKA_BOOTSTRAP_SERVERS").unwrap_or(defaults.bootstrap_servers),
            client_id: value("KAFKA_PRODUCER_CLIENT_ID").unwrap_or(defaults.client_id),
            acks: value("KAFKA_ACKS")
                .map(|v| v.to_ascii_lowercase())
                .unwrap_or(defaults.acks),
            retries: parse_number("KAFKA_RETRIES", value("KAFKA_RETRIES"))?.unwrap_or(defaults.retries),
            linger: parse_number("KAFKA_LINGER_MS", value("KAFKA_LINGER_MS"))?
                .map(Duration::from_millis)
                .unwrap_or(defaults.linger),
            batch_size: parse_number("KAFKA_BATCH_SIZE", value("KAFKA_BATCH_SIZE"))?.unwrap_or(defaults.batch_size),
            compression: value("KAFKA_COMPRESSION_TYPE")
                .map(|v| v.to_ascii_lowercase())
                .unwrap_or(defaults.compression),
            request_timeout: parse_number("KAFKA_REQUEST_TIMEOUT_MS", value("KAFKA_REQUEST_TIMEOUT_MS"))?
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            delivery_timeout: parse_number("KAFKA_DELIVERY_TIMEOUT_MS", value("KAFKA_DELIVERY_TIMEOUT_MS"))?
                .map(Duration::from_millis)
                .unwrap_or(defaults.delivery_timeout),
            close_grace: parse_number("KAFKA_CLOSE_GRACE_MS", value("KAFKA_CLOSE_GRACE_MS"))?
                .map(Duration::from_millis)
                .unwrap_or(defaults.close_grace),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PublishResult<()> {
        if self.brokers().is_empty() {
            return Err(PublishError::Config("KAFKA_BOOTSTRAP_SERVERS lists no brokers".into()));
        }
        if self.client_id.trim().is_empty() {
            return Err(PublishError::Config("KAFKA_PRODUCER_CLIENT_ID must not be empty".into()));
        }
        if !ACKS_VALUES.contains(&self.acks.as_str()) {
            return Err(PublishError::Config(format!(
                "unsupported KAFKA_ACKS '{}'; use 0, 1, -1 or all",
                self.acks
            )));
        }
        if !COMPRESSION_VALUES.contains(&self.compression.as_str()) {
            return Err(PublishError::Config(format!(
                "unsupported KAFKA_COMPRESSION_TYPE '{}'",
                self.compression
            )));
        }
        if self.batch_size == 0 {
            return Err(PublishError::Config("KAFKA_BATCH_SIZE must be positive".into()));
        }
        if self.request_timeout.is_zero() || self.delivery_timeout.is_zero() {
            return Err(PublishError::Config("request and delivery timeouts must be positive".into()));
        }
        Ok(())
    }

    pub fn brokers(&self) -> Vec<&str> {
        self.bootstrap_servers
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .collect()
    }

    /// Pinned; not configurable.
    pub fn max_in_flight(&self) -> u32 {
        MAX_IN_FLIGHT_PER_CONNECTION
    }

    /// Always on, so broker-side retries never duplicate a write.
    pub fn idempotence(&self) -> bool {
        true
    }

    /// The acks value handed to the client. The idempotent producer needs every
    /// in-sync replica to acknowledge, so it wins over the configured mode.
    pub fn effective_acks(&self) -> &str {
        if self.idempotence() {
            "all"
        } else {
            &self.acks
        }
    }

    pub fn acks_overridden(&self) -> bool {
        self.effective_acks() != self.acks && !(self.acks == "-1" && self.effective_acks() == "all")
    }

    #[cfg(feature = "kafka-producer")]
    pub fn client_config(&self) -> rdkafka::ClientConfig {
        let mut config = rdkafka::ClientConfig::new();
        config.set("bootstrap.servers", self.brokers().join(","));
        config.set("client.id", &self.client_id);
        config.set("acks", self.effective_acks());
        config.set("retries", self.retries.to_string());
        config.set(
            "max.in.flight.requests.per.connection",
            self.max_in_flight().to_string(),
        );
        config.set("linger.ms", self.linger.as_millis().to_string());
        config.set("batch.size", self.batch_size.to_string());
        config.set("compression.type", &self.compression);
        config.set("request.timeout.ms", self.request_timeout.as_millis().to_string());
        config.set("delivery.timeout.ms", self.delivery_timeout.as_millis().to_string());
        config.set("enable.idempotence", self.idempotence().to_string());
        config
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: Option<String>) -> PublishResult<Option<T>> {
    raw.map(|value| {
        value
            .parse::<T>()
            .map_err(|_| PublishError::Config(format!("{key} must be a non-negative integer, got '{value}'")))
    })
    .transpose()
}
