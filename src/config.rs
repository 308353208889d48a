use crate::object_store::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the daily CSV aggregation service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// Kafka configuration
    pub kafka: KafkaConfig,
    /// S3 configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Aggregation configuration
    #[serde(default)]
    pub aggregation: AggregationConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Kafka consumer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Topic carrying "object created" notifications
    #[serde(default = "default_notifications_topic")]
    pub notifications_topic: String,
    /// Enable SSL
    #[serde(default)]
    pub ssl_enabled: bool,
    /// SSL CA certificate path
    pub ssl_ca_location: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Auto offset reset policy
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
    /// Max poll interval in milliseconds
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,
}

/// S3 storage configuration
///
/// The bucket is not configured here; it arrives with each notification
/// event.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

/// Aggregation pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Maximum concurrent source-object fetches per invocation
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    /// Retry attempts for transient storage errors
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// First path segment of the aggregate output key
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
    /// Content type of the aggregate output object
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_fetch_concurrency(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            output_prefix: default_output_prefix(),
            content_type: default_content_type(),
        }
    }
}

// Default value functions
fn default_service_name() -> String {
    "daily-csv-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_consumer_group() -> String {
    "daily-csv-service".to_string()
}

fn default_notifications_topic() -> String {
    "storage.object-created".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30000
}

fn default_max_poll_interval_ms() -> u32 {
    300000
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_output_prefix() -> String {
    "daily".to_string()
}

fn default_content_type() -> String {
    "text/csv".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "daily-csv-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/dailycsv").required(false))
            .add_source(config::File::with_name("/etc/openaq/dailycsv").required(false))
            // Override with environment variables
            // DAILYCSV__KAFKA__BOOTSTRAP_SERVERS -> kafka.bootstrap_servers
            .add_source(
                config::Environment::with_prefix("DAILYCSV")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Retry policy for the object store adapter
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.aggregation.retry_max_attempts,
            base_delay: Duration::from_millis(self.aggregation.retry_base_delay_ms),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}
