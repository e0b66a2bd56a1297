//! Configuration for wasend

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Dispatch pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Daily counter storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Messaging gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Dispatch pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum successful sends per calendar day
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,

    /// Target send rate
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,

    /// Items dispatched between mandatory pauses
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Length of the pause after each batch
    #[serde(default = "default_batch_pause_minutes")]
    pub batch_pause_minutes: u32,

    /// Delivery attempts before an item is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff applied after a transient failure
    #[serde(default = "default_retry_delay_minutes")]
    pub retry_delay_minutes: u32,

    /// Double the send interval during the night window
    #[serde(default = "default_true")]
    pub enable_smart_delay: bool,

    /// Night window start (HH:MM)
    #[serde(default = "default_night_start")]
    pub night_start: String,

    /// Night window end (HH:MM)
    #[serde(default = "default_night_end")]
    pub night_end: String,

    /// Only dispatch inside the business hours window
    #[serde(default)]
    pub respect_business_hours: bool,

    /// Business hours start (HH:MM)
    #[serde(default = "default_business_hours_start")]
    pub business_hours_start: String,

    /// Business hours end (HH:MM)
    #[serde(default = "default_business_hours_end")]
    pub business_hours_end: String,

    /// Upper bound on a single gateway call
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,

    /// Delay before a sent item is confirmed as delivered
    #[serde(default = "default_confirmation_delay")]
    pub confirmation_delay_secs: u64,

    /// Upper bound on any single idle wait of the dispatch loop
    #[serde(default = "default_idle_poll")]
    pub idle_poll_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            daily_limit: default_daily_limit(),
            messages_per_minute: default_messages_per_minute(),
            batch_size: default_batch_size(),
            batch_pause_minutes: default_batch_pause_minutes(),
            max_attempts: default_max_attempts(),
            retry_delay_minutes: default_retry_delay_minutes(),
            enable_smart_delay: default_true(),
            night_start: default_night_start(),
            night_end: default_night_end(),
            respect_business_hours: false,
            business_hours_start: default_business_hours_start(),
            business_hours_end: default_business_hours_end(),
            delivery_timeout_secs: default_delivery_timeout(),
            confirmation_delay_secs: default_confirmation_delay(),
            idle_poll_secs: default_idle_poll(),
        }
    }
}

fn default_daily_limit() -> u32 {
    1000
}

fn default_messages_per_minute() -> u32 {
    10
}

fn default_batch_size() -> u32 {
    50
}

fn default_batch_pause_minutes() -> u32 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_minutes() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_night_start() -> String {
    "22:00".to_string()
}

fn default_night_end() -> String {
    "07:00".to_string()
}

fn default_business_hours_start() -> String {
    "09:00".to_string()
}

fn default_business_hours_end() -> String {
    "18:00".to_string()
}

fn default_delivery_timeout() -> u64 {
    30
}

fn default_confirmation_delay() -> u64 {
    2
}

fn default_idle_poll() -> u64 {
    30
}

/// Parse an `HH:MM` clock time
pub fn parse_clock_time(value: &str) -> crate::Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|e| {
        crate::Error::Config(format!("Invalid time '{}', expected HH:MM: {}", value, e))
    })
}

impl PipelineConfig {
    /// Check the configuration for values the dispatch loop cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.daily_limit == 0 {
            return Err(crate::Error::Config(
                "daily_limit must be greater than zero".to_string(),
            ));
        }
        if self.messages_per_minute == 0 {
            return Err(crate::Error::Config(
                "messages_per_minute must be greater than zero".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(crate::Error::Config(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(crate::Error::Config(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        if self.delivery_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "delivery_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.idle_poll_secs == 0 {
            return Err(crate::Error::Config(
                "idle_poll_secs must be greater than zero".to_string(),
            ));
        }

        let night_start = parse_clock_time(&self.night_start)?;
        let night_end = parse_clock_time(&self.night_end)?;
        if night_start == night_end {
            return Err(crate::Error::Config(
                "night window start and end must differ".to_string(),
            ));
        }

        let open = parse_clock_time(&self.business_hours_start)?;
        let close = parse_clock_time(&self.business_hours_end)?;
        if open == close {
            return Err(crate::Error::Config(
                "business hours start and end must differ".to_string(),
            ));
        }

        Ok(())
    }

    /// Merge a partial update, returning the validated result
    pub fn merged(&self, patch: &PipelineConfigPatch) -> crate::Result<Self> {
        let mut next = self.clone();

        if let Some(v) = patch.daily_limit {
            next.daily_limit = v;
        }
        if let Some(v) = patch.messages_per_minute {
            next.messages_per_minute = v;
        }
        if let Some(v) = patch.batch_size {
            next.batch_size = v;
        }
        if let Some(v) = patch.batch_pause_minutes {
            next.batch_pause_minutes = v;
        }
        if let Some(v) = patch.max_attempts {
            next.max_attempts = v;
        }
        if let Some(v) = patch.retry_delay_minutes {
            next.retry_delay_minutes = v;
        }
        if let Some(v) = patch.enable_smart_delay {
            next.enable_smart_delay = v;
        }
        if let Some(v) = &patch.night_start {
            next.night_start = v.clone();
        }
        if let Some(v) = &patch.night_end {
            next.night_end = v.clone();
        }
        if let Some(v) = patch.respect_business_hours {
            next.respect_business_hours = v;
        }
        if let Some(v) = &patch.business_hours_start {
            next.business_hours_start = v.clone();
        }
        if let Some(v) = &patch.business_hours_end {
            next.business_hours_end = v.clone();
        }
        if let Some(v) = patch.delivery_timeout_secs {
            next.delivery_timeout_secs = v;
        }
        if let Some(v) = patch.confirmation_delay_secs {
            next.confirmation_delay_secs = v;
        }
        if let Some(v) = patch.idle_poll_secs {
            next.idle_poll_secs = v;
        }

        next.validate()?;
        Ok(next)
    }
}

/// Partial pipeline configuration update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfigPatch {
    pub daily_limit: Option<u32>,
    pub messages_per_minute: Option<u32>,
    pub batch_size: Option<u32>,
    pub batch_pause_minutes: Option<u32>,
    pub max_attempts: Option<u32>,
    pub retry_delay_minutes: Option<u32>,
    pub enable_smart_delay: Option<bool>,
    pub night_start: Option<String>,
    pub night_end: Option<String>,
    pub respect_business_hours: Option<bool>,
    pub business_hours_start: Option<String>,
    pub business_hours_end: Option<String>,
    pub delivery_timeout_secs: Option<u64>,
    pub confirmation_delay_secs: Option<u64>,
    pub idle_poll_secs: Option<u64>,
}

/// Daily counter storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend: "memory", "file" or "sqlite"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Counter file (file backend) or database file (sqlite backend)
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
        }
    }
}

fn default_storage_backend() -> String {
    "file".to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/daily_counters.json")
}

/// Messaging gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway backend: "simulated" or "http"
    #[serde(default = "default_gateway_backend")]
    pub backend: String,

    /// Base URL of the HTTP gateway
    pub url: Option<String>,

    /// Bearer token for the HTTP gateway
    pub token: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,

    /// Probability of a transient failure (simulated backend)
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f64,

    /// Simulated network latency in milliseconds
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,

    /// Numbers the simulated backend rejects as blocked
    #[serde(default)]
    pub blocked_numbers: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend: default_gateway_backend(),
            url: None,
            token: None,
            timeout_secs: default_gateway_timeout(),
            failure_rate: default_failure_rate(),
            latency_ms: default_latency_ms(),
            blocked_numbers: Vec::new(),
        }
    }
}

fn default_gateway_backend() -> String {
    "simulated".to_string()
}

fn default_gateway_timeout() -> u64 {
    30
}

fn default_failure_rate() -> f64 {
    0.05
}

fn default_latency_ms() -> u64 {
    250
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.pipeline.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file plus `WASEND_*` environment overrides
    ///
    /// Without an explicit path the default locations are tried in order;
    /// a missing file is not an error, every field has a default.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => [
                PathBuf::from("./wasend.toml"),
                PathBuf::from("/etc/wasend/wasend.toml"),
            ]
            .into_iter()
            .find(|p| p.exists()),
        };

        let mut builder = ::config::Config::builder();
        if let Some(path) = &path {
            tracing::debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(path.as_path()).required(true));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("WASEND")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.pipeline.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let pipeline = PipelineConfig::default();
        assert_eq!(pipeline.daily_limit, 1000);
        assert_eq!(pipeline.max_attempts, 3);
        assert!(pipeline.validate().is_ok());

        let storage = StorageConfig::default();
        assert_eq!(storage.backend, "file");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[pipeline]
messages_per_minute = 60
batch_size = 10
respect_business_hours = true
business_hours_start = "08:30"

[storage]
backend = "sqlite"
path = "/tmp/wasend.db"

[gateway]
backend = "http"
url = "http://localhost:9000"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.pipeline.messages_per_minute, 60);
        assert_eq!(config.pipeline.batch_size, 10);
        assert_eq!(config.pipeline.business_hours_start, "08:30");
        assert_eq!(config.pipeline.business_hours_end, "18:00");
        assert_eq!(config.storage.backend, "sqlite");
        assert_eq!(config.gateway.url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[pipeline]\ndaily_limit = 42\n\n[logging]\nformat = \"json\"").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.pipeline.daily_limit, 42);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = PipelineConfig {
            messages_per_minute: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            business_hours_start: "9am".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        let config = PipelineConfig {
            business_hours_start: "10:00".to_string(),
            business_hours_end: "10:00".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_patch() {
        let base = PipelineConfig::default();
        let patch = PipelineConfigPatch {
            batch_size: Some(5),
            respect_business_hours: Some(true),
            business_hours_end: Some("20:00".to_string()),
            ..Default::default()
        };

        let merged = base.merged(&patch).unwrap();
        assert_eq!(merged.batch_size, 5);
        assert!(merged.respect_business_hours);
        assert_eq!(merged.business_hours_end, "20:00");
        assert_eq!(merged.daily_limit, base.daily_limit);
    }

    #[test]
    fn test_merge_rejects_invalid_patch() {
        let base = PipelineConfig::default();
        let patch = PipelineConfigPatch {
            business_hours_start: Some("25:99".to_string()),
            ..Default::default()
        };
        assert!(base.merged(&patch).is_err());
    }
}
