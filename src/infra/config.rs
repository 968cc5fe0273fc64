//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub username: String,
    pub password: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
    /// Base delay for exponential backoff on transient fetch failures
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum retry attempts per refresh cycle before going degraded
    #[serde(default = "default_backoff_max_retries")]
    pub backoff_max_retries: u32,
}

fn default_base_url() -> String {
    "https://thegymgroup.netpulse.com/np".to_string()
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Refresh interval in seconds (the upstream rate-limits aggressively;
    /// the reference integration polls every 15 minutes)
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval_secs: default_poll_interval_secs() }
    }
}

fn default_poll_interval_secs() -> u64 {
    900
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Enable MQTT egress publishing
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Topic for snapshot state JSONs (QoS 1)
    #[serde(default = "default_state_topic")]
    pub state_topic: String,
    /// Topic for online/offline availability (QoS 1)
    #[serde(default = "default_availability_topic")]
    pub availability_topic: String,
    /// Topic for periodic metrics snapshots (QoS 0)
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            state_topic: default_state_topic(),
            availability_topic: default_availability_topic(),
            metrics_topic: default_metrics_topic(),
        }
    }
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_state_topic() -> String {
    "gymbridge/state".to_string()
}

fn default_availability_topic() -> String {
    "gymbridge/availability".to_string()
}

fn default_metrics_topic() -> String {
    "gymbridge/metrics".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Identifier included in egress payloads (e.g. "home", "leyton")
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "gymbridge".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub poll: PollConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    api_username: String,
    api_password: String,
    api_base_url: String,
    api_timeout_ms: u64,
    backoff_base_ms: u64,
    backoff_max_retries: u32,
    poll_interval_secs: u64,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_egress_enabled: bool,
    mqtt_egress_state_topic: String,
    mqtt_egress_availability_topic: String,
    mqtt_egress_metrics_topic: String,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: "gymbridge".to_string(),
            api_username: String::new(),
            api_password: String::new(),
            api_base_url: default_base_url(),
            api_timeout_ms: 10_000,
            backoff_base_ms: 1_000,
            backoff_max_retries: 3,
            poll_interval_secs: 900,
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
            mqtt_egress_enabled: true,
            mqtt_egress_state_topic: "gymbridge/state".to_string(),
            mqtt_egress_availability_topic: "gymbridge/availability".to_string(),
            mqtt_egress_metrics_topic: "gymbridge/metrics".to_string(),
            metrics_interval_secs: 60,
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        // Default to dev.toml
        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            site_id: toml_config.site.id,
            api_username: toml_config.api.username,
            api_password: toml_config.api.password,
            api_base_url: toml_config.api.base_url,
            api_timeout_ms: toml_config.api.timeout_ms,
            backoff_base_ms: toml_config.api.backoff_base_ms,
            backoff_max_retries: toml_config.api.backoff_max_retries,
            poll_interval_secs: toml_config.poll.interval_secs,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_state_topic: toml_config.mqtt_egress.state_topic,
            mqtt_egress_availability_topic: toml_config.mqtt_egress.availability_topic,
            mqtt_egress_metrics_topic: toml_config.mqtt_egress.metrics_topic,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from a path - falls back to defaults on error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn api_username(&self) -> &str {
        &self.api_username
    }

    pub fn api_password(&self) -> &str {
        &self.api_password
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max_retries(&self) -> u32 {
        self.backoff_max_retries
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_state_topic(&self) -> &str {
        &self.mqtt_egress_state_topic
    }

    pub fn mqtt_egress_availability_topic(&self) -> &str {
        &self.mqtt_egress_availability_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress_metrics_topic
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to shrink backoff delays
    #[cfg(test)]
    pub fn with_backoff(mut self, base_ms: u64, max_retries: u32) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_max_retries = max_retries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.api_base_url(), "https://thegymgroup.netpulse.com/np");
        assert_eq!(config.poll_interval(), Duration::from_secs(900));
        assert_eq!(config.backoff_max_retries(), 3);
        assert_eq!(config.metrics_interval_secs(), 60);
        assert_eq!(config.mqtt_egress_state_topic(), "gymbridge/state");
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["gymbridge".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "gymbridge".to_string(),
            "--config".to_string(),
            "config/home.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/home.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["gymbridge".to_string(), "--config=config/leyton.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/leyton.toml");
    }
}
