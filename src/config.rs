use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("worker failure threshold must be at least 1")]
    ZeroFailureThreshold,
}

fn default_discovery_port() -> u16 {
    4210
}

fn default_device_tag() -> String {
    "UNO_R4".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    #[serde(default = "default_device_tag")]
    pub device_tag: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: default_discovery_port(),
            device_tag: default_device_tag(),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
        }
    }
}

fn default_model_path() -> String {
    "models/yolov8n.onnx".to_string()
}

fn default_confidence_threshold() -> f32 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_model_path")]
    pub model_path: String,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Empty means every class is reported.
    #[serde(default)]
    pub allowed_classes: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            confidence_threshold: default_confidence_threshold(),
            allowed_classes: Vec::new(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_backoff_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_snapshot_dir() -> String {
    "detections".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_true")]
    pub save_detections: bool,
    #[serde(default = "default_snapshot_dir")]
    pub output_dir: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            save_detections: default_true(),
            output_dir: default_snapshot_dir(),
        }
    }
}

fn default_rate_limit_interval() -> f64 {
    5.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_rate_limit_interval")]
    pub interval_secs: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enable: default_true(),
            interval_secs: default_rate_limit_interval(),
        }
    }
}

fn default_log_capacity() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionLogConfig {
    #[serde(default = "default_log_capacity")]
    pub capacity: usize,
}

impl Default for DetectionLogConfig {
    fn default() -> Self {
        Self {
            capacity: default_log_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub snapshots: SnapshotConfig,
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
    #[serde(default)]
    pub detection_log: DetectionLogConfig,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;

        if config.worker.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }

        Ok(config)
    }
}
