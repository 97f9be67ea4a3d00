//! Pipeline Configuration - every pipeline tunable as a TOML value
//!
//! Each section implements `Default` with the values in [`super::defaults`],
//! so an empty or missing file yields a working pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "KPI_SENTINEL_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "kpi_sentinel.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one pipeline instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Bounded intake queue
    #[serde(default)]
    pub intake: IntakeConfig,

    /// Warm-up, rolling window and retrain cadence
    #[serde(default)]
    pub scorer: ScorerConfig,

    /// Isolation forest parameters
    #[serde(default)]
    pub model: ModelConfig,

    /// Broadcast hub delivery
    #[serde(default)]
    pub hub: HubConfig,

    /// WebSocket transport
    #[serde(default)]
    pub transport: TransportConfig,

    /// Synthetic KPI producer
    #[serde(default)]
    pub simulator: SimulatorConfig,

    /// HTTP server
    #[serde(default)]
    pub server: ServerConfig,
}

impl PipelineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$KPI_SENTINEL_CONFIG`
    /// 2. `./kpi_sentinel.toml`
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded pipeline config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded pipeline config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants, reporting every violation at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        Self::check_positive(self.intake.capacity, "intake.capacity", &mut errors);

        let s = &self.scorer;
        Self::check_positive(s.window_capacity, "scorer.window_capacity", &mut errors);
        Self::check_positive(s.warmup_samples, "scorer.warmup_samples", &mut errors);
        Self::check_positive(s.retrain_interval_secs, "scorer.retrain_interval_secs", &mut errors);
        if s.min_retrain_samples < 2 {
            errors.push(format!(
                "scorer.min_retrain_samples ({}) must be at least 2",
                s.min_retrain_samples
            ));
        }
        if s.min_retrain_samples > s.window_capacity {
            errors.push(format!(
                "scorer.min_retrain_samples ({}) exceeds scorer.window_capacity ({}) so retraining could never run",
                s.min_retrain_samples, s.window_capacity
            ));
        }
        if s.features.is_empty() {
            errors.push("scorer.features must name at least one field".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for f in &s.features {
            if !seen.insert(f.as_str()) {
                errors.push(format!("scorer.features lists '{}' more than once", f));
            }
        }

        let m = &self.model;
        Self::check_positive(m.n_estimators, "model.n_estimators", &mut errors);
        if m.max_samples < 2 {
            errors.push(format!("model.max_samples ({}) must be at least 2", m.max_samples));
        }
        if !(m.contamination > 0.0 && m.contamination <= 0.5) {
            errors.push(format!(
                "model.contamination ({}) must be in (0, 0.5]",
                m.contamination
            ));
        }

        Self::check_positive(self.hub.command_capacity, "hub.command_capacity", &mut errors);
        Self::check_positive(self.hub.subscriber_buffer, "hub.subscriber_buffer", &mut errors);
        Self::check_positive(self.hub.delivery_timeout_ms, "hub.delivery_timeout_ms", &mut errors);
        Self::check_positive(self.transport.keepalive_secs, "transport.keepalive_secs", &mut errors);
        Self::check_positive(self.simulator.sectors, "simulator.sectors", &mut errors);
        Self::check_positive(self.simulator.interval_ms, "simulator.interval_ms", &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_positive<T: PartialOrd + Default + std::fmt::Display>(
        value: T,
        key: &str,
        errors: &mut Vec<String>,
    ) {
        if value <= T::default() {
            errors.push(format!("{} ({}) must be greater than zero", key, value));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Intake
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeConfig {
    /// Maximum batches buffered between producer and scorer.
    #[serde(default = "default_intake_capacity")]
    pub capacity: usize,
}

fn default_intake_capacity() -> usize {
    defaults::INTAKE_CAPACITY
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            capacity: default_intake_capacity(),
        }
    }
}

// ============================================================================
// Scorer
// ============================================================================

/// What the scorer emits for batches consumed before the first model exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupPolicy {
    /// Publish warm-up samples without an anomaly flag (no loss, order kept).
    #[default]
    EmitUnflagged,
    /// Publish nothing until the first model is fit.
    Withhold,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerConfig {
    /// Rolling window capacity (feature vectors).
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,

    /// Samples accumulated before the first fit.
    #[serde(default = "default_warmup_samples")]
    pub warmup_samples: usize,

    /// Minimum seconds between successful retrains.
    #[serde(default = "default_retrain_interval_secs")]
    pub retrain_interval_secs: u64,

    /// Minimum window fill before a retrain is attempted.
    #[serde(default = "default_min_retrain_samples")]
    pub min_retrain_samples: usize,

    /// Handling of samples seen during warm-up.
    #[serde(default)]
    pub warmup_policy: WarmupPolicy,

    /// Sample fields forming the feature vector, in order.
    #[serde(default = "default_features")]
    pub features: Vec<String>,
}

fn default_window_capacity() -> usize {
    defaults::WINDOW_CAPACITY
}

fn default_warmup_samples() -> usize {
    defaults::WARMUP_SAMPLES
}

fn default_retrain_interval_secs() -> u64 {
    defaults::RETRAIN_INTERVAL_SECS
}

fn default_min_retrain_samples() -> usize {
    defaults::MIN_RETRAIN_SAMPLES
}

fn default_features() -> Vec<String> {
    defaults::FEATURES.iter().map(|f| (*f).to_string()).collect()
}

impl ScorerConfig {
    pub fn retrain_interval(&self) -> Duration {
        Duration::from_secs(self.retrain_interval_secs)
    }
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            warmup_samples: default_warmup_samples(),
            retrain_interval_secs: default_retrain_interval_secs(),
            min_retrain_samples: default_min_retrain_samples(),
            warmup_policy: WarmupPolicy::default(),
            features: default_features(),
        }
    }
}

// ============================================================================
// Model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of isolation trees.
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,

    /// Subsample drawn (without replacement) for each tree.
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    /// Expected anomaly fraction; sets the decision threshold.
    #[serde(default = "default_contamination")]
    pub contamination: f64,

    /// RNG seed. `None` draws fresh entropy on every fit.
    #[serde(default = "default_model_seed")]
    pub seed: Option<u64>,
}

fn default_n_estimators() -> usize {
    defaults::N_ESTIMATORS
}

fn default_max_samples() -> usize {
    defaults::MAX_SAMPLES
}

fn default_contamination() -> f64 {
    defaults::CONTAMINATION
}

#[allow(clippy::unnecessary_wraps)]
fn default_model_seed() -> Option<u64> {
    Some(defaults::MODEL_SEED)
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_estimators: default_n_estimators(),
            max_samples: default_max_samples(),
            contamination: default_contamination(),
            seed: default_model_seed(),
        }
    }
}

// ============================================================================
// Hub
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Pending hub commands before callers suspend.
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,

    /// Outbound messages buffered per WebSocket subscriber.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Longest a single subscriber send may take before it is pruned (ms).
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
}

fn default_command_capacity() -> usize {
    defaults::HUB_COMMAND_CAPACITY
}

fn default_subscriber_buffer() -> usize {
    defaults::SUBSCRIBER_BUFFER
}

fn default_delivery_timeout_ms() -> u64 {
    defaults::DELIVERY_TIMEOUT_MS
}

impl HubConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: default_command_capacity(),
            subscriber_buffer: default_subscriber_buffer(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Idle seconds on a WebSocket before a keepalive ping is sent.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

fn default_keepalive_secs() -> u64 {
    defaults::KEEPALIVE_SECS
}

impl TransportConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

// ============================================================================
// Simulator
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Sectors per batch.
    #[serde(default = "default_sectors")]
    pub sectors: usize,

    /// Delay between batches (ms).
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// RNG seed for reproducible runs.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_sectors() -> usize {
    defaults::SIMULATOR_SECTORS
}

fn default_interval_ms() -> u64 {
    defaults::SIMULATOR_INTERVAL_MS
}

impl SimulatorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            sectors: default_sectors(),
            interval_ms: default_interval_ms(),
            seed: None,
        }
    }
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind address.
    ///
    /// Can be overridden by `KPI_SERVER_ADDR` env var or `--addr` CLI flag.
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
