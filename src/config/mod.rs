//! Configuration management for the rota core
//!
//! This module handles loading and validating configuration from
//! environment variables and TOML files. All sections have sensible
//! defaults; validation rejects values the core cannot operate with.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Run storage and stopping rules
    #[serde(default)]
    pub runs: RunsConfig,

    /// Generator configuration
    #[serde(default)]
    pub generator: GeneratorSettings,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheSettings,

    /// Task queue configuration
    #[serde(default)]
    pub queue: QueueSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Run storage and default stopping rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsConfig {
    /// Root directory holding one folder per run
    pub base_path: PathBuf,

    /// Default iteration cap
    pub max_iterations: u32,

    /// Default target score
    pub target_score: f64,

    /// Default stagnation limit
    pub stagnation_limit: u32,

    /// Default RNG seed
    pub rng_seed: u64,
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("runs"),
            max_iterations: 200,
            target_score: 0.95,
            stagnation_limit: 20,
            rng_seed: 42,
        }
    }
}

/// Generator defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSettings {
    /// Algorithm preference order, by external name
    pub algorithms: Vec<String>,

    /// Default solver timeout in seconds
    pub default_timeout: f64,

    /// Whether greedy fallback is enabled
    pub allow_fallback: bool,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            algorithms: vec![
                "greedy".to_string(),
                "cp_search".to_string(),
                "milp".to_string(),
                "hybrid".to_string(),
            ],
            default_timeout: 60.0,
            allow_fallback: true,
        }
    }
}

/// Cache tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Redis URL; empty disables the L2 tier
    pub redis_url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Default TTL in seconds
    pub default_ttl: u64,

    /// Key prefix
    pub key_prefix: String,

    /// L1 entry capacity
    pub l1_capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            default_ttl: 300,
            key_prefix: "rota".to_string(),
            l1_capacity: 1024,
        }
    }
}

impl CacheSettings {
    /// Convert to the cache layer's configuration type
    pub fn to_cache_config(&self) -> crate::cache::CacheConfig {
        crate::cache::CacheConfig {
            url: self.redis_url.clone(),
            pool_size: self.pool_size,
            default_ttl: self.default_ttl,
            key_prefix: self.key_prefix.clone(),
            l1_capacity: self.l1_capacity,
        }
    }
}

/// Task queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum queued tasks per priority band
    pub max_depth_per_band: usize,

    /// Throttling strategy name: simple, queued, priority, adaptive
    pub throttle_strategy: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_depth_per_band: 1000,
            throttle_strategy: "adaptive".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Emit JSON-formatted logs
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Create config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("ROTA_RUNS_PATH") {
            config.runs.base_path = PathBuf::from(path);
        }
        if let Some(value) = env_parse("ROTA_MAX_ITERATIONS") {
            config.runs.max_iterations = value;
        }
        if let Some(value) = env_parse("ROTA_TARGET_SCORE") {
            config.runs.target_score = value;
        }
        if let Some(value) = env_parse("ROTA_STAGNATION_LIMIT") {
            config.runs.stagnation_limit = value;
        }
        if let Some(value) = env_parse("ROTA_RNG_SEED") {
            config.runs.rng_seed = value;
        }
        if let Some(value) = env_parse("ROTA_SOLVER_TIMEOUT") {
            config.generator.default_timeout = value;
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            config.cache.redis_url = url;
        }
        if let Ok(level) = std::env::var("ROTA_LOG_LEVEL") {
            config.logging.level = level;
        }

        config
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the core cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.runs.max_iterations == 0 {
            anyhow::bail!("runs.max_iterations must be positive");
        }
        if !(0.0..=1.0).contains(&self.runs.target_score) {
            anyhow::bail!(
                "runs.target_score must be in [0, 1], got {}",
                self.runs.target_score
            );
        }
        if self.runs.stagnation_limit == 0 {
            anyhow::bail!("runs.stagnation_limit must be positive");
        }
        if self.generator.default_timeout <= 0.0 {
            anyhow::bail!("generator.default_timeout must be positive");
        }
        if self.generator.algorithms.is_empty() {
            anyhow::bail!("generator.algorithms must not be empty");
        }
        for name in &self.generator.algorithms {
            name.parse::<crate::generator::Algorithm>()
                .map_err(|e| anyhow::anyhow!("generator.algorithms: {e}"))?;
        }
        if self.queue.max_depth_per_band == 0 {
            anyhow::bail!("queue.max_depth_per_band must be positive");
        }
        match self.queue.throttle_strategy.as_str() {
            "simple" | "queued" | "priority" | "adaptive" => {}
            other => anyhow::bail!("unknown throttle strategy: {other}"),
        }
        Ok(())
    }

    /// Resolve the configured algorithm preference order
    pub fn algorithm_preference(&self) -> Vec<crate::generator::Algorithm> {
        self.generator
            .algorithms
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
