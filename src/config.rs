//! TOML configuration for photoqueue.
//!
//! Layered model: compiled-in defaults, then an optional TOML file, then the
//! process environment (`MAX_CONCURRENT_PROCESSING`, `MAX_QUEUE_SIZE`,
//! `PROCESSING_TIMEOUT_MS`) on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::queue::PriorityTier;

/// Environment variable naming a config file to load.
pub const CONFIG_PATH_ENV: &str = "PHOTOQUEUE_CONFIG";
/// Config file picked up from the working directory when nothing else is set.
pub const LOCAL_CONFIG_FILE: &str = "photoqueue.toml";

pub const MAX_CONCURRENT_ENV: &str = "MAX_CONCURRENT_PROCESSING";
pub const MAX_QUEUE_SIZE_ENV: &str = "MAX_QUEUE_SIZE";
pub const PROCESSING_TIMEOUT_ENV: &str = "PROCESSING_TIMEOUT_MS";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded photoqueue configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path in the `PHOTOQUEUE_CONFIG` environment variable.
    /// 2. `photoqueue.toml` in the working directory.
    /// 3. Compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(&env_path);
            match Self::load(&path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "PHOTOQUEUE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Resolve the effective configuration: an explicit path must load,
    /// otherwise fall back through [`AppConfig::load_or_default`]. Environment
    /// overrides are applied last and the result is validated.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut cfg = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default(),
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `MAX_CONCURRENT_PROCESSING`, `MAX_QUEUE_SIZE` and
    /// `PROCESSING_TIMEOUT_MS` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` as the variable source.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_override::<usize>(&lookup, MAX_CONCURRENT_ENV) {
            self.queue.max_concurrent = v;
        }
        if let Some(v) = parse_override::<usize>(&lookup, MAX_QUEUE_SIZE_ENV) {
            self.queue.max_queue_size = v;
        }
        if let Some(v) = parse_override::<u64>(&lookup, PROCESSING_TIMEOUT_ENV) {
            self.queue.processing_timeout_ms = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.queue.validate()
    }
}

fn parse_override<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => {
            debug!(key, value = %raw, "applying environment override");
            Some(v)
        }
        Err(e) => {
            warn!(key, value = %raw, error = %e, "ignoring invalid environment override");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Admission queue limits and tier offsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Jobs admitted at the same time.
    pub max_concurrent: usize,
    /// Jobs allowed to wait (running jobs excluded).
    pub max_queue_size: usize,
    /// Longest a job may wait for a slot before it is rejected.
    pub processing_timeout_ms: u64,
    /// Rank offset per tier name. Missing tiers get 0.
    pub priority_boost: BTreeMap<String, i64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let mut priority_boost = BTreeMap::new();
        priority_boost.insert(PriorityTier::Professional.to_string(), 10);
        priority_boost.insert(PriorityTier::Enterprise.to_string(), 20);
        Self {
            max_concurrent: 5,
            max_queue_size: 50,
            processing_timeout_ms: 300_000,
            priority_boost,
        }
    }
}

impl QueueConfig {
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }

    pub fn tier_offset(&self, tier: PriorityTier) -> i64 {
        self.priority_boost.get(tier.as_str()).copied().unwrap_or(0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            anyhow::bail!("queue.max_queue_size must be at least 1");
        }
        if self.processing_timeout_ms == 0 {
            anyhow::bail!("queue.processing_timeout_ms must be at least 1");
        }
        for name in self.priority_boost.keys() {
            if name.parse::<PriorityTier>().is_err() {
                warn!(tier = %name, "priority_boost entry does not name a known tier");
            }
        }
        if self.max_concurrent == 0 {
            warn!("queue.max_concurrent is 0; no job will ever be admitted");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
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

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
