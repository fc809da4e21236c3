use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Scheduling defaults — tuned for sub-second due-time precision at the
// bounded scale this engine targets.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_RETRY_BASE_MS: u64 = 1_000;
pub const DEFAULT_DEPENDENCY_DEFER_MS: u64 = 250;
pub const DEFAULT_DEPENDENCY_DEFER_CAP_MS: u64 = 5_000;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Top-level config (tempo.toml + TEMPO_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TempoConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Tuning for the scheduler engine's poll loop and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cadence of the due-time check loop, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Base delay for exponential retry backoff (`base * 2^n`).
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Initial delay before re-checking a job whose prerequisites have
    /// not completed yet. Doubles on each consecutive defer.
    #[serde(default = "default_dependency_defer_ms")]
    pub dependency_defer_ms: u64,
    /// Upper bound on the dependency defer delay.
    #[serde(default = "default_dependency_defer_cap_ms")]
    pub dependency_defer_cap_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
            dependency_defer_ms: DEFAULT_DEPENDENCY_DEFER_MS,
            dependency_defer_cap_ms: DEFAULT_DEPENDENCY_DEFER_CAP_MS,
        }
    }
}

/// Tuning for the bounded worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// How long shutdown waits for in-flight tasks before aborting them.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

impl TempoConfig {
    /// Load config, merging (lowest to highest precedence) the TOML file
    /// and `TEMPO_`-prefixed env vars. Nested keys use a double
    /// underscore: `TEMPO_SCHEDULER__POLL_INTERVAL_MS=50`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: TempoConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("TEMPO_").split("__"))
            .extract()
            .map_err(|e| crate::error::TempoError::Config(e.to_string()))?;

        Ok(config)
    }
}

/// `~/.tempo/tempo.toml` — used when no explicit path is given.
pub fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tempo/tempo.toml", home)
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_retry_base_ms() -> u64 {
    DEFAULT_RETRY_BASE_MS
}

fn default_dependency_defer_ms() -> u64 {
    DEFAULT_DEPENDENCY_DEFER_MS
}

fn default_dependency_defer_cap_ms() -> u64 {
    DEFAULT_DEPENDENCY_DEFER_CAP_MS
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
