//! Configuration management

use std::{env, path::Path, sync::LazyLock, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sleuth_core::ExplorerRegistry;

use crate::{Error, Result};

static ENV_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("static regex")
});

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Automation service connection
    pub automation: AutomationConfig,
    /// Scraping pipeline limits
    pub pipeline: PipelineConfig,
    /// Address categorization limits
    pub categorizer: CategorizerConfig,
    /// Strategy scheduling
    pub scheduler: SchedulerConfig,
    /// Failsafe configuration
    pub failsafe: FailsafeConfig,
    /// Explorer registry source
    pub explorers: ExplorersConfig,
    /// Graph snapshot storage
    pub store: StoreConfig,
}

/// Automation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Base URL of the browser automation service
    pub endpoint: String,
    /// API key (supports `env:VAR_NAME`)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Upper bound for a single navigate/act/extract call
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Upper bound for opening a session
    #[serde(with = "humantime_serde")]
    pub session_timeout: Duration,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:3100".to_string(),
            api_key: None,
            call_timeout: Duration::from_secs(30),
            session_timeout: Duration::from_secs(60),
        }
    }
}

impl AutomationConfig {
    /// Resolve the API key (expand `env:` references)
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.as_ref().map(|key| {
            if let Some(var_name) = key.strip_prefix("env:") {
                env::var(var_name).unwrap_or_else(|_| key.clone())
            } else {
                key.clone()
            }
        })
    }
}

/// Scraping pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Transactions an explorer shows per page; bounds the pagination loop
    pub page_size: usize,
    /// Transaction limit when a strategy does not set one
    pub default_limit: usize,
    /// Run the per-transaction detail pass for strategies that request it
    pub enrich_details: bool,
    /// Parallel enrichment sessions
    pub enrichment_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_size: 25,
            default_limit: 50,
            enrich_details: false,
            enrichment_concurrency: 3,
        }
    }
}

/// Address categorizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorizerConfig {
    /// Counterparties categorized per strategy run; the rest stay `unknown`
    pub max_addresses: usize,
    /// Parallel categorization sessions
    pub concurrency: usize,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        Self {
            max_addresses: 10,
            concurrency: 3,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Delay between one strategy finishing and the next being promoted
    #[serde(with = "humantime_serde")]
    pub advance_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            advance_delay: Duration::from_millis(500),
        }
    }
}

impl SchedulerConfig {
    /// Advance delay, never zero
    #[must_use]
    pub fn effective_advance_delay(&self) -> Duration {
        self.advance_delay.max(Duration::from_millis(1))
    }
}

/// Failsafe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct FailsafeConfig {
    /// Retry configuration for session acquisition
    pub retry: RetryConfig,
    /// Rate limiting for session opens
    pub rate_limit: RateLimitConfig,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries
    pub enabled: bool,
    /// Maximum attempts
    pub max_attempts: u32,
    /// Initial backoff duration
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Session opens per second
    pub requests_per_second: u32,
    /// Burst size
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 2,
            burst_size: 4,
        }
    }
}

/// Explorer registry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExplorersConfig {
    /// YAML list replacing the built-in registry
    pub registry_file: Option<String>,
}

impl ExplorersConfig {
    /// Load the registry once: the configured file, or the built-in table
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or lists an
    /// explorer with an invalid URL.
    pub fn load_registry(&self) -> Result<ExplorerRegistry> {
        let Some(path) = &self.registry_file else {
            return Ok(ExplorerRegistry::builtin());
        };

        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read explorer registry '{path}': {e}"))
        })?;
        let registry: ExplorerRegistry = serde_yaml::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse explorer registry '{path}': {e}"))
        })?;

        for explorer in registry.explorers() {
            url::Url::parse(&explorer.url).map_err(|e| {
                Error::Config(format!("Explorer '{}' has invalid URL: {e}", explorer.name))
            })?;
        }

        tracing::info!(path = %path, explorers = registry.len(), "Loaded explorer registry");
        Ok(registry)
    }
}

/// Graph snapshot storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for JSON snapshots; in-memory store when unset
    pub directory: Option<String>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // CHAIN_SLEUTH_AUTOMATION__ENDPOINT -> automation.endpoint
        figment = figment.merge(Env::prefixed("CHAIN_SLEUTH_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) {
        let re = &*ENV_VAR_RE;

        self.automation.endpoint = Self::expand_string(re, &self.automation.endpoint);
        if let Some(key) = &self.automation.api_key {
            self.automation.api_key = Some(Self::expand_string(re, key));
        }
        if let Some(file) = &self.explorers.registry_file {
            self.explorers.registry_file = Some(expand_home(&Self::expand_string(re, file)));
        }
        if let Some(dir) = &self.store.directory {
            self.store.directory = Some(expand_home(&Self::expand_string(re, dir)));
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string (`"500ms"`, `"30s"`)
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
