//! Deployment configuration.
//!
//! One JSON file, deserialized over defaults, with `${VAR}` references
//! replaced from the environment before parsing — so API keys and hosts stay
//! out of the file itself. A missing variable substitutes as empty and is
//! logged, not fatal: the affected model simply fails auth when used.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use atlas_core::model::ModelDescriptor;
use atlas_llm::{LlmConfig, ModelCatalog, RetryPolicy};
use atlas_memory::MemoryConfig;
use atlas_telemetry::TelemetryConfig;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub telemetry: TelemetrySettings,
    pub memory: MemorySettings,
    pub sessions: SessionSettings,
    pub llm: LlmSettings,
    /// Catalog overrides: replace a built-in entry by id, or add new ones.
    pub models: Vec<ModelDescriptor>,
    pub default_model: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "atlas.db".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub level: String,
    pub json: bool,
    /// Per-module overrides, e.g. `{"atlas_llm": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}

impl TelemetrySettings {
    pub fn to_telemetry_config(&self) -> Result<TelemetryConfig, ConfigError> {
        let parse = |s: &str| {
            s.parse::<tracing::Level>()
                .map_err(|_| ConfigError::Invalid(format!("unknown log level '{s}'")))
        };
        let mut module_levels = Vec::with_capacity(self.modules.len());
        for (module, level) in &self.modules {
            module_levels.push((module.clone(), parse(level)?));
        }
        Ok(TelemetryConfig {
            log_level: parse(&self.level)?,
            module_levels,
            json_output: self.json,
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub working_capacity: usize,
    pub long_term_capacity: usize,
    pub decay_rate: f64,
    pub score_floor: f64,
    pub relevance_threshold: f64,
    pub context_entries: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        let defaults = MemoryConfig::default();
        Self {
            working_capacity: defaults.working_capacity,
            long_term_capacity: defaults.long_term_capacity,
            decay_rate: defaults.decay_rate,
            score_floor: defaults.score_floor,
            relevance_threshold: defaults.relevance_threshold,
            context_entries: defaults.context_entries,
        }
    }
}

impl MemorySettings {
    /// `known_cities` comes from the knowledge base, not the file.
    pub fn to_memory_config(&self, known_cities: Vec<String>) -> MemoryConfig {
        MemoryConfig {
            working_capacity: self.working_capacity,
            long_term_capacity: self.long_term_capacity,
            decay_rate: self.decay_rate,
            score_floor: self.score_floor,
            relevance_threshold: self.relevance_threshold,
            context_entries: self.context_entries,
            known_cities,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Empty sessions inactive this long are reaped.
    pub expiry_secs: u64,
    pub reap_interval_secs: u64,
    /// Freshly created sessions stay listed this long even while empty.
    pub recency_window_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            expiry_secs: 86_400,
            reap_interval_secs: 3_600,
            recency_window_secs: 120,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_attempts: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        let defaults = LlmConfig::default();
        Self {
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            request_timeout_secs: defaults.request_timeout.as_secs(),
            idle_timeout_secs: defaults.idle_timeout.as_secs(),
            max_attempts: defaults.retry.max_attempts,
        }
    }
}

impl LlmSettings {
    pub fn to_llm_config(&self) -> LlmConfig {
        LlmConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                ..RetryPolicy::default()
            },
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env(raw);
        Ok(serde_json::from_str(&substituted)?)
    }

    /// Built-in catalog with this config's overrides applied.
    pub fn build_catalog(&self) -> Result<ModelCatalog, ConfigError> {
        ModelCatalog::builtin()
            .with_overrides(self.models.clone(), self.default_model.clone())
            .map_err(ConfigError::Invalid)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.reap_interval_secs)
    }

    pub fn session_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.sessions.expiry_secs as i64)
    }

    pub fn recency_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.sessions.recency_window_secs as i64)
    }
}

/// Replace every `${VAR}` with the variable's value. Unset variables
/// substitute as empty.
pub fn substitute_env(raw: &str) -> String {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex");
    pattern
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| {
                warn!(var = &caps[1], "config references unset environment variable");
                String::new()
            })
        })
        .into_owned()
}
