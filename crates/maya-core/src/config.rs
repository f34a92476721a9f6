use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use maya_provider::{Endpoints, HttpBackend};
use maya_schema::ModelKind;
use serde::{Deserialize, Serialize};

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_prompt_id() -> String {
    "default".to_string()
}

fn default_model() -> ModelKind {
    ModelKind::Gemini
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub endpoints: Endpoints,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            endpoints: Endpoints::default(),
        }
    }
}

impl BackendConfig {
    pub fn build(&self) -> HttpBackend {
        HttpBackend::new(&self.base_url, Duration::from_secs(self.timeout_secs))
            .with_endpoints(self.endpoints.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub metrics_interval_secs: u64,
    pub quality_interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            metrics_interval_secs: 5,
            quality_interval_secs: 15,
        }
    }
}

impl PollingConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    pub fn quality_interval(&self) -> Duration {
        Duration::from_secs(self.quality_interval_secs)
    }
}

/// Score perturbation applied by operator feedback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackPolicy {
    pub like_delta: f64,
    pub dislike_delta: f64,
    /// Used when a record's overall score is not a finite number.
    pub baseline: f64,
}

impl Default for FeedbackPolicy {
    fn default() -> Self {
        Self {
            like_delta: 5.0,
            dislike_delta: 5.0,
            baseline: 80.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    pub max_iterations: usize,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self { max_iterations: 3 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub recent_window: usize,
    pub healthy_threshold: f64,
    pub warning_threshold: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            recent_window: 10,
            healthy_threshold: 80.0,
            warning_threshold: 70.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default = "default_prompt_id")]
    pub prompt_id: String,
    #[serde(default = "default_model")]
    pub default_model: ModelKind,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub feedback: FeedbackPolicy,
    #[serde(default)]
    pub reflection: ReflectionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            prompt_id: default_prompt_id(),
            default_model: default_model(),
            polling: PollingConfig::default(),
            feedback: FeedbackPolicy::default(),
            reflection: ReflectionConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ConsoleConfig {
    /// Load from a YAML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            let config = Self::default();
            validate_config(&config)?;
            return Ok(config);
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let mut config: ConsoleConfig = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse yaml file: {}", path.display()))?
        };
        config.backend.base_url = resolve_env_var(&config.backend.base_url);
        validate_config(&config)?;
        Ok(config)
    }
}

pub fn validate_config(config: &ConsoleConfig) -> Result<()> {
    if config.backend.base_url.trim().is_empty() {
        return Err(anyhow!("backend.base_url must not be empty"));
    }
    if config.reflection.max_iterations == 0 {
        return Err(anyhow!("reflection.max_iterations must be at least 1"));
    }
    if config.polling.metrics_interval_secs == 0 || config.polling.quality_interval_secs == 0 {
        return Err(anyhow!("polling intervals must be positive"));
    }
    if config.metrics.warning_threshold > config.metrics.healthy_threshold {
        return Err(anyhow!(
            "metrics.warning_threshold ({}) exceeds metrics.healthy_threshold ({})",
            config.metrics.warning_threshold,
            config.metrics.healthy_threshold
        ));
    }
    if config.metrics.recent_window == 0 {
        return Err(anyhow!("metrics.recent_window must be at least 1"));
    }
    Ok(())
}

/// Expand `${VAR}` placeholders from the environment. Unset variables expand
/// to the empty string; an unclosed placeholder is kept verbatim.
pub fn resolve_env_var(raw: &str) -> String {
    expand_placeholders(raw, |key| std::env::var(key).ok())
}

fn expand_placeholders(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut expanded = String::with_capacity(raw.len());
    let mut tail = raw;
    while let Some((head, after)) = tail.split_once("${") {
        expanded.push_str(head);
        match after.split_once('}') {
            Some((key, remainder)) => {
                match lookup(key) {
                    Some(value) => expanded.push_str(&value),
                    None => tracing::warn!(key, "config placeholder refers to an unset variable"),
                }
                tail = remainder;
            }
            None => {
                expanded.push_str("${");
                expanded.push_str(after);
                return expanded;
            }
        }
    }
    expanded.push_str(tail);
    expanded
}
