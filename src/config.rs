//! Pipeline configuration.
//!
//! Sources (highest priority first):
//! 1. Environment variables (SOCFLOW_CONFIG, SOCFLOW_HOME, SOCFLOW_OLLAMA_URL,
//!    SOCFLOW_OLLAMA_MODEL)
//! 2. Config file (YAML, default `~/.socflow/config.yaml`)
//! 3. Defaults

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Resolved pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Bounded self-correction budget: a rejected output may reflect this
    /// many times before the branch goes fatal
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Default deadline for one workflow run
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,

    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Append-only pool of committed reports (JSONL)
    #[serde(default = "default_report_pool_path")]
    pub report_pool_path: PathBuf,

    /// Optional YAML knowledge base for the domain retriever; built-in rules
    /// are used when absent
    #[serde(default)]
    pub knowledge_path: Option<PathBuf>,

    #[serde(default)]
    pub detector: DetectorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    #[serde(default = "default_ollama_model")]
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_byte_rate_threshold")]
    pub bytes_per_second_threshold: f64,

    #[serde(default = "default_scan_port_threshold")]
    pub scan_port_threshold: usize,
}

fn default_max_retries() -> u32 {
    2
}
fn default_run_timeout() -> u64 {
    120
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_ollama_model() -> String {
    "llama3".to_string()
}
fn default_byte_rate_threshold() -> f64 {
    1_000_000.0
}
fn default_scan_port_threshold() -> usize {
    25
}

/// Home directory for socflow state (`SOCFLOW_HOME` or `~/.socflow`)
pub fn socflow_home() -> PathBuf {
    if let Ok(home) = std::env::var("SOCFLOW_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".socflow")
}

fn default_report_pool_path() -> PathBuf {
    socflow_home().join("report_pool.jsonl")
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            bytes_per_second_threshold: default_byte_rate_threshold(),
            scan_port_threshold: default_scan_port_threshold(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            run_timeout_seconds: default_run_timeout(),
            ollama: OllamaConfig::default(),
            report_pool_path: default_report_pool_path(),
            knowledge_path: None,
            detector: DetectorConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a config from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("failed to parse config YAML")
    }

    /// Load configuration: explicit path > SOCFLOW_CONFIG > default location
    /// > defaults. Env overrides are applied on top of whatever was loaded.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("SOCFLOW_CONFIG").ok().map(PathBuf::from))
            .or_else(|| {
                let candidate = socflow_home().join("config.yaml");
                candidate.exists().then_some(candidate)
            });

        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file: {}", path.display()))?;
                Self::from_yaml(&content)?
            }
            None => Self::default(),
        };

        if let Ok(url) = std::env::var("SOCFLOW_OLLAMA_URL") {
            config.ollama.base_url = url;
        }
        if let Ok(model) = std::env::var("SOCFLOW_OLLAMA_MODEL") {
            config.ollama.model = model;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.run_timeout_seconds, 120);
        assert_eq!(config.ollama.model, "llama3");
        assert!(config.knowledge_path.is_none());
    }

    #[test]
    fn test_partial_yaml_fills_in_defaults() {
        let config = PipelineConfig::from_yaml(
            r#"
max_retries: 1
ollama:
  model: mistral
detector:
  scan_port_threshold: 10
"#,
        )
        .unwrap();

        assert_eq!(config.max_retries, 1);
        assert_eq!(config.ollama.model, "mistral");
        assert_eq!(config.ollama.base_url, "http://localhost:11434");
        assert_eq!(config.detector.scan_port_threshold, 10);
        assert_eq!(config.detector.bytes_per_second_threshold, 1_000_000.0);
    }

    #[test]
    fn test_empty_yaml_is_all_defaults() {
        let config = PipelineConfig::from_yaml("{}").unwrap();
        assert_eq!(config.max_retries, PipelineConfig::default().max_retries);
    }
}
