//! Kernel configuration loading and management.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main kernel configuration, loaded from .plexus/config.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Config version
    pub version: Option<String>,

    /// Model endpoint and sampling settings
    pub model: ModelSettings,

    /// Maximum Thinking -> ToolDispatch transitions per single-agent turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Per-capability resource limits and safety overrides
    pub capabilities: CapabilityLimits,

    /// Append-only event log (relative to project root)
    #[serde(default = "default_events_path")]
    pub events_path: PathBuf,
}

/// Model endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// OpenAI-compatible base URL
    pub base_url: String,

    /// Model identifier sent with every request
    pub model: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    pub temperature: Option<f32>,

    pub max_tokens: Option<u32>,

    /// Stream the forced final answer at the iteration cap token by token.
    /// An answer given while tools are still offered arrives whole and is
    /// emitted as a single `token` event.
    pub stream: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: Some(0.2),
            max_tokens: None,
            stream: true,
        }
    }
}

impl ModelSettings {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

/// Resource ceilings enforced by the built-in capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityLimits {
    pub shell_timeout_secs: u64,
    pub max_shell_output_bytes: usize,
    pub max_read_bytes: u64,
    pub max_fetch_bytes: usize,
    pub fetch_timeout_secs: u64,
    pub max_search_results: usize,

    /// SearXNG-compatible search endpoint for web_search
    pub search_endpoint: Option<String>,

    /// Permit filesystem capabilities inside denylisted system prefixes
    pub allow_system_paths: bool,

    /// Additional prefixes denied on top of the built-in list
    pub extra_denied_paths: Vec<PathBuf>,
}

impl Default for CapabilityLimits {
    fn default() -> Self {
        Self {
            shell_timeout_secs: 30,
            max_shell_output_bytes: 5 * 1024 * 1024,
            max_read_bytes: 5 * 1024 * 1024,
            max_fetch_bytes: 2 * 1024 * 1024,
            fetch_timeout_secs: 10,
            max_search_results: 50,
            search_endpoint: None,
            allow_system_paths: false,
            extra_denied_paths: Vec::new(),
        }
    }
}

fn default_max_iterations() -> usize {
    10
}
fn default_events_path() -> PathBuf {
    PathBuf::from(".plexus/events.jsonl")
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            version: None,
            model: ModelSettings::default(),
            max_iterations: default_max_iterations(),
            capabilities: CapabilityLimits::default(),
            events_path: default_events_path(),
        }
    }
}

impl KernelConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load from project root (looks for .plexus/config.yaml)
    pub fn load_from_project(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".plexus/config.yaml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve paths relative to project root
    pub fn resolve_paths(&mut self, project_root: &Path) {
        self.events_path = project_root.join(&self.events_path);
    }
}

/// Commented default written by `plexus init`.
pub const DEFAULT_CONFIG_YAML: &str = r#"# Plexus Kernel Configuration

model:
  base_url: https://api.openai.com
  model: gpt-4o-mini
  api_key_env: OPENAI_API_KEY
  temperature: 0.2
  stream: true

# Tool-calling rounds per single-agent turn before a forced final answer
max_iterations: 10

capabilities:
  shell_timeout_secs: 30
  max_shell_output_bytes: 5242880
  max_read_bytes: 5242880
  max_fetch_bytes: 2097152
  fetch_timeout_secs: 10
  max_search_results: 50
  # search_endpoint: http://localhost:8888/search
  allow_system_paths: false
  extra_denied_paths: []

events_path: .plexus/events.jsonl
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_yaml_parses_to_defaults() {
        let config: KernelConfig = serde_yaml::from_str(DEFAULT_CONFIG_YAML).unwrap();
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.capabilities.shell_timeout_secs, 30);
        assert_eq!(config.capabilities.max_shell_output_bytes, 5 * 1024 * 1024);
        assert!(!config.capabilities.allow_system_paths);
        assert_eq!(config.model.model, "gpt-4o-mini");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: KernelConfig = serde_yaml::from_str("max_iterations: 4\n").unwrap();
        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.capabilities.fetch_timeout_secs, 10);
        assert_eq!(config.events_path, PathBuf::from(".plexus/events.jsonl"));
    }
}
