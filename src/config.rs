//! Configuration module for prompt-format experiments.
//!
//! Handles YAML experiment configuration loading with validation. Every field
//! has a default, so an empty document describes the reference sweep:
//! four shot levels, four formats and a half-second delay between requests.

use crate::label::Label;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid prompt format: {0}")]
    InvalidFormat(String),

    #[error("Invalid renderer: {0}")]
    InvalidRenderer(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Textual encoding used for shot examples and the main instruction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PromptFormat {
    /// Newline-joined raw strings
    Text,
    /// Fields wrapped in bold markers
    Markdown,
    /// `key: value` list items
    Yaml,
    /// `{"key": "value"}` objects
    Json,
}

impl PromptFormat {
    /// All formats in sweep order
    pub const ALL: [Self; 4] = [Self::Text, Self::Markdown, Self::Yaml, Self::Json];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Yaml => "yaml",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for PromptFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PromptFormat {
    type Err = ConfigError;

    /// Parse prompt format from string
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidFormat` if the string doesn't match a known format.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "markdown" | "md" => Ok(Self::Markdown),
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::InvalidFormat(s.to_string())),
        }
    }
}

/// Which prompt renderer the sweep uses
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// Unescaped templates, byte-compatible with historical runs
    #[default]
    Template,
    /// Escaping encoders for new experiments
    Escaped,
}

impl std::str::FromStr for RendererKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "template" => Ok(Self::Template),
            "escaped" => Ok(Self::Escaped),
            _ => Err(ConfigError::InvalidRenderer(s.to_string())),
        }
    }
}

/// Completion endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionConfig {
    /// Completion URL (OpenAI-style `/v1/completions`)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model name sent with every request
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// HTTP timeout per request in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:1234/v1/completions".to_string()
}
fn default_model() -> String {
    "llama-3.2-3b-instruct".to_string()
}
const fn default_max_tokens() -> u32 {
    64
}
const fn default_temperature() -> f64 {
    0.7
}
const fn default_timeout_secs() -> u64 {
    120
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CompletionConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Sweep grid and pacing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepConfig {
    /// Few-shot levels, in sweep order
    #[serde(default = "default_shot_levels")]
    pub shot_levels: Vec<usize>,
    /// Prompt formats, in sweep order
    #[serde(default = "default_formats")]
    pub formats: Vec<PromptFormat>,
    /// Pause after every request in milliseconds
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    /// Prompt renderer
    #[serde(default)]
    pub renderer: RendererKind,
}

fn default_shot_levels() -> Vec<usize> {
    vec![0, 1, 3, 5]
}
fn default_formats() -> Vec<PromptFormat> {
    PromptFormat::ALL.to_vec()
}
const fn default_request_delay_ms() -> u64 {
    500
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            shot_levels: default_shot_levels(),
            formats: default_formats(),
            request_delay_ms: default_request_delay_ms(),
            renderer: RendererKind::default(),
        }
    }
}

impl SweepConfig {
    #[must_use]
    pub const fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    /// Largest shot level in the sweep (0 when only zero-shot is configured)
    #[must_use]
    pub fn max_shots(&self) -> usize {
        self.shot_levels.iter().copied().max().unwrap_or(0)
    }

    /// Number of (shot, format) combinations per prompt
    #[must_use]
    pub fn combinations(&self) -> usize {
        self.shot_levels.len() * self.formats.len()
    }
}

/// A label-collapsing rule applied to run labels of specific prompts before
/// accuracy is computed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverrideRule {
    /// Prompt ids the rule applies to
    pub prompt_ids: Vec<i64>,
    /// Label to rewrite
    pub from: Label,
    /// Replacement label
    pub to: Label,
}

/// Scoring settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoringConfig {
    /// Label-collapsing rules for ambiguous prompts
    #[serde(default = "default_overrides")]
    pub overrides: Vec<OverrideRule>,
    /// Also rewrite the gold label with the same rules
    #[serde(default)]
    pub apply_overrides_to_gold: bool,
}

fn default_overrides() -> Vec<OverrideRule> {
    vec![OverrideRule {
        prompt_ids: vec![3, 5],
        from: Label::Neutral,
        to: Label::Positive,
    }]
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            overrides: default_overrides(),
            apply_overrides_to_gold: false,
        }
    }
}

/// Complete experiment configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl ExperimentConfig {
    /// Load experiment configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or fails validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load experiment configuration from a YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed or fails validation.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the sweep grid and override rules
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sweep = &self.sweep;
        if sweep.shot_levels.is_empty() {
            return Err(ConfigError::Invalid("shot_levels is empty".into()));
        }
        if sweep.formats.is_empty() {
            return Err(ConfigError::Invalid("formats is empty".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = sweep.shot_levels.iter().find(|s| !seen.insert(**s)) {
            return Err(ConfigError::Invalid(format!("duplicate shot level {dup}")));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = sweep.formats.iter().find(|f| !seen.insert(**f)) {
            return Err(ConfigError::Invalid(format!("duplicate format {dup}")));
        }
        if self.completion.max_tokens == 0 {
            return Err(ConfigError::Invalid("max_tokens must be positive".into()));
        }
        for rule in &self.scoring.overrides {
            if rule.from.is_unknown() || rule.to.is_unknown() {
                return Err(ConfigError::Invalid(
                    "override rules cannot rewrite to or from unknown".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_experiment_config_default_values() {
        let config = ExperimentConfig::default();
        assert_eq!(
            config.completion.endpoint,
            "http://127.0.0.1:1234/v1/completions"
        );
        assert_eq!(config.completion.model, "llama-3.2-3b-instruct");
        assert_eq!(config.completion.max_tokens, 64);
        assert!((config.completion.temperature - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.sweep.shot_levels, vec![0, 1, 3, 5]);
        assert_eq!(config.sweep.formats, PromptFormat::ALL.to_vec());
        assert_eq!(config.sweep.request_delay(), Duration::from_millis(500));
        assert_eq!(config.sweep.renderer, RendererKind::Template);
        assert_eq!(config.scoring.overrides.len(), 1);
        assert_eq!(config.scoring.overrides[0].prompt_ids, vec![3, 5]);
        assert!(!config.scoring.apply_overrides_to_gold);
    }

    #[test]
    fn test_experiment_config_serialization_roundtrip() {
        let config = ExperimentConfig::default();
        let yaml = serde_yaml::to_string(&config).expect("serialize");
        let parsed = ExperimentConfig::from_yaml(&yaml).expect("deserialize");
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_prompt_format_parsing() {
        assert_eq!(PromptFormat::from_str("text").unwrap(), PromptFormat::Text);
        assert_eq!(
            PromptFormat::from_str("Markdown").unwrap(),
            PromptFormat::Markdown
        );
        assert_eq!(PromptFormat::from_str("yml").unwrap(), PromptFormat::Yaml);
        assert_eq!(PromptFormat::from_str("JSON").unwrap(), PromptFormat::Json);
        assert!(matches!(
            PromptFormat::from_str("xml"),
            Err(ConfigError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = ExperimentConfig::from_yaml("").unwrap();
        assert_eq!(config, ExperimentConfig::default());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r"
completion:
  model: qwen2.5-7b-instruct
sweep:
  shot_levels: [0, 5]
  formats: [json]
  request_delay_ms: 0
  renderer: escaped
scoring:
  overrides: []
  apply_overrides_to_gold: true
";
        let config = ExperimentConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.completion.model, "qwen2.5-7b-instruct");
        assert_eq!(config.completion.max_tokens, 64); // default
        assert_eq!(config.sweep.shot_levels, vec![0, 5]);
        assert_eq!(config.sweep.formats, vec![PromptFormat::Json]);
        assert_eq!(config.sweep.max_shots(), 5);
        assert_eq!(config.sweep.combinations(), 2);
        assert_eq!(config.sweep.renderer, RendererKind::Escaped);
        assert!(config.scoring.overrides.is_empty());
        assert!(config.scoring.apply_overrides_to_gold);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let yaml = "sweep:\n  shot_levels: [0, 1, 1]\n";
        assert!(matches!(
            ExperimentConfig::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));

        let yaml = "sweep:\n  formats: [text, text]\n";
        assert!(matches!(
            ExperimentConfig::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_grid() {
        let yaml = "sweep:\n  formats: []\n";
        assert!(ExperimentConfig::from_yaml(yaml).is_err());
        let yaml = "sweep:\n  shot_levels: []\n";
        assert!(ExperimentConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_override() {
        let yaml = r"
scoring:
  overrides:
    - prompt_ids: [1]
      from: unknown
      to: positive
";
        assert!(matches!(
            ExperimentConfig::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_bundled_config() {
        let config = ExperimentConfig::load("configs/sentiment.yaml").unwrap();
        assert_eq!(config.sweep.combinations(), 16);
        assert_eq!(config.scoring.overrides[0].from, Label::Neutral);
    }

    #[test]
    fn test_load_not_found() {
        assert!(matches!(
            ExperimentConfig::load("nonexistent.yaml"),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn test_renderer_kind_parsing() {
        assert_eq!(
            RendererKind::from_str("ESCAPED").unwrap(),
            RendererKind::Escaped
        );
        assert!(RendererKind::from_str("fancy").is_err());
    }
}
