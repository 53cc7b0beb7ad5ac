//! Configuration management for Kiln
//!
//! Loaded from `.kiln/config.toml` under a root directory. Every field has a
//! default, so a missing file or a partial file both work.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{KilnError, Result};

/// Location of the config file relative to the root directory
pub const CONFIG_PATH: &str = ".kiln/config.toml";

/// Top-level Kiln configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KilnConfig {
    /// Attempt loop policy
    #[serde(default, rename = "loop")]
    pub run_loop: LoopSettings,

    /// Sandbox execution limits
    #[serde(default)]
    pub sandbox: SandboxSettings,

    /// Completion provider selection
    #[serde(default)]
    pub provider: ProviderSettings,

    /// Evolving memory
    #[serde(default)]
    pub memory: MemorySettings,

    /// Trace export
    #[serde(default)]
    pub trace: TraceSettings,
}

/// Which critic judges attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriticMode {
    /// Rule-based classification; sandbox success is a pass
    #[default]
    Rules,
    /// Rules, plus successful runs must produce clean, non-empty output
    Strict,
    /// Ask the completion provider for a JSON verdict, rules as fallback
    Model,
}

impl std::fmt::Display for CriticMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rules => write!(f, "rules"),
            Self::Strict => write!(f, "strict"),
            Self::Model => write!(f, "model"),
        }
    }
}

impl std::str::FromStr for CriticMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rules" => Ok(Self::Rules),
            "strict" => Ok(Self::Strict),
            "model" => Ok(Self::Model),
            _ => Err(format!("Invalid critic mode: {}. Use rules, strict, or model.", s)),
        }
    }
}

/// Attempt loop policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSettings {
    /// Hard ceiling on attempts per run
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Generations reporting a confidence below this skip execution
    #[serde(default)]
    pub confidence_floor: Option<f32>,

    /// Critique even when the sandbox reports success
    #[serde(default)]
    pub critique_on_success: bool,

    #[serde(default)]
    pub critic: CriticMode,
}

/// Sandbox limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// Interpreter the generated code is handed to
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// File extension for the generated source file
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Wall-clock limit per execution
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Captured stdout/stderr are truncated past this many bytes each
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Address-space ceiling for the child process
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,

    /// Maximum concurrent sandbox executions across all runs
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

/// Hosted completion backends with an OpenAI-compatible chat API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Cerebras,
    Groq,
    OpenAi,
    /// Any compatible endpoint; `base_url` is required
    Custom,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cerebras => write!(f, "cerebras"),
            Self::Groq => write!(f, "groq"),
            Self::OpenAi => write!(f, "openai"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cerebras" => Ok(Self::Cerebras),
            "groq" => Ok(Self::Groq),
            "openai" => Ok(Self::OpenAi),
            "custom" => Ok(Self::Custom),
            _ => Err(format!(
                "Invalid provider: {}. Use cerebras, groq, openai, or custom.",
                s
            )),
        }
    }
}

/// Completion provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub kind: ProviderKind,

    /// Model name; the provider's default when unset
    #[serde(default)]
    pub model: Option<String>,

    /// Override of the provider's API base URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable holding the API key; the provider's default when unset
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-request timeout
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries on 429 / 5xx before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Evolving memory settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySettings {
    /// JSONL file records are appended to; in-memory only when unset
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// How many lessons to inject into each generation
    #[serde(default = "default_lessons")]
    pub lessons: usize,
}

/// Trace export settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceSettings {
    /// Directory closed traces are exported to as HTML
    #[serde(default)]
    pub export_dir: Option<PathBuf>,
}

// Default value providers
fn default_max_attempts() -> usize {
    3
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_extension() -> String {
    "py".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

fn default_pool_size() -> usize {
    4
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_provider_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_lessons() -> usize {
    3
}

impl KilnConfig {
    /// Load `.kiln/config.toml` under `root`, or defaults when absent
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_PATH);

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)
                .map_err(|e| KilnError::Config(format!("Failed to parse config file: {}", e)))?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Write the default configuration to `.kiln/config.toml` under `root`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_path = root.join(CONFIG_PATH);
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| KilnError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Reject settings the runtime cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.run_loop.max_attempts == 0 {
            return Err(KilnError::Config("loop.max_attempts must be at least 1".into()));
        }
        if let Some(floor) = self.run_loop.confidence_floor {
            if !(0.0..=1.0).contains(&floor) {
                return Err(KilnError::Config(format!(
                    "loop.confidence_floor must be within [0, 1], got {}",
                    floor
                )));
            }
        }
        if self.sandbox.pool_size == 0 {
            return Err(KilnError::Config("sandbox.pool_size must be at least 1".into()));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(KilnError::Config("sandbox.timeout_secs must be at least 1".into()));
        }
        if self.provider.kind == ProviderKind::Custom && self.provider.base_url.is_none() {
            return Err(KilnError::Config(
                "provider.base_url is required for the custom provider".into(),
            ));
        }
        Ok(())
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            confidence_floor: None,
            critique_on_success: false,
            critic: CriticMode::default(),
        }
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            extension: default_extension(),
            timeout_secs: default_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            memory_limit_mb: None,
            pool_size: default_pool_size(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            model: None,
            base_url: None,
            api_key_env: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_provider_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            path: None,
            lessons: default_lessons(),
        }
    }
}
