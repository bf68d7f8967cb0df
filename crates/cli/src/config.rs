//! Configuration loading from toolgate.toml.

use policy::Policy;
use runtime::{
    AnthropicAuth, DEFAULT_SIMILARITY_FLOOR, DispatcherConfig, HashingEmbedder, HttpEmbedder,
    IndexEntry,
};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::embedder::ConfiguredEmbedder;

const DEFAULT_EMBEDDING_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub dispatcher: DispatcherSection,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Tool index corpus. Empty means the built-in corpus.
    #[serde(default)]
    pub index: Vec<IndexSection>,

    /// Policy rules (allow/deny/approve).
    #[serde(flatten)]
    pub policy: Policy,
}

/// Backend provider configuration.
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    /// Provider name (currently only "anthropic" supported).
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Standard Anthropic API key (sk-ant-api01-...).
    /// Mutually exclusive with oauth_token.
    pub api_key: Option<String>,

    /// OAuth access token.
    /// Mutually exclusive with api_key.
    pub oauth_token: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            oauth_token: None,
        }
    }
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

/// `[dispatcher]` table.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DispatcherSection {
    pub max_iterations: usize,
    pub top_k: usize,
    pub similarity_floor: f32,
    pub parallel_tool_calls: bool,
    pub tool_timeout_ms: u64,
    pub system_prompt: Option<String>,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        let defaults = DispatcherConfig::default();
        Self {
            max_iterations: defaults.max_iterations,
            top_k: defaults.top_k,
            similarity_floor: DEFAULT_SIMILARITY_FLOOR,
            parallel_tool_calls: defaults.parallel_tool_calls,
            tool_timeout_ms: u64::try_from(defaults.tool_timeout.as_millis()).unwrap_or(u64::MAX),
            system_prompt: None,
        }
    }
}

impl DispatcherSection {
    pub fn to_runtime(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_iterations: self.max_iterations,
            top_k: self.top_k,
            parallel_tool_calls: self.parallel_tool_calls,
            tool_timeout: Duration::from_millis(self.tool_timeout_ms),
            system_prompt: self.system_prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Hashing,
    Http,
}

/// `[embedding]` table.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    /// Vector size for the hashing embedder.
    pub dimensions: usize,
    pub url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hashing,
            dimensions: runtime::providers::DEFAULT_DIMENSIONS,
            url: None,
            model: None,
            api_key: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn embedder(&self) -> ConfiguredEmbedder {
        match self.provider {
            EmbeddingProvider::Hashing => {
                ConfiguredEmbedder::Hashing(HashingEmbedder::new(self.dimensions))
            }
            EmbeddingProvider::Http => {
                let mut http = HttpEmbedder::new(
                    self.url.as_deref().unwrap_or(DEFAULT_EMBEDDING_URL),
                    self.model.as_deref().unwrap_or(DEFAULT_EMBEDDING_MODEL),
                );
                let key = self
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("OPENAI_API_KEY").ok());
                if let Some(key) = key {
                    http = http.api_key(key);
                }
                ConfiguredEmbedder::Http(http)
            }
        }
    }
}

/// One `[[index]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexSection {
    pub query: String,
    pub tools: Vec<String>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load the file if it exists, otherwise use defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.policy.validate()?;
        if config.backend.provider != "anthropic" {
            return Err(ConfigError::Invalid(format!(
                "unsupported backend provider: {}",
                config.backend.provider
            )));
        }
        Ok(config)
    }

    /// Build the authentication from config, falling back to
    /// `ANTHROPIC_API_KEY`.
    ///
    /// Requires exactly one of api_key or oauth_token to be set.
    pub fn auth(&self) -> Result<AnthropicAuth, ConfigError> {
        match (&self.backend.api_key, &self.backend.oauth_token) {
            (Some(key), None) => Ok(AnthropicAuth::ApiKey(key.clone())),
            (None, Some(token)) => Ok(AnthropicAuth::OAuth(token.clone())),
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousAuth),
            (None, None) => std::env::var("ANTHROPIC_API_KEY")
                .map(AnthropicAuth::ApiKey)
                .map_err(|_| ConfigError::MissingAuth),
        }
    }

    /// The configured index corpus, or the built-in one.
    pub fn corpus(&self) -> Result<Vec<IndexEntry>, ConfigError> {
        if self.index.is_empty() {
            return default_corpus();
        }
        self.index
            .iter()
            .map(|entry| {
                IndexEntry::new(entry.query.clone(), entry.tools.iter().cloned())
                    .map_err(|e| ConfigError::Invalid(e.to_string()))
            })
            .collect()
    }
}

fn default_corpus() -> Result<Vec<IndexEntry>, ConfigError> {
    let entries: [(&str, &[&str]); 5] = [
        (
            "find the weather forecast for a city",
            &["get_lat_long", "get_weather"],
        ),
        (
            "find the latitude and longitude of a place called X",
            &["get_lat_long"],
        ),
        (
            "look up the details of a restaurant booking",
            &["get_booking_details"],
        ),
        (
            "book a table reservation at the restaurant",
            &["create_booking"],
        ),
        ("cancel and delete my restaurant booking", &["delete_booking"]),
    ];
    entries
        .into_iter()
        .map(|(query, tools)| {
            IndexEntry::new(query, tools.iter().copied())
                .map_err(|e| ConfigError::Invalid(e.to_string()))
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Policy(#[from] policy::Error),

    #[error(
        "authentication not configured: set backend.api_key, backend.oauth_token or ANTHROPIC_API_KEY"
    )]
    MissingAuth,

    #[error(
        "ambiguous authentication: set either backend.api_key OR backend.oauth_token, not both"
    )]
    AmbiguousAuth,
}
