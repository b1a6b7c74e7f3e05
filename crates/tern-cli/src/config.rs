//! Configuration file support

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tern_agent::ContextConfig;

use crate::utils::expand_home;

/// Configuration for tern
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default provider
    pub provider: Option<String>,
    /// Default model to use
    pub model: Option<String>,
    /// Override the provider's endpoint
    pub base_url: Option<String>,
    /// Maximum tokens to generate per call
    pub max_tokens: Option<u32>,
    /// Custom system prompt file path
    pub system_prompt_file: Option<String>,
    /// Maximum model calls per turn
    pub max_iterations: Option<u32>,
    /// Token budget
    pub context: ContextConfig,
    /// API keys by provider name (alternative to environment variables)
    pub api_keys: BTreeMap<String, String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tern")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("TERN_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location. A missing or broken file
    /// falls back to defaults with a warning.
    pub fn load() -> Self {
        let path = Self::config_path();
        match Self::load_from(&path) {
            Ok(Some(config)) => {
                tracing::debug!("Loaded config from {}", path.display());
                config
            }
            Ok(None) => Self::default(),
            Err(e) => {
                tracing::warn!("Ignoring config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load config from a file, or `None` if it does not exist
    pub fn load_from(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(toml::from_str(&content)?))
    }

    /// Write an example config if none exists; returns its path
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    /// API key configured for a provider, if any
    pub fn api_key(&self, provider: &str) -> Option<String> {
        self.api_keys
            .get(provider)
            .filter(|key| !key.is_empty())
            .cloned()
    }

    /// Read the custom system prompt, if one is configured
    pub fn system_prompt(&self) -> anyhow::Result<Option<String>> {
        let Some(file) = &self.system_prompt_file else {
            return Ok(None);
        };
        let path = expand_home(file);
        let prompt = fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!("Failed to read system prompt {}: {}", path.display(), e)
        })?;
        Ok(Some(prompt))
    }
}

/// Default model for a provider
pub fn default_model(provider: &str) -> &'static str {
    match provider {
        "openai" => "gpt-4o",
        "groq" => "llama-3.3-70b-versatile",
        "openrouter" => "anthropic/claude-sonnet-4.5",
        "ollama" => "llama3.2",
        _ => "claude-sonnet-4-5-20250929",
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# tern configuration file
# Place at ~/.config/tern/config.toml (Linux) or set TERN_CONFIG_PATH

# Default provider (anthropic, openai, groq, openrouter, ollama)
provider = "anthropic"

# Default model to use
model = "claude-sonnet-4-5-20250929"

# Override the provider endpoint (optional)
# base_url = "http://localhost:11434/v1"

# Maximum tokens to generate per call
max_tokens = 8192

# Maximum model calls per turn
max_iterations = 20

# Custom system prompt file (optional)
# system_prompt_file = "~/.config/tern/system_prompt.txt"

[context]
max_context_tokens = 100000
reserved_tokens = 4096
# "truncate" drops old messages, "error" refuses to send
strategy = "truncate"

# API keys (optional - environment variables work too)
[api_keys]
# anthropic = "sk-ant-..."
# openai = "sk-..."
# groq = "gsk_..."
# openrouter = "sk-or-..."
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_agent::ContextStrategy;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.provider.as_deref(), Some("anthropic"));
        assert_eq!(config.max_tokens, Some(8192));
        assert_eq!(config.max_iterations, Some(20));
        assert_eq!(config.context, ContextConfig::default());
        assert!(config.api_keys.is_empty());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.context.max_context_tokens, 100_000);
    }

    #[test]
    fn test_partial_context_section() {
        let config: Config = toml::from_str(
            r#"
            provider = "groq"

            [context]
            strategy = "error"

            [api_keys]
            groq = "gsk_test"
            openai = ""
            "#,
        )
        .unwrap();
        assert_eq!(config.context.strategy, ContextStrategy::Error);
        assert_eq!(config.context.reserved_tokens, 4_096);
        assert_eq!(config.api_key("groq").as_deref(), Some("gsk_test"));
        assert_eq!(config.api_key("openai"), None);
        assert_eq!(config.api_key("anthropic"), None);
    }

    #[test]
    fn test_load_from_missing_and_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(Config::load_from(&path).unwrap().is_none());

        fs::write(&path, "provider = [").unwrap();
        assert!(Config::load_from(&path).is_err());

        fs::write(&path, "model = \"gpt-4o\"").unwrap();
        let config = Config::load_from(&path).unwrap().unwrap();
        assert_eq!(config.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn test_system_prompt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.txt");
        fs::write(&path, "You are terse.").unwrap();

        let config = Config {
            system_prompt_file: Some(path.display().to_string()),
            ..Default::default()
        };
        assert_eq!(config.system_prompt().unwrap().as_deref(), Some("You are terse."));

        let missing = Config {
            system_prompt_file: Some(dir.path().join("nope").display().to_string()),
            ..Default::default()
        };
        assert!(missing.system_prompt().is_err());
        assert!(Config::default().system_prompt().unwrap().is_none());
    }

    #[test]
    fn test_default_model() {
        assert_eq!(default_model("anthropic"), "claude-sonnet-4-5-20250929");
        assert_eq!(default_model("ollama"), "llama3.2");
    }
}
