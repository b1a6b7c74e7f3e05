//! Name-based provider lookup

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    error::{Error, Result},
    providers::{Provider, anthropic::AnthropicProvider, openai::OpenAIProvider},
};

/// Providers keyed by their registry name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in backend
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AnthropicProvider::new()));
        registry.register(Arc::new(OpenAIProvider::openai()));
        registry.register(Arc::new(OpenAIProvider::groq()));
        registry.register(Arc::new(OpenAIProvider::openrouter()));
        registry.register(Arc::new(OpenAIProvider::ollama()));
        registry
    }

    /// Add a provider, replacing any existing one with the same name
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Look up a provider by name
    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnsupportedProvider(name.to_string()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        let registry = ProviderRegistry::builtin();
        assert_eq!(
            registry.names(),
            vec!["anthropic", "groq", "ollama", "openai", "openrouter"]
        );
    }

    #[test]
    fn test_get_known_provider() {
        let registry = ProviderRegistry::builtin();
        let provider = registry.get("anthropic").unwrap();
        assert_eq!(provider.default_base_url(), "https://api.anthropic.com");
    }

    #[test]
    fn test_get_unknown_provider() {
        let registry = ProviderRegistry::builtin();
        match registry.get("gemini") {
            Err(Error::UnsupportedProvider(name)) => assert_eq!(name, "gemini"),
            other => panic!("expected unsupported provider, got {:?}", other.map(|p| p.name().to_string())),
        }
    }

    #[test]
    fn test_register_replaces_by_name() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(OpenAIProvider::new("local", "http://a", None)));
        registry.register(Arc::new(OpenAIProvider::new("local", "http://b", None)));
        assert_eq!(registry.names(), vec!["local"]);
        assert_eq!(registry.get("local").unwrap().default_base_url(), "http://b");
    }
}
