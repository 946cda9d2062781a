//! Provider registry: a strategy table from provider key to client factory.
//!
//! New backends are added by registering a factory under a name; callers
//! resolve a [`ModelConfig`] and get back a `dyn ProviderClient` without ever
//! knowing which concrete client they hold. Keys are case-insensitive.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::config::{ProviderKind, ProviderSettings};
use crate::error::DebateError;
use crate::provider::{ModelConfig, OllamaClient, OpenAICompatClient, ProviderClient};

/// Builds a client for one model configuration.
pub type ProviderFactory =
    Arc<dyn Fn(&ModelConfig) -> Result<Arc<dyn ProviderClient>, DebateError> + Send + Sync>;

#[derive(Default)]
pub struct ProviderRegistry {
    factories: RwLock<HashMap<String, ProviderFactory>>,
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with a factory for every configured provider.
    pub fn with_providers<'a>(
        providers: impl IntoIterator<Item = (&'a String, &'a ProviderSettings)>,
    ) -> Self {
        let registry = Self::new();
        for (name, settings) in providers {
            registry.register_settings(name, settings.clone());
        }
        registry
    }

    /// Register `factory` under `name`, replacing any previous factory for
    /// the same (case-insensitive) key.
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(&ModelConfig) -> Result<Arc<dyn ProviderClient>, DebateError> + Send + Sync + 'static,
    {
        let key = normalize(name);
        let previous = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), Arc::new(factory));
        if previous.is_some() {
            debug!(provider = %key, "replaced provider factory");
        } else {
            debug!(provider = %key, "registered provider factory");
        }
    }

    /// Register one of the built-in client kinds from its settings.
    pub fn register_settings(&self, name: &str, settings: ProviderSettings) {
        let key = normalize(name);
        match settings.kind {
            ProviderKind::Ollama => {
                let base_url = settings.base_url_or_default(&key);
                let client_name = key.clone();
                self.register(&key, move |config| {
                    let capabilities = settings.descriptor_for(&client_name, &config.model);
                    let client = OllamaClient::new(client_name.as_str(), base_url.as_str(), capabilities)?;
                    Ok(Arc::new(client) as Arc<dyn ProviderClient>)
                });
            }
            ProviderKind::OpenaiCompatible => {
                let api_base = settings.base_url_or_default(&key);
                let client_name = key.clone();
                self.register(&key, move |config| {
                    let api_key = match &settings.api_key_env {
                        Some(var) => std::env::var(var).unwrap_or_else(|_| {
                            warn!(provider = %client_name, env = %var, "API key not set; calls may fail");
                            String::new()
                        }),
                        None => String::new(),
                    };
                    let capabilities = settings.descriptor_for(&client_name, &config.model);
                    let client =
                        OpenAICompatClient::new(client_name.as_str(), &api_base, &api_key, capabilities)?;
                    Ok(Arc::new(client) as Arc<dyn ProviderClient>)
                });
            }
        }
    }

    /// Build a client for `config.provider`.
    pub fn resolve(&self, config: &ModelConfig) -> Result<Arc<dyn ProviderClient>, DebateError> {
        let key = normalize(&config.provider);
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .ok_or_else(|| DebateError::UnknownProvider(config.provider.clone()))?;

        // The factory runs outside the lock so it may take its time.
        factory(config)
    }

    /// All registered keys, for diagnostics and UI population.
    pub fn list_registered(&self) -> BTreeSet<String> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&normalize(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityDescriptor;
    use crate::config::default_providers;
    use crate::provider::{Prompt, ProviderResponse, Usage};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        tag: &'static str,
        capabilities: CapabilityDescriptor,
    }

    #[async_trait]
    impl ProviderClient for Echo {
        fn name(&self) -> &str {
            self.tag
        }

        fn capabilities(&self) -> &CapabilityDescriptor {
            &self.capabilities
        }

        async fn complete(
            &self,
            prompt: &Prompt,
            config: &ModelConfig,
        ) -> Result<ProviderResponse, DebateError> {
            Ok(ProviderResponse {
                text: format!("{}:{}", self.tag, prompt.user),
                model: config.model.clone(),
                usage: Usage::default(),
                created_at: Utc::now(),
            })
        }
    }

    fn echo(tag: &'static str) -> Arc<dyn ProviderClient> {
        Arc::new(Echo {
            tag,
            capabilities: CapabilityDescriptor::new(1_000, 100),
        })
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = ProviderRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry.register("Ollama", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(echo("ollama"))
        });

        let upper = registry.resolve(&ModelConfig::new("OLLAMA", "llama3")).unwrap();
        let lower = registry.resolve(&ModelConfig::new("ollama", "llama3")).unwrap();
        assert_eq!(upper.name(), "ollama");
        assert_eq!(lower.name(), "ollama");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reregistration_replaces_factory() {
        let registry = ProviderRegistry::new();
        registry.register("deepseek", |_| Ok(echo("old")));
        registry.register("DeepSeek", |_| Ok(echo("new")));

        let client = registry
            .resolve(&ModelConfig::new("deepseek", "deepseek-chat"))
            .unwrap();
        assert_eq!(client.name(), "new");
        assert_eq!(registry.list_registered().len(), 1);
    }

    #[test]
    fn test_unknown_provider_names_request() {
        let registry = ProviderRegistry::new();
        let err = registry
            .resolve(&ModelConfig::new("unknown", "m"))
            .err()
            .unwrap();
        assert_eq!(err, DebateError::UnknownProvider("unknown".to_string()));
    }

    #[test]
    fn test_factory_sees_unmodified_config() {
        let registry = ProviderRegistry::new();
        registry.register("siliconflow", |config| {
            assert_eq!(config.temperature, Some(0.3));
            Ok(echo("siliconflow"))
        });
        let config = ModelConfig::new("SiliconFlow", "Qwen/Qwen2.5-7B-Instruct").with_temperature(0.3);
        registry.resolve(&config).unwrap();
        assert_eq!(config.provider, "SiliconFlow");
    }

    #[test]
    fn test_factory_error_propagates() {
        let registry = ProviderRegistry::new();
        registry.register("broken", |_| Err(DebateError::provider("broken", "no credentials")));
        let err = registry.resolve(&ModelConfig::new("broken", "m")).err().unwrap();
        assert!(matches!(err, DebateError::ProviderError { .. }));
    }

    #[test]
    fn test_with_default_providers() {
        let providers = default_providers();
        let registry = ProviderRegistry::with_providers(&providers);
        let names: Vec<_> = registry.list_registered().into_iter().collect();
        assert_eq!(names, vec!["deepseek", "ollama", "openai", "siliconflow"]);

        let client = registry.resolve(&ModelConfig::new("Ollama", "llama3")).unwrap();
        assert_eq!(client.name(), "ollama");
        assert!(client.capabilities().supports_streaming);
    }
}
