use std::collections::HashMap;
use std::sync::Arc;

use secrecy::SecretString;
use tracing::{debug, info, warn};

use parley_core::{ModelInfo, ProviderAdapter, ProviderError};
use parley_settings::{ProvidersSettings, RetrySettings};

use crate::anthropic::AnthropicProvider;
use crate::models::ModelRef;
use crate::openai::{OpenAiCompatConfig, OpenAiProvider};
use crate::retry::RetryConfig;

/// Adapters keyed by the provider prefix of a model string.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from settings, reading API keys from the configured
    /// environment variables. Adapters without a key are registered but stay
    /// uninitialized.
    pub fn from_settings(providers: &ProvidersSettings, retry: &RetrySettings) -> Self {
        Self::from_settings_with(providers, retry, |name| std::env::var(name).ok())
    }

    pub fn from_settings_with(
        providers: &ProvidersSettings,
        retry: &RetrySettings,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let retry = RetryConfig::from(retry);
        let mut registry = Self::new();

        if providers.anthropic.enabled {
            let adapter =
                AnthropicProvider::new(&providers.anthropic.base_url).with_retry(retry.clone());
            registry.register_with_key(Arc::new(adapter), &providers.anthropic.api_key_env, &lookup);
        }
        if providers.openai.enabled {
            let adapter = OpenAiProvider::new(OpenAiCompatConfig::openai(&providers.openai.base_url))
                .with_retry(retry.clone());
            registry.register_with_key(Arc::new(adapter), &providers.openai.api_key_env, &lookup);
        }
        for vendor in &providers.compatible {
            let adapter = OpenAiProvider::new(OpenAiCompatConfig::from(vendor)).with_retry(retry.clone());
            registry.register_with_key(Arc::new(adapter), &vendor.api_key_env, &lookup);
        }

        info!(providers = ?registry.names(), "provider registry ready");
        registry
    }

    fn register_with_key(
        &mut self,
        adapter: Arc<dyn ProviderAdapter>,
        key_env: &str,
        lookup: &impl Fn(&str) -> Option<String>,
    ) {
        match lookup(key_env).filter(|k| !k.trim().is_empty()) {
            Some(key) => {
                if let Err(e) = adapter.initialize(SecretString::from(key)) {
                    warn!(provider = adapter.name(), error = %e, "failed to initialize provider");
                }
            }
            None => debug!(provider = adapter.name(), key_env, "no API key, provider left uninitialized"),
        }
        self.register(adapter);
    }

    /// Register or replace the adapter under its own name.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.providers.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.get(name).cloned()
    }

    /// Split a `provider/model-id` string and find its adapter.
    pub fn resolve(&self, model: &str) -> Result<(Arc<dyn ProviderAdapter>, String), ProviderError> {
        let model_ref = ModelRef::parse(model)?;
        let adapter = self
            .get(&model_ref.provider)
            .ok_or_else(|| ProviderError::UnknownProvider(model_ref.provider.clone()))?;
        Ok((adapter, model_ref.model))
    }

    /// Every registered catalog, with ids qualified as `provider/model-id`.
    pub fn available_models(&self) -> Vec<ModelInfo> {
        let mut names = self.names();
        names.sort();
        names
            .iter()
            .filter_map(|name| self.providers.get(name))
            .flat_map(|adapter| {
                let prefix = adapter.name().to_string();
                adapter.available_models().into_iter().map(move |mut m| {
                    m.id = format!("{prefix}/{}", m.id);
                    m
                })
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;
    use parley_settings::CompatibleVendorSettings;

    #[test]
    fn resolve_splits_and_finds_adapter() {
        let mut reg = ProviderRegistry::new();
        reg.register(Arc::new(MockProvider::new("openrouter")));
        let (adapter, model) = reg.resolve("openrouter/meta-llama/llama-3.1-70b").unwrap();
        assert_eq!(adapter.name(), "openrouter");
        assert_eq!(model, "meta-llama/llama-3.1-70b");
    }

    #[test]
    fn resolve_errors() {
        let reg = ProviderRegistry::new();
        assert!(matches!(
            reg.resolve("nope/model").err(),
            Some(ProviderError::UnknownProvider(p)) if p == "nope"
        ));
        assert!(matches!(
            reg.resolve("no-slash").err(),
            Some(ProviderError::InvalidModelString(_))
        ));
    }

    #[test]
    fn from_settings_initializes_only_keyed_providers() {
        let mut providers = ProvidersSettings::default();
        providers.compatible.push(CompatibleVendorSettings {
            name: "groq".into(),
            base_url: "https://api.groq.com/openai/v1".into(),
            api_key_env: "GROQ_API_KEY".into(),
            models: vec!["llama-3.3-70b".into()],
            ..Default::default()
        });
        let reg = ProviderRegistry::from_settings_with(&providers, &RetrySettings::default(), |k| {
            (k == "ANTHROPIC_API_KEY").then(|| "sk-ant".to_string())
        });

        assert!(reg.get("anthropic").unwrap().is_initialized());
        assert!(!reg.get("openai").unwrap().is_initialized());
        assert!(!reg.get("groq").unwrap().is_initialized());

        let models = reg.available_models();
        assert!(models.iter().any(|m| m.id == "anthropic/claude-sonnet-4-5"));
        assert!(models.iter().any(|m| m.id == "groq/llama-3.3-70b"));
    }

    #[test]
    fn disabled_vendors_are_skipped() {
        let mut providers = ProvidersSettings::default();
        providers.openai.enabled = false;
        let reg = ProviderRegistry::from_settings_with(&providers, &RetrySettings::default(), |_| None);
        assert!(reg.get("openai").is_none());
        assert!(reg.get("anthropic").is_some());
    }
}
