//! Provider registry: name lookup with a default fallback
//!
//! Lookups by unknown names resolve to the default provider. Reads run
//! concurrently; registration takes the write lock.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{Config, ProviderConfig};

use super::lmstudio::LmStudioProvider;
use super::openai::OpenAiProvider;
use super::openai_compat::OpenAiCompatProvider;
use super::openrouter::OpenRouterProvider;
use super::types::LlmProvider;

/// Named set of LLM providers
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn LlmProvider>>>,
    default_name: String,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.list())
            .field("default_name", &self.default_name)
            .finish()
    }
}

impl ProviderRegistry {
    /// Empty registry falling back to `default_name`
    pub fn new(default_name: impl Into<String>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            default_name: default_name.into(),
        }
    }

    /// Registry populated from `config.providers`. Gemini is left to the caller.
    pub fn from_config(config: &Config) -> Self {
        info!("Initializing LLM provider registry");
        let registry = Self::new(config.default_name());
        registry.register_from_config(&config.providers);
        if registry.list().is_empty() {
            warn!("No LLM providers configured");
        }
        registry
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Insert `provider` under its own name, replacing any previous entry
    pub fn register(&self, provider: Arc<dyn LlmProvider>) {
        let name = provider.name().to_string();
        if self.providers.write().insert(name.clone(), provider).is_some() {
            debug!("Replaced provider '{}'", name);
        } else {
            info!("Registered provider '{}'", name);
        }
    }

    /// Exact match, else the default provider
    pub fn get(&self, name: &str) -> Option<Arc<dyn LlmProvider>> {
        let providers = self.providers.read();
        providers
            .get(name)
            .or_else(|| providers.get(&self.default_name))
            .cloned()
    }

    /// Like [`get`](Self::get), for callers that cannot continue without a provider
    ///
    /// # Panics
    ///
    /// Panics when neither `name` nor the default provider is registered.
    pub fn must_get(&self, name: &str) -> Arc<dyn LlmProvider> {
        match self.get(name) {
            Some(provider) => provider,
            None => panic!("LLM provider not found: {}", name),
        }
    }

    pub fn default_provider(&self) -> Option<Arc<dyn LlmProvider>> {
        self.providers.read().get(&self.default_name).cloned()
    }

    /// Registered names, in no particular order
    pub fn list(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }

    /// Build and register a provider for each usable entry
    ///
    /// Entries without an API key are skipped unless they are `lmstudio`.
    /// `gemini` is never built here. Unknown names become OpenAI-compatible
    /// providers when they carry a base URL and are dropped otherwise.
    pub fn register_from_config(&self, providers: &HashMap<String, ProviderConfig>) {
        for (name, cfg) in providers {
            if cfg.api_key.is_empty() && name != "lmstudio" {
                debug!("Skipping provider '{}': no API key", name);
                continue;
            }

            match Self::create_provider(name, cfg) {
                Ok(Some(provider)) => self.register(provider),
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to initialize provider '{}': {:#}", name, e);
                }
            }
        }
    }

    fn create_provider(
        name: &str,
        cfg: &ProviderConfig,
    ) -> anyhow::Result<Option<Arc<dyn LlmProvider>>> {
        let provider: Arc<dyn LlmProvider> = match name {
            "openai" => Arc::new(OpenAiProvider::new(&cfg.api_key, &cfg.model)?),
            "openrouter" => Arc::new(OpenRouterProvider::new(&cfg.api_key, &cfg.model)?),
            "lmstudio" => Arc::new(LmStudioProvider::new(
                &cfg.api_key,
                &cfg.model,
                &cfg.base_url,
            )?),
            "gemini" => {
                debug!("Gemini is constructed outside the registry config pass");
                return Ok(None);
            }
            _ if cfg.base_url.is_empty() => {
                warn!("Skipping provider '{}': unknown name and no base_url", name);
                return Ok(None);
            }
            _ => Arc::new(OpenAiCompatProvider::new(
                name,
                &cfg.api_key,
                &cfg.model,
                &cfg.base_url,
            )?),
        };
        Ok(Some(provider))
    }
}
