//! Provider registry: name → provider instance, plus default resolution.

use std::sync::Arc;

use aether_core::{BoxedProvider, ChatError, ChatResult, ProviderLookup};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{RuntimeError, RuntimeResult};

/// Listing entry for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub default_model: String,
    pub models: Vec<String>,
}

/// Registered providers in registration order.
///
/// Lookups clone an `Arc` under a short read lock, so resolution never waits
/// on a slow provider and mutations never wait on in-flight calls.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<Vec<BoxedProvider>>,
    default_provider: RwLock<Option<String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under [`Provider::name`](aether_core::Provider::name).
    pub fn register(&self, provider: BoxedProvider) -> RuntimeResult<()> {
        let mut providers = self.providers.write();
        let name = provider.name().to_string();
        if providers.iter().any(|p| p.name() == name) {
            return Err(RuntimeError::ProviderExists(name));
        }
        info!(
            provider = %name,
            default_model = provider.default_model(),
            "Registered provider"
        );
        providers.push(provider);
        Ok(())
    }

    /// Registers or swaps a provider. Returns the replaced instance.
    ///
    /// Requests that already resolved the old instance finish on it.
    pub fn replace(&self, provider: BoxedProvider) -> Option<BoxedProvider> {
        let mut providers = self.providers.write();
        match providers.iter_mut().find(|p| p.name() == provider.name()) {
            Some(slot) => {
                debug!(provider = provider.name(), "Replaced provider");
                Some(std::mem::replace(slot, provider))
            }
            None => {
                info!(provider = provider.name(), "Registered provider");
                providers.push(provider);
                None
            }
        }
    }

    pub fn deregister(&self, name: &str) -> Option<BoxedProvider> {
        let mut providers = self.providers.write();
        let index = providers.iter().position(|p| p.name() == name)?;
        info!(provider = %name, "Deregistered provider");
        Some(providers.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<BoxedProvider> {
        self.providers
            .read()
            .iter()
            .find(|p| p.name() == name)
            .map(Arc::clone)
    }

    pub fn set_default(&self, name: Option<String>) {
        *self.default_provider.write() = name;
    }

    pub fn default_name(&self) -> Option<String> {
        self.default_provider.read().clone()
    }

    /// Resolves the provider for a request.
    ///
    /// An explicit name must match exactly. Otherwise the configured default
    /// is used, or the only registered provider when no default is set.
    pub fn resolve(&self, requested: Option<&str>) -> ChatResult<BoxedProvider> {
        if let Some(name) = requested {
            return self
                .get(name)
                .ok_or_else(|| ChatError::ProviderNotFound(name.to_string()));
        }

        if let Some(name) = self.default_name() {
            return self.get(&name).ok_or(ChatError::ProviderNotFound(name));
        }

        let providers = self.providers.read();
        match providers.as_slice() {
            [only] => Ok(Arc::clone(only)),
            [] => Err(ChatError::ProviderNotFound(
                "no providers registered".to_string(),
            )),
            _ => Err(ChatError::ProviderNotFound(
                "no provider requested and no default configured".to_string(),
            )),
        }
    }

    /// Resolves the model for `provider`: the requested one if supported,
    /// else the provider's default.
    pub fn resolve_model(
        provider: &BoxedProvider,
        requested: Option<&str>,
    ) -> ChatResult<String> {
        match requested.filter(|m| !m.is_empty()) {
            Some(model) if provider.supports_model(model) => Ok(model.to_string()),
            Some(model) => Err(ChatError::invalid(format!(
                "model '{model}' is not supported by provider '{}'",
                provider.name()
            ))),
            None => Ok(provider.default_model().to_string()),
        }
    }

    pub fn list(&self) -> Vec<ProviderInfo> {
        self.providers
            .read()
            .iter()
            .map(|p| ProviderInfo {
                name: p.name().to_string(),
                default_model: p.default_model().to_string(),
                models: p.supported_models().to_vec(),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers
            .read()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}

impl ProviderLookup for ProviderRegistry {
    fn resolve(&self, requested: Option<&str>) -> ChatResult<BoxedProvider> {
        ProviderRegistry::resolve(self, requested)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .field("default_provider", &self.default_name())
            .finish()
    }
}
