//! Provider registry: name to factory lookup with lazy instantiation.
//!
//! Factories are registered by name and invoked on the first
//! [`resolve`](ProviderRegistry::resolve) of that name. The built
//! provider is cached and shared for the life of the registry, so every
//! later `resolve` returns the same instance.
//!
//! The registry is an ordinary value: create one, register factories,
//! then hand it (usually behind an `Arc`) to a [`Client`](crate::Client).
//! Tests build their own registries and never share state.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use llm_relay::registry::ProviderRegistry;
//! use llm_relay::mock::MockProvider;
//!
//! let registry = ProviderRegistry::new();
//! registry.register("mock", || {
//!     Ok(Box::new(MockProvider::named("Mock")) as Box<dyn llm_relay::DynProvider>)
//! });
//!
//! let a = registry.resolve("mock").unwrap();
//! let b = registry.resolve("MOCK").unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//! ```
//!
//! # Credentials
//!
//! Factories typically read credentials with
//! [`ProviderConfig::from_env`]. A missing variable fails the factory,
//! which surfaces as [`LlmError::Configuration`] on the first `resolve`,
//! never at registration time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::debug;

use crate::error::LlmError;
use crate::provider::DynProvider;

/// Credentials and endpoint settings for one provider.
///
/// Provider-specific options go in [`extra`](Self::extra).
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    /// Provider name (e.g. "anthropic", "openai").
    pub provider: String,
    /// API key for authenticated providers.
    pub api_key: Option<String>,
    /// Custom base URL for the API endpoint.
    pub base_url: Option<String>,
    /// Transport-level timeout.
    pub timeout: Option<Duration>,
    /// Provider-specific options.
    pub extra: HashMap<String, serde_json::Value>,
}

impl ProviderConfig {
    /// An empty config for `provider`.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Default::default()
        }
    }

    /// Reads the API key from the environment variable `var`.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Configuration`] if the variable is unset or empty.
    pub fn from_env(provider: impl Into<String>, var: &str) -> Result<Self, LlmError> {
        Self::from_lookup(provider, var, |key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(
        provider: impl Into<String>,
        var: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, LlmError> {
        let provider = provider.into();
        match lookup(var) {
            Some(key) if !key.trim().is_empty() => Ok(Self::new(provider).api_key(key)),
            _ => Err(LlmError::Configuration(format!(
                "{provider} requires an API key: set {var}"
            ))),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the transport timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds a provider-specific option.
    #[must_use]
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// A string option from [`extra`](Self::extra).
    pub fn get_extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

/// Builds a provider instance. Invoked at most once per successful resolve.
///
/// Any `Fn() -> Result<Box<dyn DynProvider>, LlmError>` closure is a
/// factory.
pub trait ProviderFactory: Send + Sync {
    /// Creates the provider.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Configuration`] when credentials or settings
    /// are missing.
    fn build(&self) -> Result<Box<dyn DynProvider>, LlmError>;
}

impl<F> ProviderFactory for F
where
    F: Fn() -> Result<Box<dyn DynProvider>, LlmError> + Send + Sync,
{
    fn build(&self) -> Result<Box<dyn DynProvider>, LlmError> {
        self()
    }
}

struct Entry {
    factory: Box<dyn ProviderFactory>,
    instance: Mutex<Option<Arc<dyn DynProvider>>>,
}

/// Name to factory table with lazily built, cached providers.
///
/// Names are case-insensitive. Registration of a name is write-once:
/// registering a name that already exists is a no-op.
pub struct ProviderRegistry {
    entries: RwLock<HashMap<String, Arc<Entry>>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a factory closure under `name`.
    ///
    /// Returns `false` and leaves the existing entry untouched if `name`
    /// is already registered, so repeated configuration calls have no
    /// side effects. The factory is not invoked here.
    pub fn register<F>(&self, name: &str, factory: F) -> bool
    where
        F: Fn() -> Result<Box<dyn DynProvider>, LlmError> + Send + Sync + 'static,
    {
        self.register_factory(name, factory)
    }

    /// Registers any [`ProviderFactory`] under `name`.
    ///
    /// Same write-once semantics as [`register`](Self::register).
    pub fn register_factory(&self, name: &str, factory: impl ProviderFactory + 'static) -> bool {
        let key = name.to_lowercase();
        let mut entries = self
            .entries
            .write()
            .expect("provider registry lock poisoned");
        if entries.contains_key(&key) {
            debug!(provider = %key, "provider already registered; ignoring");
            return false;
        }
        entries.insert(
            key,
            Arc::new(Entry {
                factory: Box::new(factory),
                instance: Mutex::new(None),
            }),
        );
        true
    }

    /// Returns the provider registered under `name`, building it on first use.
    ///
    /// # Errors
    ///
    /// - [`LlmError::Configuration`] if `name` is not registered.
    /// - Whatever the factory returns. A failed build is not cached; the
    ///   next `resolve` invokes the factory again.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn DynProvider>, LlmError> {
        let key = name.to_lowercase();
        let entry = {
            let entries = self
                .entries
                .read()
                .expect("provider registry lock poisoned");
            entries.get(&key).cloned().ok_or_else(|| {
                let mut available: Vec<_> = entries.keys().cloned().collect();
                available.sort();
                LlmError::Configuration(format!(
                    "unknown provider '{name}'. Available: {available:?}"
                ))
            })?
        };

        let mut instance = entry
            .instance
            .lock()
            .expect("provider registry lock poisoned");
        if let Some(provider) = instance.as_ref() {
            return Ok(Arc::clone(provider));
        }
        debug!(provider = %key, "instantiating provider");
        let provider: Arc<dyn DynProvider> = Arc::from(entry.factory.build()?);
        *instance = Some(Arc::clone(&provider));
        Ok(provider)
    }

    /// `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .expect("provider registry lock poisoned")
            .contains_key(&name.to_lowercase())
    }

    /// `true` if `name` has been successfully resolved at least once.
    pub fn is_resolved(&self, name: &str) -> bool {
        let entry = self
            .entries
            .read()
            .expect("provider registry lock poisoned")
            .get(&name.to_lowercase())
            .cloned();
        entry.is_some_and(|e| {
            e.instance
                .lock()
                .expect("provider registry lock poisoned")
                .is_some()
        })
    }

    /// Names of all registered providers, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .expect("provider registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
