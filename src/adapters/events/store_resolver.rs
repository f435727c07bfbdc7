//! Resolves the concrete store behind a box configuration.
//!
//! Preference order: the configuration's factory, then its named
//! implementation binding, then the only registered store if exactly one
//! exists. Successful resolutions are cached by configuration name.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::domain::boxes::BoxConfig;
use crate::domain::foundation::{DomainError, ErrorCode};

pub struct StoreResolver<S: ?Sized> {
    bindings: RwLock<HashMap<String, Arc<S>>>,
    resolved: RwLock<HashMap<String, Arc<S>>>,
}

impl<S: ?Sized> StoreResolver<S> {
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a store under an implementation name.
    pub fn bind(&self, implementation: impl Into<String>, store: Arc<S>) {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        bindings.insert(implementation.into(), store);
    }

    /// Builder form of [`bind`](Self::bind).
    pub fn with_binding(self, implementation: impl Into<String>, store: Arc<S>) -> Self {
        self.bind(implementation, store);
        self
    }

    /// Resolves the store for `config`.
    pub fn resolve(&self, config: &BoxConfig<S>) -> Result<Arc<S>, DomainError> {
        if let Some(cached) = self
            .resolved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&config.name)
        {
            return Ok(cached.clone());
        }

        let store = self.resolve_uncached(config)?;

        // Two racing resolutions keep whichever landed first.
        let mut resolved = self.resolved.write().unwrap_or_else(PoisonError::into_inner);
        Ok(resolved
            .entry(config.name.clone())
            .or_insert(store)
            .clone())
    }

    fn resolve_uncached(&self, config: &BoxConfig<S>) -> Result<Arc<S>, DomainError> {
        if let Some(factory) = &config.factory {
            return factory();
        }

        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(implementation) = &config.implementation {
            return bindings.get(implementation).cloned().ok_or_else(|| {
                DomainError::new(
                    ErrorCode::ConfigurationError,
                    format!(
                        "Box '{}' is bound to '{}' but no such store is registered",
                        config.name, implementation
                    ),
                )
            });
        }

        let mut stores = bindings.values();
        match (stores.next(), stores.next()) {
            (Some(only), None) => Ok(only.clone()),
            (None, _) => Err(DomainError::new(
                ErrorCode::ConfigurationError,
                format!("Box '{}' has no store and none is registered", config.name),
            )),
            (Some(_), Some(_)) => Err(DomainError::new(
                ErrorCode::ConfigurationError,
                format!(
                    "Box '{}' has no store binding and {} stores are registered",
                    config.name,
                    bindings.len()
                ),
            )),
        }
    }
}

impl<S: ?Sized> Default for StoreResolver<S> {
    fn default() -> Self {
        Self::new()
    }
}
