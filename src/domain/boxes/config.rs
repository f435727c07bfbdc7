//! Named outbox/inbox configuration.
//!
//! `BoxConfig<S>` is generic over the store trait object it binds to, so the
//! same shape serves outboxes and inboxes without the domain depending on
//! the store ports.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::domain::foundation::{DomainError, Event, EventTypeInfo};

/// Name of the configuration used when none is given.
pub const DEFAULT_BOX_NAME: &str = "Default";

/// Default number of records fetched per poll cycle.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default delay between poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Builds a store for a configuration.
pub type StoreFactory<S> = Arc<dyn Fn() -> Result<Arc<S>, DomainError> + Send + Sync>;

/// Decides which event types route through a box.
pub type EventSelector = Arc<dyn Fn(&EventTypeInfo) -> bool + Send + Sync>;

/// One named outbox or inbox.
pub struct BoxConfig<S: ?Sized> {
    pub name: String,
    /// Name of a store registered with the resolver.
    pub implementation: Option<String>,
    /// Overrides `implementation` when set.
    pub factory: Option<StoreFactory<S>>,
    /// `None` selects every event type.
    pub selector: Option<EventSelector>,
    pub is_enabled: bool,
    pub batch_size: usize,
    pub poll_interval: Duration,
}

impl<S: ?Sized> BoxConfig<S> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            implementation: None,
            factory: None,
            selector: None,
            is_enabled: true,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Checks whether events of `event_type` route through this box.
    pub fn selects(&self, event_type: &EventTypeInfo) -> bool {
        self.selector
            .as_ref()
            .map_or(true, |selector| selector(event_type))
    }

    pub fn with_implementation(mut self, implementation: impl Into<String>) -> Self {
        self.implementation = Some(implementation.into());
        self
    }

    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<S>, DomainError> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn with_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(&EventTypeInfo) -> bool + Send + Sync + 'static,
    {
        self.selector = Some(Arc::new(selector));
        self
    }

    /// Selects `E` and every type registered as derived from it.
    pub fn select_assignable_to<E: Event>(self) -> Self {
        self.with_selector(|info| info.is_assignable_to(TypeId::of::<E>()))
    }

    pub fn with_enabled(mut self, is_enabled: bool) -> Self {
        self.is_enabled = is_enabled;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl<S: ?Sized> Clone for BoxConfig<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            implementation: self.implementation.clone(),
            factory: self.factory.clone(),
            selector: self.selector.clone(),
            is_enabled: self.is_enabled,
            batch_size: self.batch_size,
            poll_interval: self.poll_interval,
        }
    }
}

impl<S: ?Sized> fmt::Debug for BoxConfig<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxConfig")
            .field("name", &self.name)
            .field("implementation", &self.implementation)
            .field("has_factory", &self.factory.is_some())
            .field("has_selector", &self.selector.is_some())
            .field("is_enabled", &self.is_enabled)
            .field("batch_size", &self.batch_size)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// Dictionary of named box configurations.
///
/// Entries are created on first use with the dictionary's defaults.
pub struct BoxConfigs<S: ?Sized> {
    entries: RwLock<BTreeMap<String, Arc<BoxConfig<S>>>>,
    default_batch_size: usize,
    default_poll_interval: Duration,
}

impl<S: ?Sized> BoxConfigs<S> {
    pub fn new() -> Self {
        Self::with_defaults(DEFAULT_BATCH_SIZE, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_defaults(batch_size: usize, poll_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            default_batch_size: batch_size,
            default_poll_interval: poll_interval,
        }
    }

    fn fresh(&self, name: &str) -> BoxConfig<S> {
        BoxConfig::new(name)
            .with_batch_size(self.default_batch_size)
            .with_poll_interval(self.default_poll_interval)
    }

    /// Creates or updates the named configuration.
    pub fn configure<F>(&self, name: &str, configure: F) -> Arc<BoxConfig<S>>
    where
        F: FnOnce(BoxConfig<S>) -> BoxConfig<S>,
    {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let current = entries
            .get(name)
            .map(|existing| existing.as_ref().clone())
            .unwrap_or_else(|| self.fresh(name));
        let mut updated = configure(current);
        updated.name = name.to_string();
        let updated = Arc::new(updated);
        entries.insert(name.to_string(), updated.clone());
        updated
    }

    /// Returns the named configuration, creating it with defaults if absent.
    pub fn get_or_add(&self, name: &str) -> Arc<BoxConfig<S>> {
        if let Some(existing) = self.get(name) {
            return existing;
        }
        self.configure(name, |config| config)
    }

    pub fn get(&self, name: &str) -> Option<Arc<BoxConfig<S>>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(name).cloned()
    }

    /// All configurations, ordered by name.
    pub fn all(&self) -> Vec<Arc<BoxConfig<S>>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().cloned().collect()
    }

    /// Enabled configurations, ordered by name.
    pub fn enabled(&self) -> Vec<Arc<BoxConfig<S>>> {
        self.all().into_iter().filter(|c| c.is_enabled).collect()
    }

    /// Configurations whose selector accepts `event_type`.
    pub fn matching(&self, event_type: &EventTypeInfo) -> Vec<Arc<BoxConfig<S>>> {
        self.all()
            .into_iter()
            .filter(|c| c.selects(event_type))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.is_empty()
    }
}

impl<S: ?Sized> Default for BoxConfigs<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized> fmt::Debug for BoxConfigs<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.all()).finish()
    }
}
