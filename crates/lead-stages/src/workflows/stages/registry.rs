//! Startup-time collection of stage actions contributed by feature modules.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{debug, warn};

use super::binding::{DefaultEngagementHandler, StageActionHandler};
use super::domain::ActionType;

/// How a registration points at its handler.
#[derive(Clone)]
pub enum HandlerRef {
    /// Use the default engagement handler.
    Default,
    /// Look the handler up in the [`HandlerTable`] when the catalog is built.
    Named(String),
    Direct(Arc<dyn StageActionHandler>),
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerRef::Default => f.write_str("Default"),
            HandlerRef::Named(name) => f.debug_tuple("Named").field(name).finish(),
            HandlerRef::Direct(_) => f.write_str("Direct(..)"),
        }
    }
}

/// One action contributed by a registrant.
#[derive(Debug, Clone)]
pub struct ActionRegistration {
    pub action_type: ActionType,
    pub label: String,
    pub group: String,
    pub handler: HandlerRef,
}

impl ActionRegistration {
    pub fn new(action_type: ActionType, label: impl Into<String>) -> Self {
        let group = action_type.group().to_string();
        Self {
            action_type,
            label: label.into(),
            group,
            handler: HandlerRef::Default,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn StageActionHandler>) -> Self {
        self.handler = HandlerRef::Direct(handler);
        self
    }

    pub fn with_named_handler(mut self, name: impl Into<String>) -> Self {
        self.handler = HandlerRef::Named(name.into());
        self
    }
}

/// Named handlers that registrations may refer to by string.
#[derive(Default, Clone)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn StageActionHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn StageActionHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StageActionHandler>> {
        self.handlers.get(name).cloned()
    }
}

/// Catalog entry with its handler already resolved.
#[derive(Clone)]
pub struct RegisteredAction {
    pub action_type: ActionType,
    pub label: String,
    pub group: String,
    handler: Arc<dyn StageActionHandler>,
}

impl RegisteredAction {
    pub fn handler(&self) -> &dyn StageActionHandler {
        self.handler.as_ref()
    }
}

impl PartialEq for RegisteredAction {
    fn eq(&self, other: &Self) -> bool {
        self.action_type == other.action_type
            && self.label == other.label
            && self.group == other.group
            && Arc::ptr_eq(&self.handler, &other.handler)
    }
}

impl fmt::Debug for RegisteredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredAction")
            .field("action_type", &self.action_type)
            .field("label", &self.label)
            .field("group", &self.group)
            .field("parameters", &self.handler.parameters())
            .finish()
    }
}

/// Display entry for builder forms and the HTTP listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionChoice {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub label: String,
    pub group: String,
}

/// Built registry: actions keyed by type plus choices in registration order.
#[derive(Debug, Default, PartialEq)]
pub struct ActionCatalog {
    actions: HashMap<ActionType, RegisteredAction>,
    choices: Vec<ActionChoice>,
}

impl ActionCatalog {
    pub fn get(&self, action_type: &ActionType) -> Option<&RegisteredAction> {
        self.actions.get(action_type)
    }

    pub fn contains(&self, action_type: &ActionType) -> bool {
        self.actions.contains_key(action_type)
    }

    pub fn choices(&self) -> &[ActionChoice] {
        &self.choices
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Mutable view handed to registrants while the catalog is assembled.
pub struct CatalogBuilder<'t> {
    handlers: &'t HandlerTable,
    default_handler: Arc<dyn StageActionHandler>,
    catalog: ActionCatalog,
}

impl<'t> CatalogBuilder<'t> {
    fn new(handlers: &'t HandlerTable, default_handler: Arc<dyn StageActionHandler>) -> Self {
        Self {
            handlers,
            default_handler,
            catalog: ActionCatalog::default(),
        }
    }

    /// Add an action. A repeated type replaces the earlier entry and keeps its
    /// slot in the choice list.
    pub fn add(&mut self, registration: ActionRegistration) -> Result<(), RegistryError> {
        let ActionRegistration {
            action_type,
            label,
            group,
            handler,
        } = registration;

        let handler = match handler {
            HandlerRef::Default => self.default_handler.clone(),
            HandlerRef::Direct(handler) => handler,
            HandlerRef::Named(name) => {
                self.handlers
                    .get(&name)
                    .ok_or_else(|| RegistryError::UnknownHandler {
                        action_type: action_type.to_string(),
                        handler: name.clone(),
                    })?
            }
        };

        let choice = ActionChoice {
            action_type: action_type.clone(),
            label: label.clone(),
            group: group.clone(),
        };
        match self
            .catalog
            .choices
            .iter_mut()
            .find(|existing| existing.action_type == action_type)
        {
            Some(existing) => {
                warn!(%action_type, "stage action registered twice; keeping the later definition");
                *existing = choice;
            }
            None => self.catalog.choices.push(choice),
        }

        self.catalog.actions.insert(
            action_type.clone(),
            RegisteredAction {
                action_type,
                label,
                group,
                handler,
            },
        );
        Ok(())
    }

    fn finish(self) -> ActionCatalog {
        self.catalog
    }
}

/// Feature module contributing stage actions.
pub trait ActionRegistrant: Send + Sync {
    fn register(&self, builder: &mut CatalogBuilder<'_>) -> Result<(), RegistryError>;
}

impl<F> ActionRegistrant for F
where
    F: Fn(&mut CatalogBuilder<'_>) -> Result<(), RegistryError> + Send + Sync,
{
    fn register(&self, builder: &mut CatalogBuilder<'_>) -> Result<(), RegistryError> {
        self(builder)
    }
}

/// Collects registrants and caches the built catalog until invalidated.
pub struct ActionRegistry {
    handlers: HandlerTable,
    default_handler: Arc<dyn StageActionHandler>,
    registrants: Vec<Arc<dyn ActionRegistrant>>,
    cache: RwLock<Option<Arc<ActionCatalog>>>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new(HandlerTable::default())
    }
}

impl ActionRegistry {
    pub fn new(handlers: HandlerTable) -> Self {
        Self {
            handlers,
            default_handler: Arc::new(DefaultEngagementHandler),
            registrants: Vec::new(),
            cache: RwLock::new(None),
        }
    }

    pub fn with_registrant<R>(mut self, registrant: R) -> Self
    where
        R: ActionRegistrant + 'static,
    {
        self.add_registrant(registrant);
        self
    }

    pub fn add_registrant<R>(&mut self, registrant: R)
    where
        R: ActionRegistrant + 'static,
    {
        self.registrants.push(Arc::new(registrant));
        self.invalidate();
    }

    /// Build the catalog, or return the cached one.
    pub fn build(&self) -> Result<Arc<ActionCatalog>, RegistryError> {
        if let Some(catalog) = self
            .cache
            .read()
            .expect("registry cache lock poisoned")
            .as_ref()
        {
            return Ok(catalog.clone());
        }

        let mut cache = self.cache.write().expect("registry cache lock poisoned");
        if let Some(catalog) = cache.as_ref() {
            return Ok(catalog.clone());
        }

        let mut builder = CatalogBuilder::new(&self.handlers, self.default_handler.clone());
        for registrant in &self.registrants {
            registrant.register(&mut builder)?;
        }
        let catalog = Arc::new(builder.finish());
        debug!(
            actions = catalog.len(),
            registrants = self.registrants.len(),
            "stage action catalog built"
        );

        *cache = Some(catalog.clone());
        Ok(catalog)
    }

    /// Drop the cached catalog; the next `build` re-runs every registrant.
    pub fn invalidate(&self) {
        *self.cache.write().expect("registry cache lock poisoned") = None;
    }
}

/// Configuration errors surfaced while building the catalog.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("action '{action_type}' references unknown handler '{handler}'")]
    UnknownHandler { action_type: String, handler: String },
    #[error("registrant failed: {0}")]
    Registrant(String),
}
