use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::actions::schema::ActionSchema;
use crate::errors::ValidationError;
use crate::executors::{DeliveryReceipt, FailureKind, ProviderError};

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, payload: &Value) -> Result<DeliveryReceipt, DispatchError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Unknown type or a payload found invalid at execution time. Never retried.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl DispatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation(_) => FailureKind::Permanent,
            Self::Provider(error) => error.kind(),
        }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Provider(error) => error.error_class(),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("action type `{0}` registered twice")]
    DuplicateActionType(String),
    #[error("alias `{alias}` points at unregistered action type `{target}`")]
    DanglingAlias { alias: String, target: String },
}

struct RegisteredAction {
    handler: Arc<dyn ActionHandler>,
    schema: ActionSchema,
}

/// Maps action types to handlers and payload schemas.
///
/// Built once at startup and shared read-only afterwards; there is no way to
/// register a handler on a built registry.
pub struct ActionRegistry {
    actions: HashMap<String, RegisteredAction>,
    aliases: HashMap<String, String>,
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::default()
    }

    /// Canonical action type for `action_type`, following aliases.
    pub fn resolve<'a>(&'a self, action_type: &'a str) -> Option<&'a str> {
        if let Some((canonical, _)) = self.actions.get_key_value(action_type) {
            return Some(canonical.as_str());
        }
        self.aliases.get(action_type).map(String::as_str)
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.resolve(action_type).is_some()
    }

    /// Sorted canonical types. Aliases are not listed.
    pub fn action_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn aliases(&self) -> Vec<(&str, &str)> {
        let mut aliases: Vec<(&str, &str)> =
            self.aliases.iter().map(|(alias, target)| (alias.as_str(), target.as_str())).collect();
        aliases.sort_unstable();
        aliases
    }

    /// Checks type and payload; returns the canonical type.
    pub fn validate(&self, action_type: &str, payload: &Value) -> Result<String, ValidationError> {
        let (canonical, registered) = self.lookup(action_type)?;
        registered.schema.validate(canonical, payload)?;
        Ok(canonical.to_string())
    }

    pub async fn dispatch(
        &self,
        action_type: &str,
        payload: &Value,
    ) -> Result<DeliveryReceipt, DispatchError> {
        let (canonical, registered) = self.lookup(action_type)?;
        registered.schema.validate(canonical, payload)?;
        registered.handler.handle(payload).await
    }

    fn lookup(&self, action_type: &str) -> Result<(&str, &RegisteredAction), ValidationError> {
        let canonical = self
            .resolve(action_type)
            .ok_or_else(|| ValidationError::UnknownActionType(action_type.to_string()))?;
        self.actions
            .get_key_value(canonical)
            .map(|(name, registered)| (name.as_str(), registered))
            .ok_or_else(|| ValidationError::UnknownActionType(action_type.to_string()))
    }
}

#[derive(Default)]
pub struct ActionRegistryBuilder {
    actions: Vec<(String, RegisteredAction)>,
    aliases: Vec<(String, String)>,
}

impl ActionRegistryBuilder {
    pub fn register<H>(
        mut self,
        action_type: impl Into<String>,
        handler: H,
        schema: ActionSchema,
    ) -> Self
    where
        H: ActionHandler + 'static,
    {
        let action = RegisteredAction { handler: Arc::new(handler), schema };
        self.actions.push((action_type.into(), action));
        self
    }

    pub fn alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.aliases.push((alias.into(), target.into()));
        self
    }

    pub fn build(self) -> Result<ActionRegistry, RegistryError> {
        let mut actions = HashMap::with_capacity(self.actions.len());
        for (action_type, registered) in self.actions {
            if actions.contains_key(&action_type) {
                return Err(RegistryError::DuplicateActionType(action_type));
            }
            actions.insert(action_type, registered);
        }

        let mut aliases = HashMap::with_capacity(self.aliases.len());
        for (alias, target) in self.aliases {
            if !actions.contains_key(&target) {
                return Err(RegistryError::DanglingAlias { alias, target });
            }
            if actions.contains_key(&alias) || aliases.contains_key(&alias) {
                return Err(RegistryError::DuplicateActionType(alias));
            }
            aliases.insert(alias, target);
        }

        Ok(ActionRegistry { actions, aliases })
    }
}
