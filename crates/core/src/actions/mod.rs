//! Action types the outbox knows how to execute.

pub mod catalog;
pub mod registry;
pub mod schema;

pub use catalog::{standard_registry, CatalogSettings};
pub use registry::{
    ActionHandler, ActionRegistry, ActionRegistryBuilder, DispatchError, RegistryError,
};
pub use schema::ActionSchema;
