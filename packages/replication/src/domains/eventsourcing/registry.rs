//! Registry of replicating entity types.
//!
//! Built once at process start and never mutated afterwards, so every
//! component (capture, serializer, subscription validation) can share one
//! immutable `Arc`. Tests construct isolated registries the same way.

use std::collections::HashMap;

use thiserror::Error;

use super::models::EntitySchema;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("type \"{0}\" is already registered")]
    DuplicateType(String),
    #[error("schema for \"{0}\" must have uid and version fields")]
    MissingContractFields(String),
    #[error("schema type name \"{actual}\" does not match registration \"{registered}\"")]
    TypeNameMismatch { registered: String, actual: String },
}

/// Maps a type name to the schema replicated under that name.
#[derive(Debug, Default)]
pub struct ReplicatingRegistry {
    schemas: HashMap<String, EntitySchema>,
    // registration order, for stable `all_registered` output
    order: Vec<String>,
}

impl ReplicatingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. One registration per type, for the process lifetime;
    /// there is no unregistration.
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        schema: EntitySchema,
    ) -> Result<(), RegistryError> {
        let type_name = type_name.into();
        if self.schemas.contains_key(&type_name) {
            return Err(RegistryError::DuplicateType(type_name));
        }
        if !schema.has_field("uid") || !schema.has_field("version") {
            return Err(RegistryError::MissingContractFields(type_name));
        }
        if schema.type_name != type_name {
            return Err(RegistryError::TypeNameMismatch {
                registered: type_name,
                actual: schema.type_name,
            });
        }

        self.order.push(type_name.clone());
        self.schemas.insert(type_name, schema);
        Ok(())
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.schemas.contains_key(type_name)
    }

    pub fn lookup(&self, type_name: &str) -> Option<&EntitySchema> {
        self.schemas.get(type_name)
    }

    /// All registered types, in registration order.
    pub fn all_registered(&self) -> impl Iterator<Item = (&str, &EntitySchema)> {
        self.order
            .iter()
            .filter_map(|name| self.schemas.get(name).map(|s| (name.as_str(), s)))
    }
}
