//! Registry of replicated (locally mirrored) entity types.
//!
//! Consumer-side analog of the replicating registry: routes an incoming
//! `_type` tag to the local schema replicas are stored under. Built once at
//! startup, immutable afterwards.

use std::collections::HashMap;

use crate::domains::eventsourcing::models::EntitySchema;
use crate::domains::eventsourcing::registry::RegistryError;

#[derive(Debug, Default)]
pub struct ReplicatedRegistry {
    schemas: HashMap<String, EntitySchema>,
}

impl ReplicatedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

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
        self.schemas.insert(type_name, schema);
        Ok(())
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.schemas.contains_key(type_name)
    }

    pub fn lookup(&self, type_name: &str) -> Option<&EntitySchema> {
        self.schemas.get(type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::eventsourcing::models::FieldDef;

    #[test]
    fn test_register_requires_contract_fields() {
        let mut registry = ReplicatedRegistry::new();
        let err = registry
            .register(
                "contact",
                EntitySchema::new("contact", vec![FieldDef::scalar("name")]),
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::MissingContractFields(_)));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = ReplicatedRegistry::new();
        let schema = EntitySchema::new(
            "contact",
            vec![FieldDef::scalar("uid"), FieldDef::scalar("version")],
        );
        registry.register("contact", schema.clone()).unwrap();
        assert!(matches!(
            registry.register("contact", schema),
            Err(RegistryError::DuplicateType(_))
        ));
    }
}
