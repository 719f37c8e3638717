use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How a field of a registered entity type is replicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Plain value, copied as-is
    Scalar,
    /// Foreign key to another registered type, carried as `{_uid, _type}`
    Relation { related_type: String },
}

/// One field of an entity schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar,
        }
    }

    pub fn relation(name: impl Into<String>, related_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Relation {
                related_type: related_type.into(),
            },
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.kind, FieldKind::Relation { .. })
    }
}

/// Shape of a replicating entity type.
///
/// The intrinsic `type_name` must match the name the type is registered
/// under; the registry rejects mismatches so a schema cannot silently end
/// up behind the wrong event names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub type_name: String,
    pub fields: Vec<FieldDef>,
}

impl EntitySchema {
    pub fn new(type_name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            type_name: type_name.into(),
            fields,
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_relation())
    }
}

/// A snapshot of one tracked entity, as handed to history capture.
///
/// `uid` is stable for the entity's lifetime; `version` strictly increases
/// on every mutation. `fields` holds the replicated field values, with
/// relation fields rendered as `{_uid, _type}` objects (or null).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub uid: String,
    pub version: i64,
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    pub fn new(uid: impl Into<String>, version: i64, fields: Map<String, Value>) -> Self {
        Self {
            uid: uid.into(),
            version,
            fields,
        }
    }
}
