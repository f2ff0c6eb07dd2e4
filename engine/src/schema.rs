//! Typed collection schemas.
//!
//! A [`Schema`] names every collection the engine synchronizes and gives each
//! one a typed field list. Local writes are validated against it before they
//! are stored. Pulled records are validated by the reconciler; an invalid one
//! is logged and skipped without failing the pull.

use crate::{
    error::Result,
    record::{CREATED_AT, UPDATED_AT, UPDATED_AT_ALIAS},
    CollectionName, Error, SchemaVersion,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Milliseconds since the Unix epoch
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64(),
            FieldType::Json => true,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::String => "String",
            FieldType::Int => "Int",
            FieldType::Float => "Float",
            FieldType::Bool => "Bool",
            FieldType::Timestamp => "Timestamp",
            FieldType::Json => "Json",
        };
        f.write_str(name)
    }
}

/// Definition of a field in a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Check one field value. `None` and JSON `null` both count as absent.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value {
            None | Some(Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            None | Some(Value::Null) => Ok(()),
            Some(v) if self.field_type.accepts(v) => Ok(()),
            Some(v) => Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(v).to_string(),
            }),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

fn is_bookkeeping_field(name: &str) -> bool {
    matches!(name, "id" | CREATED_AT | UPDATED_AT | UPDATED_AT_ALIAS)
}

/// Schema for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    pub name: CollectionName,
    pub fields: Vec<FieldDef>,
    /// Accept fields not listed in `fields` (heterogeneous backends).
    #[serde(default)]
    pub allow_extra_fields: bool,
}

impl CollectionSchema {
    pub fn new(name: impl Into<CollectionName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
            allow_extra_fields: false,
        }
    }

    /// Builder-style switch for accepting undeclared fields.
    pub fn with_extra_fields(mut self) -> Self {
        self.allow_extra_fields = true;
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate a complete field bag.
    pub fn validate_fields(&self, fields: &Map<String, Value>) -> Result<()> {
        for def in &self.fields {
            def.validate(fields.get(&def.name))?;
        }
        if !self.allow_extra_fields {
            if let Some(unknown) = fields
                .keys()
                .find(|key| !is_bookkeeping_field(key) && self.field(key).is_none())
            {
                return Err(Error::UnknownField {
                    collection: self.name.clone(),
                    field: unknown.clone(),
                });
            }
        }
        Ok(())
    }

    /// Validate a JSON value that must be an object.
    pub fn validate_payload(&self, payload: &Value) -> Result<()> {
        let fields = payload
            .as_object()
            .ok_or_else(|| Error::InvalidPayload("payload must be an object".into()))?;
        self.validate_fields(fields)
    }
}

/// Schema for the whole local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Sent with every pull so the remote can refuse clients it cannot serve
    pub version: SchemaVersion,
    pub collections: BTreeMap<CollectionName, CollectionSchema>,
}

impl Schema {
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            collections: BTreeMap::new(),
        }
    }

    pub fn add_collection(&mut self, collection: CollectionSchema) -> &mut Self {
        self.collections.insert(collection.name.clone(), collection);
        self
    }

    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.add_collection(collection);
        self
    }

    pub fn get_collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.get(name)
    }

    /// Look up a collection or fail with [`Error::CollectionNotFound`].
    pub fn collection(&self, name: &str) -> Result<&CollectionSchema> {
        self.get_collection(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Collection names in a stable order.
    pub fn collection_names(&self) -> impl Iterator<Item = &CollectionName> {
        self.collections.keys()
    }
}
