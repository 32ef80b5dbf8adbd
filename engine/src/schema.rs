//! Field schemas.
//!
//! A schema tells an object which keys exist on its class and which value
//! kind each one holds. Objects without a schema accept any key.

use crate::{error::Result, ClassName, Error, Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// What an object needs to know about its declared fields.
pub trait FieldSchema: std::fmt::Debug + Send + Sync {
    /// Class the schema describes.
    fn class_name(&self) -> &str;

    /// Declared kind of `key`. `Some(None)` means the field accepts any kind;
    /// `None` means the field is not declared.
    fn kind_of(&self, key: &str) -> Option<Option<ValueKind>>;

    /// All declared keys.
    fn keys(&self) -> Vec<&str>;

    /// Keys that must hold a non-null value before a new object is saved.
    fn required_keys(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Validate a field value about to be stored.
    fn validate(&self, key: &str, value: Option<&Value>) -> Result<()> {
        let declared = self.kind_of(key).ok_or_else(|| Error::UnknownField {
            class_name: self.class_name().to_string(),
            field: key.to_string(),
        })?;
        match (declared, value) {
            (_, None) | (_, Some(Value::Null)) | (None, _) => Ok(()),
            (Some(expected), Some(v)) if v.kind() == expected => Ok(()),
            (Some(expected), Some(v)) => Err(Error::TypeMismatch {
                field: key.to_string(),
                expected: expected.to_string(),
                got: v.kind().to_string(),
            }),
        }
    }

    /// Check required fields against an object's values.
    fn validate_required(&self, fields: &BTreeMap<String, Value>) -> Result<()> {
        for key in self.required_keys() {
            match fields.get(key) {
                None | Some(Value::Null) => {
                    return Err(Error::MissingRequiredField(key.to_string()))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Definition of a field in a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Value kind, `None` for any
    pub kind: Option<ValueKind>,
    /// Whether a new object must set this field
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind: Some(kind),
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind: Some(kind),
            required: false,
        }
    }

    /// An optional field accepting any kind.
    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            required: false,
        }
    }
}

/// Schema for one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSchema {
    /// Class name
    pub name: ClassName,
    /// Field definitions
    pub fields: Vec<FieldDef>,
}

impl ClassSchema {
    /// Create a new class schema.
    pub fn new(name: impl Into<ClassName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    fn field(&self, key: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == key)
    }
}

impl FieldSchema for ClassSchema {
    fn class_name(&self) -> &str {
        &self.name
    }

    fn kind_of(&self, key: &str) -> Option<Option<ValueKind>> {
        self.field(key).map(|f| f.kind)
    }

    fn keys(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    fn required_keys(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect()
    }
}

/// Runtime registry of class schemas.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    classes: HashMap<ClassName, Arc<dyn FieldSchema>>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class schema.
    pub fn add_class(&mut self, class: impl FieldSchema + 'static) -> &mut Self {
        self.classes
            .insert(class.class_name().to_string(), Arc::new(class));
        self
    }

    /// Builder-style method to register a class schema.
    pub fn with_class(mut self, class: impl FieldSchema + 'static) -> Self {
        self.add_class(class);
        self
    }

    /// Get a class schema by name.
    pub fn get_class(&self, name: &str) -> Option<Arc<dyn FieldSchema>> {
        self.classes.get(name).cloned()
    }
}
