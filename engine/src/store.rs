//! Store - the identity map of live objects.
//!
//! The store resolves pointers to the objects they were taken from. It keeps
//! only weak handles: an object lives as long as some caller holds it, and
//! pointers between objects never keep each other alive.

use crate::{
    error::Result,
    ledger::Generation,
    object::{SaveOutcome, WeakObject},
    value::{parse_date, Pointer, TYPE_KEY},
    ClassName, Error, LocalId, Object, ObjectId, Schema, Value,
};
use parking_lot::RwLock;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeMap, HashMap, HashSet};

const MIN_PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug)]
struct Registry {
    objects: HashMap<LocalId, WeakObject>,
    by_object_id: HashMap<(ClassName, ObjectId), LocalId>,
    prune_at: usize,
}

impl Registry {
    fn insert(&mut self, object: &Object) {
        if self.objects.len() >= self.prune_at {
            self.objects.retain(|_, weak| weak.is_alive());
            let objects = &self.objects;
            self.by_object_id.retain(|_, local| objects.contains_key(local));
            self.prune_at = (self.objects.len() * 2).max(MIN_PRUNE_THRESHOLD);
        }
        self.objects.insert(object.local_id(), object.downgrade());
        if let Some(id) = object.object_id() {
            self.by_object_id
                .insert((object.class_name().to_string(), id), object.local_id());
        }
    }
}

/// Identity map of the objects created or fetched through it.
#[derive(Debug)]
pub struct Store {
    schema: Schema,
    registry: RwLock<Registry>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(Schema::new())
    }
}

impl Store {
    /// Create a store whose objects are validated against `schema`.
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            registry: RwLock::new(Registry {
                objects: HashMap::new(),
                by_object_id: HashMap::new(),
                prune_at: MIN_PRUNE_THRESHOLD,
            }),
        }
    }

    /// Get the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Create a new, unsaved object.
    pub fn create(&self, class_name: &str) -> Object {
        let object = Object::new(class_name, self.schema.get_class(class_name));
        self.registry.write().insert(&object);
        object
    }

    /// Get a live object by local identity.
    pub fn get(&self, local_id: LocalId) -> Option<Object> {
        self.registry
            .read()
            .objects
            .get(&local_id)
            .and_then(WeakObject::upgrade)
    }

    /// Get a live object by server identifier.
    pub fn find(&self, class_name: &str, object_id: &str) -> Option<Object> {
        let registry = self.registry.read();
        let local_id = registry
            .by_object_id
            .get(&(class_name.to_string(), object_id.to_string()))?;
        registry.objects.get(local_id).and_then(WeakObject::upgrade)
    }

    /// The live object a pointer refers to, if any.
    pub fn resolve(&self, pointer: &Pointer) -> Option<Object> {
        if let Some(object) = pointer.local_id().and_then(|id| self.get(id)) {
            return Some(object);
        }
        pointer
            .object_id()
            .and_then(|id| self.find(pointer.class_name(), id))
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.registry
            .read()
            .objects
            .values()
            .filter(|weak| weak.is_alive())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commit a persisted generation of `object` and index its identifier.
    pub fn commit(
        &self,
        object: &Object,
        generation: Generation,
        outcome: SaveOutcome,
    ) -> Result<()> {
        object.commit(generation, outcome)?;
        self.registry.write().insert(object);
        Ok(())
    }

    /// Turn a server document into an object.
    ///
    /// A live object with the same identifier is refreshed in place, so each
    /// server object has at most one live handle. Included objects nested in
    /// the document are rehydrated as well and held by the returned object,
    /// replacing whatever its previous fetch included.
    pub fn rehydrate(&self, class_name: &str, document: &JsonValue) -> Result<Object> {
        let mut included = Vec::new();
        let object = self.rehydrate_nested(class_name, document, &mut included)?;
        let mut seen = HashSet::new();
        included.retain(|nested| nested != &object && seen.insert(nested.local_id()));
        object.hold_included(included);
        Ok(object)
    }

    fn rehydrate_nested(
        &self,
        class_name: &str,
        document: &JsonValue,
        included: &mut Vec<Object>,
    ) -> Result<Object> {
        let map = document
            .as_object()
            .ok_or_else(|| Error::InvalidDocument("document must be an object".into()))?;
        let object_id = map
            .get("objectId")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::InvalidDocument("document has no objectId".into()))?;

        let outcome = SaveOutcome {
            object_id: Some(object_id.to_string()),
            created_at: date_field(map, "createdAt")?,
            updated_at: date_field(map, "updatedAt")?,
        };

        let mut fields = BTreeMap::new();
        for (key, value) in map {
            if matches!(
                key.as_str(),
                "objectId" | "createdAt" | "updatedAt" | "className" | TYPE_KEY
            ) {
                continue;
            }
            fields.insert(key.clone(), self.decode_field(value, included)?);
        }

        if let Some(existing) = self.find(class_name, object_id) {
            existing.refresh(outcome, fields);
            return Ok(existing);
        }

        let object = Object::persisted(
            class_name,
            self.schema.get_class(class_name),
            outcome,
            fields,
        );
        self.registry.write().insert(&object);
        Ok(object)
    }

    fn decode_field(&self, json: &JsonValue, included: &mut Vec<Object>) -> Result<Value> {
        match json {
            JsonValue::Object(map)
                if map.get(TYPE_KEY).and_then(JsonValue::as_str) == Some("Object") =>
            {
                let class_name = map
                    .get("className")
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| {
                        Error::InvalidDocument("included object has no className".into())
                    })?;
                let nested = self.rehydrate_nested(class_name, json, included)?;
                let pointer = nested.pointer();
                included.push(nested);
                Ok(Value::Pointer(pointer))
            }
            JsonValue::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.decode_field(item, included))
                    .collect::<Result<Vec<_>>>()?,
            )),
            other => Value::from_json(other),
        }
    }
}

fn date_field(
    map: &JsonMap<String, JsonValue>,
    key: &str,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    match map.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(iso)) => parse_date(iso).map(Some),
        Some(other) => match Value::from_json(other)? {
            Value::Date(date) => Ok(Some(date)),
            _ => Err(Error::InvalidDocument(format!("{key} is not a date"))),
        },
    }
}
