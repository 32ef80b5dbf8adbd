//! Live objects.
//!
//! An [`Object`] is a cheap handle to shared state: clones refer to the same
//! object. All of an object's state (values, ledger, identifier) sits behind
//! one lock, so field mutation and a save completing on another thread never
//! interleave.

use crate::{
    error::Result,
    ledger::{Generation, Ledger, OperationTable},
    schema::FieldSchema,
    value::{Pointer, Relation},
    ClassName, Error, ObjectId, Operation, Value,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Keys managed by the backend; callers cannot set them.
pub const RESERVED_KEYS: &[&str] = &["objectId", "createdAt", "updatedAt"];

/// Process-local identity of an object, stable across saves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(Uuid);

impl LocalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What the backend reported for a persisted generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveOutcome {
    pub object_id: Option<ObjectId>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ObjectState {
    object_id: Option<ObjectId>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    /// Last values confirmed persisted.
    stable: BTreeMap<String, Value>,
    /// Current local values.
    latest: BTreeMap<String, Value>,
    ledger: Ledger,
    /// Latest values of the keys each in-flight generation carries.
    captured: HashMap<Generation, BTreeMap<String, Option<Value>>>,
    /// Objects the backend sent inline with this one. Held so they stay live
    /// as long as this object does.
    included: Vec<Object>,
}

#[derive(Debug)]
struct ObjectInner {
    local_id: LocalId,
    class_name: ClassName,
    schema: Option<Arc<dyn FieldSchema>>,
    state: Mutex<ObjectState>,
}

/// A class-typed entity with stable and latest values.
#[derive(Clone)]
pub struct Object {
    inner: Arc<ObjectInner>,
}

impl Object {
    pub(crate) fn new(class_name: impl Into<ClassName>, schema: Option<Arc<dyn FieldSchema>>) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                local_id: LocalId::new(),
                class_name: class_name.into(),
                schema,
                state: Mutex::new(ObjectState::default()),
            }),
        }
    }

    /// An object as the backend knows it: identifier set, stable == latest.
    pub(crate) fn persisted(
        class_name: impl Into<ClassName>,
        schema: Option<Arc<dyn FieldSchema>>,
        outcome: SaveOutcome,
        fields: BTreeMap<String, Value>,
    ) -> Self {
        let object = Self::new(class_name, schema);
        {
            let mut state = object.inner.state.lock();
            state.object_id = outcome.object_id;
            state.created_at = outcome.created_at;
            state.updated_at = outcome.updated_at;
            state.stable = fields.clone();
            state.latest = fields;
        }
        object
    }

    pub(crate) fn downgrade(&self) -> WeakObject {
        WeakObject(Arc::downgrade(&self.inner))
    }

    pub fn local_id(&self) -> LocalId {
        self.inner.local_id
    }

    pub fn class_name(&self) -> &str {
        &self.inner.class_name
    }

    pub fn object_id(&self) -> Option<ObjectId> {
        self.inner.state.lock().object_id.clone()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().updated_at
    }

    /// True until the first successful save assigns an identifier.
    pub fn is_new(&self) -> bool {
        self.inner.state.lock().object_id.is_none()
    }

    /// Latest value of `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().latest.get(key).cloned()
    }

    /// Last persisted value of `key`.
    pub fn stable(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().stable.get(key).cloned()
    }

    /// Copy of all latest values.
    pub fn fields(&self) -> BTreeMap<String, Value> {
        self.inner.state.lock().latest.clone()
    }

    /// Pointer to this object.
    pub fn pointer(&self) -> Pointer {
        Pointer::live(self.inner.class_name.clone(), self.object_id(), self.inner.local_id)
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.record(Operation::set(key, value))
    }

    pub fn unset(&self, key: &str) -> Result<()> {
        self.record(Operation::delete(key))
    }

    pub fn increment(&self, key: &str, amount: f64) -> Result<()> {
        self.record(Operation::increment(key, amount))
    }

    pub fn append(&self, key: &str, objects: Vec<Value>) -> Result<()> {
        self.record(Operation::add(key, objects))
    }

    pub fn append_unique(&self, key: &str, objects: Vec<Value>) -> Result<()> {
        self.record(Operation::add_unique(key, objects))
    }

    pub fn remove(&self, key: &str, objects: Vec<Value>) -> Result<()> {
        self.record(Operation::remove(key, objects))
    }

    pub fn add_relation(&self, key: &str, member: &Object) -> Result<()> {
        self.record(Operation::add_relation(key, vec![member.pointer()]))
    }

    pub fn remove_relation(&self, key: &str, member: &Object) -> Result<()> {
        self.record(Operation::remove_relation(key, vec![member.pointer()]))
    }

    /// The relation stored under `key`, empty if there is none yet.
    pub fn relation(&self, key: &str) -> Relation {
        match self.get(key) {
            Some(Value::Relation(relation)) => relation,
            _ => Relation::default(),
        }
    }

    /// Apply `op` to the latest values and merge it into the ledger.
    ///
    /// On error nothing changes.
    pub fn record(&self, op: Operation) -> Result<()> {
        if RESERVED_KEYS.contains(&op.key.as_str()) || op.key.starts_with("__") {
            return Err(Error::ReservedKey(op.key));
        }
        op.validate()?;

        let mut state = self.inner.state.lock();
        let settled = op.apply(state.latest.get(&op.key))?;
        if let Some(schema) = &self.inner.schema {
            schema.validate(&op.key, settled.as_ref())?;
        }

        let key = op.key.clone();
        state.ledger.record(op, settled.as_ref())?;
        match settled {
            Some(value) => {
                state.latest.insert(key, value);
            }
            None => {
                state.latest.remove(&key);
            }
        }
        Ok(())
    }

    /// Copy of the pending operation table.
    pub fn pending(&self) -> OperationTable {
        self.inner.state.lock().ledger.pending()
    }

    pub fn has_pending(&self) -> bool {
        !self.inner.state.lock().ledger.is_empty()
    }

    /// Whether some field has changes that need a further request once the
    /// pending ones are saved.
    pub fn has_queued(&self) -> bool {
        self.inner.state.lock().ledger.has_queued()
    }

    /// Number of snapshots sent but neither committed nor rolled back.
    pub fn in_flight_count(&self) -> usize {
        self.inner.state.lock().ledger.in_flight_count()
    }

    /// Check required fields of a new object.
    pub fn validate_required(&self) -> Result<()> {
        match &self.inner.schema {
            Some(schema) if self.is_new() => {
                schema.validate_required(&self.inner.state.lock().latest)
            }
            _ => Ok(()),
        }
    }

    /// Take a snapshot of the pending table for sending.
    pub fn snapshot(&self) -> (Generation, OperationTable) {
        let mut state = self.inner.state.lock();
        let (generation, table) = state.ledger.snapshot();
        let values = table
            .keys()
            .map(|k| (k.clone(), state.latest.get(k).cloned()))
            .collect();
        state.captured.insert(generation, values);
        (generation, table)
    }

    /// The backend persisted `generation`: promote its values into stable.
    pub fn commit(&self, generation: Generation, outcome: SaveOutcome) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.ledger.commit(generation)?;

        let captured = state.captured.remove(&generation).unwrap_or_default();
        for (key, value) in captured {
            match value {
                Some(value) => {
                    state.stable.insert(key, value);
                }
                None => {
                    state.stable.remove(&key);
                }
            }
        }

        if state.object_id.is_none() {
            state.object_id = outcome.object_id;
        }
        if outcome.created_at.is_some() {
            state.created_at = outcome.created_at;
        }
        state.updated_at = outcome.updated_at.or(outcome.created_at).or(state.updated_at);
        Ok(())
    }

    /// Sending `generation` failed: keep everything pending.
    pub fn rollback(&self, generation: Generation) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.captured.remove(&generation);
        state.ledger.rollback(generation)
    }

    /// Overlay fresh server values. Pending operations are replayed on top
    /// so local changes stay visible.
    pub(crate) fn refresh(&self, outcome: SaveOutcome, fields: BTreeMap<String, Value>) {
        let mut state = self.inner.state.lock();
        for (key, value) in fields {
            let latest = state
                .ledger
                .operations(&key)
                .try_fold(Some(value.clone()), |current, op| op.apply(current.as_ref()))
                .unwrap_or_else(|_| Some(value.clone()));
            match latest {
                Some(latest) => {
                    state.latest.insert(key.clone(), latest);
                }
                None => {
                    state.latest.remove(&key);
                }
            }
            state.stable.insert(key, value);
        }

        if state.object_id.is_none() {
            state.object_id = outcome.object_id;
        }
        state.created_at = outcome.created_at.or(state.created_at);
        state.updated_at = outcome.updated_at.or(state.updated_at);
    }

    /// Pointers in the latest values and in pending operands.
    pub(crate) fn referenced_pointers(&self) -> Vec<Pointer> {
        let state = self.inner.state.lock();
        let mut out = Vec::new();
        for value in state.latest.values() {
            value.collect_pointers(&mut out);
        }
        let mut pointers: Vec<Pointer> = out.into_iter().cloned().collect();
        for op in state.ledger.all_operations() {
            pointers.extend(op.pointers().into_iter().cloned());
        }
        pointers
    }

    /// Objects included with this one by the last fetch.
    pub fn included(&self) -> Vec<Object> {
        self.inner.state.lock().included.clone()
    }

    pub(crate) fn hold_included(&self, objects: Vec<Object>) {
        self.inner.state.lock().included = objects;
    }
}

/// Non-owning handle kept by the store.
#[derive(Debug, Clone)]
pub(crate) struct WeakObject(Weak<ObjectInner>);

impl WeakObject {
    pub(crate) fn upgrade(&self) -> Option<Object> {
        self.0.upgrade().map(|inner| Object { inner })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Object {}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Object")
            .field("class_name", &self.inner.class_name)
            .field("local_id", &self.inner.local_id)
            .field("object_id", &state.object_id)
            .field("latest", &state.latest)
            .field("pending", &state.ledger.len())
            .finish()
    }
}

impl From<&Object> for Value {
    fn from(object: &Object) -> Self {
        Value::Pointer(object.pointer())
    }
}
