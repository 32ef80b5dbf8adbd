//! Field-level operations and their merge algebra.
//!
//! Changes are expressed as operations, not direct mutations. An object keeps
//! at most one pending operation per field; [`merge`] folds a newly recorded
//! operation into the pending one so that sending the result reproduces the
//! net effect of both.

use crate::{error::Result, value::Pointer, Error, Value};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

/// Reserved key carrying the operation name on the wire.
pub const OP_KEY: &str = "__op";

/// Name of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationName {
    Set,
    Delete,
    Increment,
    Add,
    AddUnique,
    Remove,
    AddRelation,
    RemoveRelation,
}

impl OperationName {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationName::Set => "Set",
            OperationName::Delete => "Delete",
            OperationName::Increment => "Increment",
            OperationName::Add => "Add",
            OperationName::AddUnique => "AddUnique",
            OperationName::Remove => "Remove",
            OperationName::AddRelation => "AddRelation",
            OperationName::RemoveRelation => "RemoveRelation",
        }
    }

    fn is_list(&self) -> bool {
        matches!(
            self,
            OperationName::Add | OperationName::AddUnique | OperationName::Remove
        )
    }

    pub(crate) fn is_relation(&self) -> bool {
        matches!(
            self,
            OperationName::AddRelation | OperationName::RemoveRelation
        )
    }
}

impl std::fmt::Display for OperationName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single pending mutation of one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name: OperationName,
    pub key: String,
    pub value: Option<Value>,
}

impl Operation {
    fn new(name: OperationName, key: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            name,
            key: key.into(),
            value,
        }
    }

    pub fn set(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(OperationName::Set, key, Some(value.into()))
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::new(OperationName::Delete, key, None)
    }

    pub fn increment(key: impl Into<String>, amount: f64) -> Self {
        Self::new(OperationName::Increment, key, Some(Value::Number(amount)))
    }

    pub fn add(key: impl Into<String>, objects: Vec<Value>) -> Self {
        Self::new(OperationName::Add, key, Some(Value::Array(objects)))
    }

    pub fn add_unique(key: impl Into<String>, objects: Vec<Value>) -> Self {
        Self::new(OperationName::AddUnique, key, Some(Value::Array(objects)))
    }

    pub fn remove(key: impl Into<String>, objects: Vec<Value>) -> Self {
        Self::new(OperationName::Remove, key, Some(Value::Array(objects)))
    }

    pub fn add_relation(key: impl Into<String>, members: Vec<Pointer>) -> Self {
        Self::relation(OperationName::AddRelation, key, members)
    }

    pub fn remove_relation(key: impl Into<String>, members: Vec<Pointer>) -> Self {
        Self::relation(OperationName::RemoveRelation, key, members)
    }

    fn relation(name: OperationName, key: impl Into<String>, members: Vec<Pointer>) -> Self {
        let objects = members.into_iter().map(Value::Pointer).collect();
        Self::new(name, key, Some(Value::Array(objects)))
    }

    /// Check that the operand has the kind the operation needs.
    pub fn validate(&self) -> Result<()> {
        if let Some(value) = &self.value {
            value.ensure_finite()?;
        }
        match (self.name, &self.value) {
            (OperationName::Set, Some(_)) | (OperationName::Delete, None) => Ok(()),
            (OperationName::Increment, Some(Value::Number(n))) if n.is_finite() => Ok(()),
            (name, Some(Value::Array(_))) if name.is_list() => Ok(()),
            (name, Some(Value::Array(items))) if name.is_relation() => {
                let mut classes = items.iter().map(|v| match v {
                    Value::Pointer(p) => Ok(p.class_name()),
                    other => Err(Error::incompatible(
                        &self.key,
                        format!("{name} needs pointers, got {}", other.kind()),
                    )),
                });
                if let Some(first) = classes.next().transpose()? {
                    for class_name in classes {
                        if class_name? != first {
                            return Err(Error::incompatible(
                                &self.key,
                                format!("{name} mixes classes"),
                            ));
                        }
                    }
                }
                Ok(())
            }
            (name, value) => Err(Error::incompatible(
                &self.key,
                format!(
                    "{name} cannot carry {}",
                    value
                        .as_ref()
                        .map(|v| v.kind().to_string())
                        .unwrap_or_else(|| "no value".into())
                ),
            )),
        }
    }

    fn objects(&self) -> &[Value] {
        self.value.as_ref().and_then(Value::as_array).unwrap_or(&[])
    }

    fn amount(&self) -> f64 {
        self.value.as_ref().and_then(Value::as_f64).unwrap_or(0.0)
    }

    fn with_objects(&self, name: OperationName, objects: Vec<Value>) -> Self {
        Self::new(name, self.key.clone(), Some(Value::Array(objects)))
    }

    /// Compute the field value after applying this operation to `current`.
    ///
    /// `None` means the field is absent.
    pub fn apply(&self, current: Option<&Value>) -> Result<Option<Value>> {
        let current = current.filter(|v| !v.is_null());
        let kind_error = |v: &Value| {
            Error::incompatible(&self.key, format!("{} on a {} field", self.name, v.kind()))
        };

        Ok(match self.name {
            OperationName::Set => self.value.clone(),
            OperationName::Delete => None,
            OperationName::Increment => match current {
                None => Some(Value::Number(self.amount())),
                Some(Value::Number(n)) => Some(Value::Number(n + self.amount())),
                Some(other) => return Err(kind_error(other)),
            },
            OperationName::Add | OperationName::AddUnique => {
                let mut items = match current {
                    None => Vec::new(),
                    Some(Value::Array(items)) => items.clone(),
                    Some(other) => return Err(kind_error(other)),
                };
                for object in self.objects() {
                    if self.name == OperationName::Add || !items.contains(object) {
                        items.push(object.clone());
                    }
                }
                Some(Value::Array(items))
            }
            OperationName::Remove => match current {
                None => None,
                Some(Value::Array(items)) => Some(Value::Array(
                    items
                        .iter()
                        .filter(|v| !self.objects().contains(v))
                        .cloned()
                        .collect(),
                )),
                Some(other) => return Err(kind_error(other)),
            },
            OperationName::AddRelation | OperationName::RemoveRelation => {
                let mut relation = match current {
                    None if self.name == OperationName::RemoveRelation => return Ok(None),
                    None => crate::value::Relation::default(),
                    Some(Value::Relation(r)) => r.clone(),
                    Some(other) => return Err(kind_error(other)),
                };
                for pointer in self.objects().iter().filter_map(Value::as_pointer) {
                    if self.name == OperationName::AddRelation {
                        relation.insert(pointer.clone());
                    } else {
                        relation.remove(pointer);
                    }
                }
                Some(Value::Relation(relation))
            }
        })
    }

    /// Remove the effect of `sent`, already persisted, from this operation
    /// which was merged on top of it.
    ///
    /// Returns `None` when nothing is left to send.
    pub fn rebase(&self, sent: &Operation) -> Option<Operation> {
        if self.name != sent.name {
            return Some(self.clone());
        }
        match self.name {
            OperationName::Set | OperationName::Delete => Some(self.clone()),
            OperationName::Increment => {
                let rest = self.amount() - sent.amount();
                (rest != 0.0).then(|| Operation::increment(self.key.clone(), rest))
            }
            OperationName::Add | OperationName::AddUnique => {
                let (ours, theirs) = (self.objects(), sent.objects());
                if ours.starts_with(theirs) {
                    let rest = ours[theirs.len()..].to_vec();
                    (!rest.is_empty()).then(|| self.with_objects(self.name, rest))
                } else {
                    Some(self.clone())
                }
            }
            OperationName::Remove | OperationName::AddRelation | OperationName::RemoveRelation => {
                let rest = difference(self.objects(), sent.objects());
                (!rest.is_empty()).then(|| self.with_objects(self.name, rest))
            }
        }
    }

    /// Every pointer inside the operand.
    pub fn pointers(&self) -> Vec<&Pointer> {
        let mut out = Vec::new();
        if let Some(value) = &self.value {
            value.collect_pointers(&mut out);
        }
        out
    }

    /// Wire form of this operation, encoding pointers with `pointer`.
    pub fn to_json_with<F>(&self, pointer: &mut F) -> Result<JsonValue>
    where
        F: FnMut(&Pointer) -> Result<JsonValue>,
    {
        Ok(match self.name {
            OperationName::Set => match &self.value {
                Some(value) => value.to_json_with(pointer)?,
                None => JsonValue::Null,
            },
            OperationName::Delete => json!({ OP_KEY: "Delete" }),
            OperationName::Increment => json!({
                OP_KEY: "Increment",
                "amount": Value::Number(self.amount()).to_json(),
            }),
            name => {
                let objects = self
                    .objects()
                    .iter()
                    .map(|v| v.to_json_with(pointer))
                    .collect::<Result<Vec<_>>>()?;
                json!({ OP_KEY: name.as_str(), "objects": objects })
            }
        })
    }

    /// Wire form with pointers encoded as they are.
    pub fn to_json(&self) -> JsonValue {
        let mut encode = |p: &Pointer| Ok(p.to_json());
        // Pointer encoding above never fails.
        self.to_json_with(&mut encode).unwrap_or(JsonValue::Null)
    }
}

fn difference(ours: &[Value], theirs: &[Value]) -> Vec<Value> {
    ours.iter().filter(|v| !theirs.contains(v)).cloned().collect()
}

fn union(ours: &[Value], theirs: &[Value]) -> Vec<Value> {
    let mut out = ours.to_vec();
    for v in theirs {
        if !out.contains(v) {
            out.push(v.clone());
        }
    }
    out
}

fn collapse(key: &str, settled: Option<&Value>) -> Operation {
    match settled {
        Some(value) => Operation::set(key, value.clone()),
        None => Operation::delete(key),
    }
}

/// Outcome of folding one operation into another.
#[derive(Debug, Clone, PartialEq)]
pub enum Merged {
    /// One operation carries the effect of both.
    Single(Operation),
    /// The two operations cancel out.
    Cancelled,
    /// No single operation carries both: the first must be sent, and
    /// persisted, before the second.
    Sequence(Operation, Operation),
}

/// Merge `incoming` into the operation pending for the same field.
///
/// `settled` is the field value after `incoming` has been applied locally;
/// it is what a collapsed result carries.
pub fn merge(
    existing: Option<Operation>,
    incoming: Operation,
    settled: Option<&Value>,
) -> Result<Merged> {
    use Merged::{Cancelled, Sequence, Single};
    use OperationName::*;

    incoming.validate()?;
    let Some(existing) = existing else {
        return Ok(Single(incoming));
    };
    if existing.key != incoming.key {
        return Err(Error::incompatible(
            &incoming.key,
            format!("cannot merge with an operation on '{}'", existing.key),
        ));
    }
    let key = incoming.key.as_str();

    match (existing.name, incoming.name) {
        (_, Set) | (_, Delete) => Ok(Single(incoming)),

        (Set | Delete, name) if name.is_relation() => Err(Error::incompatible(
            key,
            format!("{name} cannot follow a pending {}", existing.name),
        )),
        (Set | Delete, _) => Ok(Single(collapse(key, settled))),

        (Increment, Increment) => Ok(Single(Operation::increment(
            key,
            existing.amount() + incoming.amount(),
        ))),

        (Add | AddUnique, Add | AddUnique) => {
            if existing.name == AddUnique || incoming.name == AddUnique {
                let objects = union(&union(&[], existing.objects()), incoming.objects());
                Ok(Single(incoming.with_objects(AddUnique, objects)))
            } else {
                let mut objects = existing.objects().to_vec();
                objects.extend_from_slice(incoming.objects());
                Ok(Single(incoming.with_objects(Add, objects)))
            }
        }

        (Remove, Remove) => Ok(Single(
            incoming.with_objects(Remove, union(existing.objects(), incoming.objects())),
        )),

        (Add | AddUnique, Remove) | (Remove, Add | AddUnique) => {
            Ok(Single(collapse(key, settled)))
        }

        (AddRelation, AddRelation) | (RemoveRelation, RemoveRelation) => Ok(Single(
            incoming.with_objects(incoming.name, union(existing.objects(), incoming.objects())),
        )),

        // Members named on both sides cancel; the rest keep their order.
        (AddRelation, RemoveRelation) | (RemoveRelation, AddRelation) => {
            let kept = difference(existing.objects(), incoming.objects());
            let added = difference(incoming.objects(), existing.objects());
            match (kept.is_empty(), added.is_empty()) {
                (true, true) => Ok(Cancelled),
                (true, false) => Ok(Single(incoming.with_objects(incoming.name, added))),
                (false, true) => Ok(Single(existing.with_objects(existing.name, kept))),
                (false, false) => Ok(Sequence(
                    existing.with_objects(existing.name, kept),
                    incoming.with_objects(incoming.name, added),
                )),
            }
        }

        (a, b) => Err(Error::incompatible(key, format!("{b} cannot follow {a}"))),
    }
}
