//! Per-object ledger of pending operations.
//!
//! The ledger holds one merged [`Operation`] per field. Saving takes a
//! snapshot identified by a [`Generation`]; the snapshot is committed once the
//! backend confirmed it or rolled back if sending failed. Operations recorded
//! while a generation is in flight survive its commit.
//!
//! When a field's next change cannot be folded into its pending operation
//! (opposite relation changes, or any relation change that would undo part of
//! an operation already sent) it is queued behind it and becomes pending once
//! that operation is committed.

use crate::{
    error::Result,
    operation::{self, Merged},
    Error, Operation, OperationName, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Field key to the single operation pending for it.
pub type OperationTable = BTreeMap<String, Operation>;

/// Identifies one snapshot of a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Generation(pub u64);

#[derive(Debug, Clone)]
struct Entry {
    op: Operation,
    /// Ledger revision of the last change to `op`.
    revision: u64,
    /// Operations to send, in order, after `op` is persisted.
    queued: Vec<Operation>,
}

#[derive(Debug, Clone)]
struct InFlight {
    revision: u64,
    table: OperationTable,
}

/// Pending operations of one object.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pending: BTreeMap<String, Entry>,
    revision: u64,
    next_generation: u64,
    in_flight: HashMap<Generation, InFlight>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `op` into the pending table.
    ///
    /// `settled` is the field value after `op` was applied locally. On error
    /// the table is unchanged.
    pub fn record(&mut self, op: Operation, settled: Option<&Value>) -> Result<()> {
        let key = op.key.clone();
        let (head, mut queued) = match self.pending.get(&key) {
            Some(entry) => (Some(entry.op.clone()), entry.queued.clone()),
            None => (None, Vec::new()),
        };

        if !matches!(op.name, OperationName::Set | OperationName::Delete) {
            if let Some(tail) = queued.pop() {
                queued.extend(unfold(operation::merge(Some(tail), op, settled)?));
                if let Some(entry) = self.pending.get_mut(&key) {
                    entry.queued = queued;
                }
                return Ok(());
            }
            // The head may already be on the wire: it has to reach the
            // backend as it is, and the undo follows in a later request.
            let sent = self.in_flight.values().any(|f| f.table.contains_key(&key));
            if sent && head.as_ref().is_some_and(|head| opposes(head, &op)) {
                op.validate()?;
                if let Some(entry) = self.pending.get_mut(&key) {
                    entry.queued.push(op);
                }
                return Ok(());
            }
        }

        let mut ops = unfold(operation::merge(head, op, settled)?).into_iter();
        self.revision += 1;
        match ops.next() {
            Some(op) => {
                self.pending.insert(
                    key,
                    Entry {
                        op,
                        revision: self.revision,
                        queued: ops.collect(),
                    },
                );
            }
            None => {
                self.pending.remove(&key);
            }
        }
        Ok(())
    }

    /// The operation pending for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&Operation> {
        self.pending.get(key).map(|e| &e.op)
    }

    /// The operation pending for `key` followed by those queued behind it.
    pub fn operations<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a Operation> + 'a {
        self.pending.get(key).into_iter().flat_map(Entry::operations)
    }

    /// Every pending and queued operation.
    pub fn all_operations(&self) -> impl Iterator<Item = &Operation> + '_ {
        self.pending.values().flat_map(Entry::operations)
    }

    /// Whether some field has operations waiting behind its pending one.
    pub fn has_queued(&self) -> bool {
        self.pending.values().any(|e| !e.queued.is_empty())
    }

    /// Copy of the pending table.
    pub fn pending(&self) -> OperationTable {
        self.pending
            .iter()
            .map(|(k, e)| (k.clone(), e.op.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Number of generations taken but neither committed nor rolled back.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Capture the pending table for sending. Does not clear it.
    pub fn snapshot(&mut self) -> (Generation, OperationTable) {
        self.next_generation += 1;
        let generation = Generation(self.next_generation);
        let table = self.pending();
        self.in_flight.insert(
            generation,
            InFlight {
                revision: self.revision,
                table: table.clone(),
            },
        );
        (generation, table)
    }

    /// The backend persisted `generation`: drop exactly what it carried.
    ///
    /// Entries changed after the snapshot are rebased onto the persisted
    /// state instead of dropped. Returns the committed table.
    pub fn commit(&mut self, generation: Generation) -> Result<OperationTable> {
        let in_flight = self
            .in_flight
            .remove(&generation)
            .ok_or(Error::UnknownGeneration(generation.0))?;

        for (key, sent) in &in_flight.table {
            let Some(entry) = self.pending.get_mut(key) else {
                continue;
            };
            let rest = if entry.revision <= in_flight.revision {
                None
            } else {
                entry.op.rebase(sent)
            };
            match rest {
                Some(rest) => entry.op = rest,
                None if entry.queued.is_empty() => {
                    self.pending.remove(key);
                }
                None => {
                    self.revision += 1;
                    entry.op = entry.queued.remove(0);
                    entry.revision = self.revision;
                }
            }
        }

        Ok(in_flight.table)
    }

    /// Sending `generation` failed: forget it, keep everything pending.
    pub fn rollback(&mut self, generation: Generation) -> Result<()> {
        self.in_flight
            .remove(&generation)
            .map(|_| ())
            .ok_or(Error::UnknownGeneration(generation.0))
    }
}

impl Entry {
    fn operations(&self) -> impl Iterator<Item = &Operation> {
        std::iter::once(&self.op).chain(self.queued.iter())
    }
}

fn unfold(merged: Merged) -> Vec<Operation> {
    match merged {
        Merged::Single(op) => vec![op],
        Merged::Cancelled => Vec::new(),
        Merged::Sequence(first, then) => vec![first, then],
    }
}

fn opposes(head: &Operation, incoming: &Operation) -> bool {
    head.name.is_relation() && incoming.name.is_relation() && head.name != incoming.name
}
