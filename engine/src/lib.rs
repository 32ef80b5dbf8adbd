//! # Cirrus Engine
//!
//! The synchronous core of a client for a remote document store.
//!
//! This crate keeps local object graphs, tracks exactly what changed since the
//! last successful save, turns those changes into ordered save requests and
//! compiles query constraints into the backend's filter format. It performs
//! no IO: sending requests belongs to the client crate.
//!
//! ## Core Concepts
//!
//! ### Values
//!
//! Every storable datum is a [`Value`]: null, booleans, numbers, strings,
//! arrays, maps, dates, bytes, geo points, pointers and relations. Values
//! have a `__type`-tagged JSON wire form.
//!
//! ### Operations
//!
//! Mutations are [`Operation`]s (`Set`, `Delete`, `Increment`, `Add`,
//! `AddUnique`, `Remove`, `AddRelation`, `RemoveRelation`). Each object keeps
//! a ledger with at most one pending operation per key; a new operation on a
//! key is [`merge`]d with the pending one. Relation changes that no single
//! operation can carry are queued and sent by a later request.
//!
//! ### Requests
//!
//! [`build_requests`] walks the graph reachable from an object and returns one
//! [`Request`] per object with something to send, children before the
//! parents that point at them. Each request carries a ledger [`Generation`]
//! that is committed or rolled back once the backend answers.
//!
//! ### Queries
//!
//! A [`Query`] collects per-key [`Constraint`]s and compiles to a
//! [`CompiledQuery`].
//!
//! ## Quick Start
//!
//! ```rust
//! use cirrus_engine::{build_deep_requests, Constraint, Query, Store};
//!
//! let store = Store::default();
//! let parent = store.create("Person");
//! let child = store.create("Person");
//! parent.set("name", "parent").unwrap();
//! parent.set("friend", &child).unwrap();
//!
//! let requests = build_deep_requests(&store, &parent).unwrap();
//! assert_eq!(requests.len(), 2);
//! assert_eq!(requests[0].object(), &child);
//!
//! let mut query = Query::new("Person");
//! query.where_key("name", Constraint::EqualTo("parent".into()));
//! assert_eq!(query.compile().where_["name"], "parent");
//! ```

pub mod error;
pub mod ledger;
pub mod object;
pub mod operation;
pub mod query;
pub mod request;
pub mod schema;
pub mod store;
pub mod value;

// Re-export main types at crate root
pub use error::{Error, Result};
pub use ledger::{Generation, Ledger, OperationTable};
pub use object::{LocalId, Object, SaveOutcome, RESERVED_KEYS};
pub use operation::{merge, Merged, Operation, OperationName};
pub use query::{CompiledQuery, Constraint, Distance, DistanceUnit, Query};
pub use request::{build_deep_requests, build_requests, build_shallow_requests, Request};
pub use schema::{ClassSchema, FieldDef, FieldSchema, Schema};
pub use store::Store;
pub use value::{parse_date, to_value, GeoPoint, Pointer, Relation, Value, ValueKind};

/// Type aliases for clarity
pub type ClassName = String;
pub type ObjectId = String;
