//! # Cirrus Client
//!
//! Async client for the Cirrus document store, built on [`cirrus_engine`].
//!
//! The engine decides what to send; this crate sends it. A [`Client`] saves
//! object graphs in dependency order, commits or rolls back each object's
//! ledger as responses arrive, and runs compiled queries whose results are
//! rehydrated through the shared [`Store`](cirrus_engine::Store).
//!
//! ```no_run
//! use cirrus_client::{Client, Config};
//! use cirrus_engine::{Constraint, Query, Store};
//! use std::sync::Arc;
//!
//! # async fn run() -> cirrus_client::Result<()> {
//! let client = Client::new(Config::load()?, Arc::new(Store::default()))?;
//!
//! let person = client.store().create("Person");
//! person.set("name", "Alice")?;
//! client.save(&person).await?;
//!
//! let mut query = Query::new("Person");
//! query.where_key("name", Constraint::EqualTo("Alice".into()));
//! let found = client.find(&query).await?;
//! assert_eq!(found[0], person);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod session;
pub mod transport;

pub use client::Client;
pub use config::{Config, ConfigError};
pub use error::{ClientError, Result};
pub use executor::{Executor, RequestHandle};
pub use session::Session;
pub use transport::{HttpRequest, HttpTransport, Method, Transport};
