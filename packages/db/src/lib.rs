//! Versioned document store boundary for the job queue.
//!
//! The queue never talks to a database directly. It goes through
//! [`DocumentStore`], which offers four operations: index a new document,
//! get one by id, search a type within an index, and update a document only
//! if its version still matches what the caller last observed.
//!
//! Two implementations ship here:
//! - [`MemoryStore`]: process-local, for tests and single-process use
//! - [`SurrealStore`]: SurrealDB, in-memory or file-backed
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod error;
mod memory;
mod query;
mod schema;
mod store;
mod surreal;

pub use connection::{Database, DbConfig, connect};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use query::{Filter, SearchQuery, Sort};
pub use store::{DocumentStore, Indexed, StoredDocument, Version};
pub use surreal::SurrealStore;
