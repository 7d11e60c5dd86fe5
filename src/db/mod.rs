//! Resource store: SQLite persistence behind a single-writer actor.
//!
//! Layout:
//! - `schema.rs`: SQL DDL for initializing the database
//! - `models.rs`: revision tokens and CAS preconditions
//! - `sqlite.rs`: transactional reads and compare-and-set writes
//! - `actor.rs`: ractor actor serializing mutations, plus the cloneable handle

pub mod actor;
pub mod models;
pub mod schema;
pub mod sqlite;

pub use actor::{StoreHandle, spawn};
pub use models::{Expected, Revision, UserKey};
pub use sqlite::ResourceStorage;
