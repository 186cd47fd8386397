//! Registry Store Module
//!
//! Durable storage for nodes and component mappings on an embedded redb
//! database, with a reverse index for component lookups.

pub mod redb_store;
pub mod tables;

pub use redb_store::*;
