//! # Graphmirror - Local relational mirror of a GraphQL object graph
//!
//! Given a declared GraphQL schema and a SQLite connection, graphmirror
//! decomposes GraphQL objects into a schema-driven relational layout that
//! supports incremental, transactional updates and consistent readback.
//!
//! Graphmirror provides:
//! - A closed schema model: object types, union types, four field kinds
//! - A pure schema decomposer partitioning each object's fields into
//!   primitive, link, and connection sequences
//! - A transactional layout initializer gated by a write-once metadata row
//! - A mirror handle for registering objects and ingesting own data and
//!   connection pages

pub mod schema;
pub mod schema_info;
pub mod storage;

// Re-exports for convenient access
pub use schema::{FieldKind, Schema, TypeDecl};
pub use schema_info::SchemaInfo;
pub use storage::{ConnectionPage, ConnectionView, Mirror, OwnData, UpdateId};

/// Result type alias for graphmirror operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for graphmirror operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsafe SQL identifier: {0:?}")]
    UnsafeIdentifier(String),

    #[error("Mirror metadata mismatch: expected {expected:?}, found {found:?}")]
    MetadataMismatch { expected: String, found: String },

    #[error("Malformed schema: {0}")]
    MalformedSchema(String),

    #[error("Unknown object type: {0}")]
    UnknownType(String),

    #[error("Unknown field: {typename}.{fieldname}")]
    UnknownField { typename: String, fieldname: String },

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Object {id} is registered as {existing}, not {requested}")]
    TypenameConflict {
        id: String,
        existing: String,
        requested: String,
    },
}
