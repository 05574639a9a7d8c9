//! Storage layer - SQLite-backed mirror persistence
//!
//! System of record is SQLite with tables:
//! - meta(zero, schema): write-once compatibility blob
//! - updates(time_epoch_millis): one row per ingestion event
//! - objects(id, typename, last_update)
//! - links(parent_id, fieldname, child_id)
//! - connections(object_id, fieldname, last_update, total_count, has_next_page, end_cursor)
//! - connection_entries(connection_id, idx, child_id)
//! - primitives_<Typename>(id, one column per primitive field)

pub mod layout;
pub mod mirror;
pub mod tx;

pub use mirror::{ConnectionPage, ConnectionView, Mirror, OwnData, UpdateId};
pub use tx::in_transaction;
