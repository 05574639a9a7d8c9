//! Mirror layout - structural DDL and the metadata gate
//!
//! The layout is created once per database, under a single transaction,
//! gated by the write-once `meta` row pinning the (format version, schema)
//! pair. Re-opening an existing database verifies the metadata blob and
//! issues no DDL; a differing blob is a hard error.

use rusqlite::{params, Connection, OptionalExtension};

use crate::schema::Schema;
use crate::schema_info::SchemaInfo;
use crate::storage::tx::in_transaction;
use crate::{Error, Result};

/// Format-compatibility token stored in the metadata blob. Bump on any
/// change to the schema decomposition or the relational layout.
pub const FORMAT_VERSION: &str = "MIRROR_v1";

/// SQL to create the metadata singleton
const CREATE_META_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    zero INTEGER PRIMARY KEY CHECK (zero = 0),
    schema TEXT NOT NULL
)
"#;

/// SQL to create the updates table
const CREATE_UPDATES_TABLE: &str = r#"
CREATE TABLE updates (
    rowid INTEGER PRIMARY KEY,
    time_epoch_millis INTEGER NOT NULL
)
"#;

/// SQL to create the objects table
const CREATE_OBJECTS_TABLE: &str = r#"
CREATE TABLE objects (
    id TEXT NOT NULL PRIMARY KEY,
    typename TEXT NOT NULL,
    last_update INTEGER,
    FOREIGN KEY(last_update) REFERENCES updates(rowid)
)
"#;

/// SQL to create the links table
const CREATE_LINKS_TABLE: &str = r#"
CREATE TABLE links (
    rowid INTEGER PRIMARY KEY,
    parent_id TEXT NOT NULL,
    fieldname TEXT NOT NULL,
    child_id TEXT,
    FOREIGN KEY(parent_id) REFERENCES objects(id),
    FOREIGN KEY(child_id) REFERENCES objects(id)
)
"#;

const CREATE_LINKS_INDEX: &str =
    "CREATE UNIQUE INDEX idx_links_parent_fieldname ON links(parent_id, fieldname)";

/// SQL to create the connections table. A connection that has never been
/// updated has all-NULL pagination state; once updated, only the end
/// cursor may still be NULL (empty connection).
const CREATE_CONNECTIONS_TABLE: &str = r#"
CREATE TABLE connections (
    rowid INTEGER PRIMARY KEY,
    object_id TEXT NOT NULL,
    fieldname TEXT NOT NULL,
    last_update INTEGER,
    total_count INTEGER,
    has_next_page BOOLEAN,
    end_cursor TEXT,
    CHECK ((last_update IS NULL) = (total_count IS NULL)),
    CHECK ((last_update IS NULL) = (has_next_page IS NULL)),
    CHECK ((last_update IS NULL) <= (end_cursor IS NULL)),
    FOREIGN KEY(object_id) REFERENCES objects(id),
    FOREIGN KEY(last_update) REFERENCES updates(rowid)
)
"#;

const CREATE_CONNECTIONS_INDEX: &str =
    "CREATE UNIQUE INDEX idx_connections_object_fieldname ON connections(object_id, fieldname)";

/// SQL to create the connection_entries table
const CREATE_CONNECTION_ENTRIES_TABLE: &str = r#"
CREATE TABLE connection_entries (
    rowid INTEGER PRIMARY KEY,
    connection_id INTEGER NOT NULL,
    idx INTEGER NOT NULL,
    child_id TEXT NOT NULL,
    FOREIGN KEY(connection_id) REFERENCES connections(rowid),
    FOREIGN KEY(child_id) REFERENCES objects(id)
)
"#;

const CREATE_CONNECTION_ENTRIES_INDEX: &str =
    "CREATE UNIQUE INDEX idx_connection_entries_connection_idx ON connection_entries(connection_id, idx)";

/// Structural statements, in dependency order: foreign-key targets must
/// exist before the tables that reference them.
const STRUCTURAL_STATEMENTS: &[&str] = &[
    CREATE_UPDATES_TABLE,
    CREATE_OBJECTS_TABLE,
    CREATE_LINKS_TABLE,
    CREATE_LINKS_INDEX,
    CREATE_CONNECTIONS_TABLE,
    CREATE_CONNECTIONS_INDEX,
    CREATE_CONNECTION_ENTRIES_TABLE,
    CREATE_CONNECTION_ENTRIES_INDEX,
];

/// Whether `s` may be interpolated into DDL as an identifier.
///
/// Deliberately conservative: only `[A-Za-z0-9_]+`. Full SQL identifier
/// quoting is easy to get wrong, so anything else is rejected outright.
pub fn is_sql_safe(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Canonical metadata blob for `schema`: the canonical-JSON serialization
/// of `{schema, version}`, byte-stable under key reordering of the input.
pub fn meta_blob(schema: &Schema) -> Result<String> {
    let mut doc = serde_json::Map::new();
    doc.insert("schema".to_string(), serde_json::to_value(schema)?);
    doc.insert(
        "version".to_string(),
        serde_json::Value::String(FORMAT_VERSION.to_string()),
    );
    Ok(serde_json::Value::Object(doc).to_string())
}

fn primitives_table_name(typename: &str) -> String {
    format!("primitives_{typename}")
}

fn primitives_table_ddl(typename: &str, primitive_field_names: &[String]) -> String {
    let mut columns = vec!["id TEXT NOT NULL PRIMARY KEY".to_string()];
    columns.extend(
        primitive_field_names
            .iter()
            .map(|fieldname| format!("\"{fieldname}\" TEXT")),
    );
    columns.push("FOREIGN KEY(id) REFERENCES objects(id)".to_string());
    format!(
        "CREATE TABLE {} (\n    {}\n)",
        primitives_table_name(typename),
        columns.join(",\n    ")
    )
}

/// Atomically bring `conn` into a state where `schema` is mirrored, or
/// fail and leave the database unmodified.
///
/// On a fresh database this creates the structural tables and one
/// primitives table per object type, and records the canonical metadata
/// blob. On a previously initialized database it verifies the blob and
/// performs no DDL; a differing blob fails with
/// [`Error::MetadataMismatch`]. Identifier-unsafe type or field names fail
/// before any DDL runs.
pub fn initialize(conn: &Connection, schema: &Schema, info: &SchemaInfo) -> Result<()> {
    for (typename, object) in &info.object_types {
        if !is_sql_safe(typename) {
            return Err(Error::UnsafeIdentifier(typename.clone()));
        }
        for fieldname in &object.primitive_field_names {
            if !is_sql_safe(fieldname) {
                return Err(Error::UnsafeIdentifier(fieldname.clone()));
            }
        }
    }

    let blob = meta_blob(schema)?;
    in_transaction(conn, |conn| {
        conn.execute(CREATE_META_TABLE, [])?;
        let existing: Option<String> = conn
            .query_row("SELECT schema FROM meta WHERE zero = 0", [], |row| {
                row.get(0)
            })
            .optional()?;
        match existing {
            Some(found) if found == blob => {
                tracing::debug!("mirror layout already initialized");
                return Ok(());
            }
            Some(found) => {
                tracing::warn!("mirror metadata mismatch on existing database");
                return Err(Error::MetadataMismatch {
                    expected: blob,
                    found,
                });
            }
            None => {}
        }
        conn.execute("INSERT INTO meta (zero, schema) VALUES (0, ?1)", params![blob])?;

        for statement in STRUCTURAL_STATEMENTS {
            conn.execute(statement, [])?;
        }
        for (typename, object) in &info.object_types {
            conn.execute(
                &primitives_table_ddl(typename, &object.primitive_field_names),
                [],
            )?;
        }
        tracing::debug!(
            object_types = info.object_types.len(),
            "created mirror layout"
        );
        Ok(())
    })
}
