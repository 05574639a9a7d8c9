//! Mirror handle - registration, ingestion, and readback over the layout

use indexmap::IndexMap;
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde_json::Value;

use crate::schema::Schema;
use crate::schema_info::{decompose, ObjectTypeInfo, SchemaInfo};
use crate::storage::layout;
use crate::storage::tx::in_transaction;
use crate::{Error, Result};

/// Identifier of one ingestion event in the `updates` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpdateId(i64);

/// Own data of a single object: its primitive payloads and link targets.
///
/// A `None` primitive means the column has never been fetched; a fetched
/// JSON `null` reads back as `Some(Value::Null)`. A `None` link is either
/// unfetched or unresolved.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnData {
    pub typename: String,
    pub primitives: IndexMap<String, Option<Value>>,
    pub links: IndexMap<String, Option<String>>,
}

/// One fetched page of a connection, to be appended to the mirror.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionPage {
    pub total_count: i64,
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
    /// Object ids of the page's entries; each must already be registered
    pub entries: Vec<String>,
}

/// Pagination state and ordered entries of a mirrored connection.
///
/// All three state fields are `None` until the connection is first
/// updated.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionView {
    pub total_count: Option<i64>,
    pub has_next_page: Option<bool>,
    pub end_cursor: Option<String>,
    pub entries: Vec<String>,
}

/// The mirror of a GraphQL object graph in a SQLite database.
///
/// Owns its connection exclusively for its lifetime. Construction brings
/// the database into the mirrored layout (or verifies it); all ingestion
/// and readback goes through the handle, each operation in its own
/// transaction.
pub struct Mirror {
    conn: Connection,
    info: SchemaInfo,
}

impl Mirror {
    /// Construct a mirror for `schema` over `conn`, initializing the
    /// layout if the database is fresh.
    pub fn new(conn: Connection, schema: &Schema) -> Result<Self> {
        let info = decompose(schema)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        layout::initialize(&conn, schema, &info)?;
        Ok(Self { conn, info })
    }

    /// The decomposed schema this mirror was constructed with.
    pub fn schema_info(&self) -> &SchemaInfo {
        &self.info
    }

    /// Record an ingestion event at the given time (integer milliseconds
    /// since the Unix epoch) and return its id.
    pub fn create_update(&self, time_epoch_millis: i64) -> Result<UpdateId> {
        self.conn.execute(
            "INSERT INTO updates (time_epoch_millis) VALUES (?1)",
            params![time_epoch_millis],
        )?;
        Ok(UpdateId(self.conn.last_insert_rowid()))
    }

    /// Record that an object of the given type exists, creating its blank
    /// field slots: one `links` row per link field, one `connections` row
    /// per connection field, and its primitives row.
    ///
    /// Idempotent when the object is already registered with the same
    /// typename; registering it under a different typename is an error.
    pub fn register_object(&self, typename: &str, id: &str) -> Result<()> {
        let object = self.object_type(typename)?;
        in_transaction(&self.conn, |conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT typename FROM objects WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(existing) = existing {
                if existing == typename {
                    return Ok(());
                }
                return Err(Error::TypenameConflict {
                    id: id.to_string(),
                    existing,
                    requested: typename.to_string(),
                });
            }

            conn.execute(
                "INSERT INTO objects (id, typename, last_update) VALUES (?1, ?2, NULL)",
                params![id, typename],
            )?;
            let mut link_stmt = conn
                .prepare("INSERT INTO links (parent_id, fieldname, child_id) VALUES (?1, ?2, NULL)")?;
            for fieldname in &object.link_field_names {
                link_stmt.execute(params![id, fieldname])?;
            }
            let mut connection_stmt = conn.prepare(
                "INSERT INTO connections (object_id, fieldname, last_update, total_count, has_next_page, end_cursor) \
                 VALUES (?1, ?2, NULL, NULL, NULL, NULL)",
            )?;
            for fieldname in &object.connection_field_names {
                connection_stmt.execute(params![id, fieldname])?;
            }
            conn.execute(
                &format!("INSERT INTO primitives_{typename} (id) VALUES (?1)"),
                params![id],
            )?;
            Ok(())
        })
    }

    /// Store own data for a registered object and advance its
    /// `last_update`.
    ///
    /// Partial: only the supplied primitive and link fields are written.
    /// Primitive values are stored as canonical JSON text; a `None` link
    /// marks the reference as unresolved. Every supplied link target must
    /// itself be registered.
    pub fn put_own_data(
        &self,
        update: UpdateId,
        id: &str,
        primitives: &IndexMap<String, Value>,
        links: &IndexMap<String, Option<String>>,
    ) -> Result<()> {
        in_transaction(&self.conn, |conn| {
            let typename = self
                .typename_of(id)?
                .ok_or_else(|| Error::ObjectNotFound(id.to_string()))?;
            let object = self.object_type(&typename)?;
            for fieldname in primitives.keys() {
                if !object.primitive_field_names.contains(fieldname) {
                    return Err(Error::UnknownField {
                        typename: typename.clone(),
                        fieldname: fieldname.clone(),
                    });
                }
            }
            for fieldname in links.keys() {
                if !object.link_field_names.contains(fieldname) {
                    return Err(Error::UnknownField {
                        typename: typename.clone(),
                        fieldname: fieldname.clone(),
                    });
                }
            }

            if !primitives.is_empty() {
                let assignments: Vec<String> = primitives
                    .keys()
                    .map(|fieldname| format!("\"{fieldname}\" = ?"))
                    .collect();
                let sql = format!(
                    "UPDATE primitives_{typename} SET {} WHERE id = ?",
                    assignments.join(", ")
                );
                let encoded: Vec<String> = primitives
                    .values()
                    .map(serde_json::to_string)
                    .collect::<std::result::Result<_, _>>()?;
                let mut bind: Vec<&dyn ToSql> =
                    encoded.iter().map(|text| text as &dyn ToSql).collect();
                bind.push(&id);
                conn.execute(&sql, &bind[..])?;
            }

            let mut link_stmt = conn
                .prepare("UPDATE links SET child_id = ?1 WHERE parent_id = ?2 AND fieldname = ?3")?;
            for (fieldname, child) in links {
                link_stmt.execute(params![child, id, fieldname])?;
            }

            conn.execute(
                "UPDATE objects SET last_update = ?1 WHERE id = ?2",
                params![update.0, id],
            )?;
            Ok(())
        })
    }

    /// Record one fetched page of a connection: replace its pagination
    /// state and append the page's entries after the current highest
    /// index.
    pub fn update_connection(
        &self,
        update: UpdateId,
        id: &str,
        fieldname: &str,
        page: &ConnectionPage,
    ) -> Result<()> {
        in_transaction(&self.conn, |conn| {
            let connection_id = self.connection_rowid(id, fieldname)?;
            conn.execute(
                "UPDATE connections SET last_update = ?1, total_count = ?2, has_next_page = ?3, end_cursor = ?4 \
                 WHERE rowid = ?5",
                params![
                    update.0,
                    page.total_count,
                    page.has_next_page,
                    page.end_cursor,
                    connection_id
                ],
            )?;

            let next_idx: i64 = conn.query_row(
                "SELECT COALESCE(MAX(idx) + 1, 0) FROM connection_entries WHERE connection_id = ?1",
                params![connection_id],
                |row| row.get(0),
            )?;
            let mut entry_stmt = conn.prepare(
                "INSERT INTO connection_entries (connection_id, idx, child_id) VALUES (?1, ?2, ?3)",
            )?;
            for (offset, child) in page.entries.iter().enumerate() {
                entry_stmt.execute(params![connection_id, next_idx + offset as i64, child])?;
            }
            Ok(())
        })
    }

    /// Get the typename a registered object was recorded with.
    pub fn typename_of(&self, id: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT typename FROM objects WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Read back an object's own data, in schema field order. Returns
    /// `None` for an unregistered object.
    pub fn own_data(&self, id: &str) -> Result<Option<OwnData>> {
        let Some(typename) = self.typename_of(id)? else {
            return Ok(None);
        };
        let object = self.object_type(&typename)?;

        let mut primitives = IndexMap::new();
        if !object.primitive_field_names.is_empty() {
            let columns: Vec<String> = object
                .primitive_field_names
                .iter()
                .map(|fieldname| format!("\"{fieldname}\""))
                .collect();
            let sql = format!(
                "SELECT {} FROM primitives_{typename} WHERE id = ?1",
                columns.join(", ")
            );
            let count = object.primitive_field_names.len();
            let raw: Vec<Option<String>> = self.conn.query_row(&sql, params![id], |row| {
                (0..count).map(|i| row.get(i)).collect()
            })?;
            for (fieldname, text) in object.primitive_field_names.iter().zip(raw) {
                let value = match text {
                    Some(text) => Some(serde_json::from_str(&text)?),
                    None => None,
                };
                primitives.insert(fieldname.clone(), value);
            }
        }

        let mut links = IndexMap::new();
        let mut link_stmt = self
            .conn
            .prepare("SELECT child_id FROM links WHERE parent_id = ?1 AND fieldname = ?2")?;
        for fieldname in &object.link_field_names {
            let child: Option<String> =
                link_stmt.query_row(params![id, fieldname], |row| row.get(0))?;
            links.insert(fieldname.clone(), child);
        }

        Ok(Some(OwnData {
            typename,
            primitives,
            links,
        }))
    }

    /// Read back a connection's pagination state and its ordered entries.
    pub fn connection(&self, id: &str, fieldname: &str) -> Result<ConnectionView> {
        let connection_id = self.connection_rowid(id, fieldname)?;
        let (total_count, has_next_page, end_cursor) = self.conn.query_row(
            "SELECT total_count, has_next_page, end_cursor FROM connections WHERE rowid = ?1",
            params![connection_id],
            |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?,
                    row.get::<_, Option<bool>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )?;

        let mut entry_stmt = self.conn.prepare(
            "SELECT child_id FROM connection_entries WHERE connection_id = ?1 ORDER BY idx",
        )?;
        let entries = entry_stmt
            .query_map(params![connection_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(ConnectionView {
            total_count,
            has_next_page,
            end_cursor,
            entries,
        })
    }

    fn object_type(&self, typename: &str) -> Result<&ObjectTypeInfo> {
        self.info
            .object_types
            .get(typename)
            .ok_or_else(|| Error::UnknownType(typename.to_string()))
    }

    fn connection_rowid(&self, id: &str, fieldname: &str) -> Result<i64> {
        let rowid: Option<i64> = self
            .conn
            .query_row(
                "SELECT rowid FROM connections WHERE object_id = ?1 AND fieldname = ?2",
                params![id, fieldname],
                |row| row.get(0),
            )
            .optional()?;
        match rowid {
            Some(rowid) => Ok(rowid),
            None => match self.typename_of(id)? {
                None => Err(Error::ObjectNotFound(id.to_string())),
                Some(typename) => Err(Error::UnknownField {
                    typename,
                    fieldname: fieldname.to_string(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldKind, Schema, TypeDecl};
    use indexmap::indexmap;
    use serde_json::json;

    fn issue_schema() -> Schema {
        Schema::new([
            (
                "Issue",
                TypeDecl::object([
                    ("id", FieldKind::Id),
                    ("title", FieldKind::Primitive),
                    ("author", FieldKind::node("User")),
                    ("comments", FieldKind::connection("Comment")),
                ]),
            ),
            (
                "User",
                TypeDecl::object([("id", FieldKind::Id), ("login", FieldKind::Primitive)]),
            ),
            (
                "Comment",
                TypeDecl::object([("id", FieldKind::Id), ("body", FieldKind::Primitive)]),
            ),
            ("Actor", TypeDecl::union(["User"])),
        ])
    }

    fn issue_mirror() -> Mirror {
        let conn = Connection::open_in_memory().unwrap();
        Mirror::new(conn, &issue_schema()).unwrap()
    }

    #[test]
    fn test_register_and_typename() {
        let mirror = issue_mirror();
        mirror.register_object("Issue", "issue:1").unwrap();

        assert_eq!(
            mirror.typename_of("issue:1").unwrap().as_deref(),
            Some("Issue")
        );
        assert_eq!(mirror.typename_of("issue:2").unwrap(), None);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mirror = issue_mirror();
        mirror.register_object("Issue", "issue:1").unwrap();
        mirror.register_object("Issue", "issue:1").unwrap();

        let count: i64 = mirror
            .conn
            .query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_register_typename_conflict() {
        let mirror = issue_mirror();
        mirror.register_object("Issue", "thing:1").unwrap();

        let err = mirror.register_object("User", "thing:1").unwrap_err();
        assert!(matches!(err, Error::TypenameConflict { .. }), "{err:?}");
    }

    #[test]
    fn test_register_unknown_or_union_type() {
        let mirror = issue_mirror();
        assert!(matches!(
            mirror.register_object("Ghost", "g:1"),
            Err(Error::UnknownType(_))
        ));
        // Unions have instances only through their clauses.
        assert!(matches!(
            mirror.register_object("Actor", "a:1"),
            Err(Error::UnknownType(_))
        ));
    }

    #[test]
    fn test_register_creates_blank_slots() {
        let mirror = issue_mirror();
        mirror.register_object("Issue", "issue:1").unwrap();

        let data = mirror.own_data("issue:1").unwrap().unwrap();
        assert_eq!(data.typename, "Issue");
        assert_eq!(data.primitives, indexmap! {"title".to_string() => None});
        assert_eq!(data.links, indexmap! {"author".to_string() => None});

        let view = mirror.connection("issue:1", "comments").unwrap();
        assert_eq!(view.total_count, None);
        assert_eq!(view.has_next_page, None);
        assert_eq!(view.end_cursor, None);
        assert!(view.entries.is_empty());
    }

    #[test]
    fn test_own_data_roundtrip() {
        let mirror = issue_mirror();
        mirror.register_object("Issue", "issue:1").unwrap();
        mirror.register_object("User", "user:alice").unwrap();

        let update = mirror.create_update(1_700_000_000_000).unwrap();
        mirror
            .put_own_data(
                update,
                "issue:1",
                &indexmap! {"title".to_string() => json!("Fix the flux capacitor")},
                &indexmap! {"author".to_string() => Some("user:alice".to_string())},
            )
            .unwrap();

        let data = mirror.own_data("issue:1").unwrap().unwrap();
        assert_eq!(
            data.primitives["title"],
            Some(json!("Fix the flux capacitor"))
        );
        assert_eq!(data.links["author"].as_deref(), Some("user:alice"));

        let last_update: Option<i64> = mirror
            .conn
            .query_row(
                "SELECT last_update FROM objects WHERE id = 'issue:1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(last_update.is_some());
    }

    #[test]
    fn test_fetched_null_is_not_unfetched() {
        let mirror = issue_mirror();
        mirror.register_object("User", "user:alice").unwrap();

        let update = mirror.create_update(0).unwrap();
        mirror
            .put_own_data(
                update,
                "user:alice",
                &indexmap! {"login".to_string() => Value::Null},
                &IndexMap::new(),
            )
            .unwrap();

        let data = mirror.own_data("user:alice").unwrap().unwrap();
        assert_eq!(data.primitives["login"], Some(Value::Null));
    }

    #[test]
    fn test_own_data_preserves_json_types() {
        let schema = Schema::new([(
            "Sample",
            TypeDecl::object([
                ("id", FieldKind::Id),
                ("count", FieldKind::Primitive),
                ("flag", FieldKind::Primitive),
            ]),
        )]);
        let mirror = Mirror::new(Connection::open_in_memory().unwrap(), &schema).unwrap();
        mirror.register_object("Sample", "s:1").unwrap();

        let update = mirror.create_update(0).unwrap();
        mirror
            .put_own_data(
                update,
                "s:1",
                &indexmap! {
                    "count".to_string() => json!(17),
                    "flag".to_string() => json!(true),
                },
                &IndexMap::new(),
            )
            .unwrap();

        let data = mirror.own_data("s:1").unwrap().unwrap();
        assert_eq!(data.primitives["count"], Some(json!(17)));
        assert_eq!(data.primitives["flag"], Some(json!(true)));
    }

    #[test]
    fn test_put_own_data_rejects_unknown_field() {
        let mirror = issue_mirror();
        mirror.register_object("Issue", "issue:1").unwrap();

        let update = mirror.create_update(0).unwrap();
        let err = mirror
            .put_own_data(
                update,
                "issue:1",
                &indexmap! {"body".to_string() => json!("nope")},
                &IndexMap::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnknownField { .. }), "{err:?}");
    }

    #[test]
    fn test_put_own_data_rejects_unregistered_object() {
        let mirror = issue_mirror();
        let update = mirror.create_update(0).unwrap();
        let err = mirror
            .put_own_data(update, "issue:404", &IndexMap::new(), &IndexMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::ObjectNotFound(_)), "{err:?}");
    }

    #[test]
    fn test_unresolved_link() {
        let mirror = issue_mirror();
        mirror.register_object("Issue", "issue:1").unwrap();

        let update = mirror.create_update(0).unwrap();
        mirror
            .put_own_data(
                update,
                "issue:1",
                &IndexMap::new(),
                &indexmap! {"author".to_string() => None},
            )
            .unwrap();

        let data = mirror.own_data("issue:1").unwrap().unwrap();
        assert_eq!(data.links["author"], None);
    }

    #[test]
    fn test_link_to_unregistered_child_fails() {
        let mirror = issue_mirror();
        mirror.register_object("Issue", "issue:1").unwrap();

        let update = mirror.create_update(0).unwrap();
        let result = mirror.put_own_data(
            update,
            "issue:1",
            &IndexMap::new(),
            &indexmap! {"author".to_string() => Some("user:ghost".to_string())},
        );
        assert!(matches!(result, Err(Error::Storage(_))), "{result:?}");
    }

    #[test]
    fn test_connection_pages_append() {
        let mirror = issue_mirror();
        mirror.register_object("Issue", "issue:1").unwrap();
        for comment in ["comment:1", "comment:2", "comment:3"] {
            mirror.register_object("Comment", comment).unwrap();
        }

        let update = mirror.create_update(0).unwrap();
        mirror
            .update_connection(
                update,
                "issue:1",
                "comments",
                &ConnectionPage {
                    total_count: 3,
                    has_next_page: true,
                    end_cursor: Some("cursor:2".to_string()),
                    entries: vec!["comment:1".to_string(), "comment:2".to_string()],
                },
            )
            .unwrap();
        mirror
            .update_connection(
                update,
                "issue:1",
                "comments",
                &ConnectionPage {
                    total_count: 3,
                    has_next_page: false,
                    end_cursor: Some("cursor:3".to_string()),
                    entries: vec!["comment:3".to_string()],
                },
            )
            .unwrap();

        let view = mirror.connection("issue:1", "comments").unwrap();
        assert_eq!(view.total_count, Some(3));
        assert_eq!(view.has_next_page, Some(false));
        assert_eq!(view.end_cursor.as_deref(), Some("cursor:3"));
        assert_eq!(view.entries, ["comment:1", "comment:2", "comment:3"]);
    }

    #[test]
    fn test_empty_connection_update() {
        let mirror = issue_mirror();
        mirror.register_object("Issue", "issue:1").unwrap();

        let update = mirror.create_update(0).unwrap();
        mirror
            .update_connection(
                update,
                "issue:1",
                "comments",
                &ConnectionPage {
                    total_count: 0,
                    has_next_page: false,
                    end_cursor: None,
                    entries: Vec::new(),
                },
            )
            .unwrap();

        let view = mirror.connection("issue:1", "comments").unwrap();
        assert_eq!(view.total_count, Some(0));
        assert_eq!(view.has_next_page, Some(false));
        assert_eq!(view.end_cursor, None);
        assert!(view.entries.is_empty());
    }

    #[test]
    fn test_connection_entry_must_be_registered() {
        let mirror = issue_mirror();
        mirror.register_object("Issue", "issue:1").unwrap();

        let update = mirror.create_update(0).unwrap();
        let result = mirror.update_connection(
            update,
            "issue:1",
            "comments",
            &ConnectionPage {
                total_count: 1,
                has_next_page: false,
                end_cursor: Some("c".to_string()),
                entries: vec!["comment:ghost".to_string()],
            },
        );
        assert!(matches!(result, Err(Error::Storage(_))), "{result:?}");

        // The failed page left nothing behind.
        let view = mirror.connection("issue:1", "comments").unwrap();
        assert_eq!(view.total_count, None);
        assert!(view.entries.is_empty());
    }

    #[test]
    fn test_connection_on_unknown_field_or_object() {
        let mirror = issue_mirror();
        mirror.register_object("Issue", "issue:1").unwrap();

        assert!(matches!(
            mirror.connection("issue:1", "reviews"),
            Err(Error::UnknownField { .. })
        ));
        assert!(matches!(
            mirror.connection("issue:404", "comments"),
            Err(Error::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_create_update_records_time() {
        let mirror = issue_mirror();
        let update = mirror.create_update(1_234_567).unwrap();

        let millis: i64 = mirror
            .conn
            .query_row(
                "SELECT time_epoch_millis FROM updates WHERE rowid = ?1",
                params![update.0],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(millis, 1_234_567);
    }
}
