//! Schema model - the declared shape of the mirrored object graph
//!
//! A schema maps each type name to either an object type (with named
//! fields) or a union type (with named member clauses). Each object field
//! has one of four kinds:
//! - `Id`: the object's identity; exactly one per object type
//! - `Primitive`: scalar payload stored verbatim
//! - `Node`: a singular link to another object (or union)
//! - `Connection`: a paginated, ordered edge set
//!
//! Field sets are data, not types: they are ordered name-to-kind mappings
//! whose iteration order is the declaration order, so that everything
//! derived from a schema is deterministic.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The kind of a single object field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldKind {
    /// The object's identity field
    Id,
    /// Scalar payload (string, number, boolean, null)
    Primitive,
    /// Singular reference to another object or union
    Node { target: String },
    /// Paginated edge set of objects or unions
    Connection { element: String },
}

impl FieldKind {
    /// A node link to the named target type
    pub fn node(target: impl Into<String>) -> Self {
        FieldKind::Node {
            target: target.into(),
        }
    }

    /// A connection whose entries are of the named element type
    pub fn connection(element: impl Into<String>) -> Self {
        FieldKind::Connection {
            element: element.into(),
        }
    }
}

/// Declaration of a single named type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeDecl {
    /// An object type with named, ordered fields
    Object { fields: IndexMap<String, FieldKind> },
    /// A union type whose clauses name its object-type members
    Union { clauses: IndexMap<String, ()> },
}

impl TypeDecl {
    /// An object type from `(fieldname, kind)` pairs, in declaration order
    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, FieldKind)>,
    {
        TypeDecl::Object {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// A union type from its clause names, in declaration order
    pub fn union<K, I>(clauses: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = K>,
    {
        TypeDecl::Union {
            clauses: clauses.into_iter().map(|k| (k.into(), ())).collect(),
        }
    }
}

/// A declared schema: an ordered mapping from type name to declaration.
///
/// The schema is read-only input to the mirror; it is serialized (in
/// canonical form) into the database's metadata row and must therefore be
/// byte-stable under serde round-trips.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    pub types: IndexMap<String, TypeDecl>,
}

impl Schema {
    /// Build a schema from `(typename, declaration)` pairs
    pub fn new<K, I>(types: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, TypeDecl)>,
    {
        Schema {
            types: types.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_construction() {
        let schema = Schema::new([
            (
                "Issue",
                TypeDecl::object([
                    ("id", FieldKind::Id),
                    ("title", FieldKind::Primitive),
                    ("author", FieldKind::node("User")),
                    ("comments", FieldKind::connection("Comment")),
                ]),
            ),
            ("Actor", TypeDecl::union(["User", "Bot"])),
        ]);

        assert_eq!(schema.types.len(), 2);
        match &schema.types["Issue"] {
            TypeDecl::Object { fields } => {
                assert_eq!(fields["author"], FieldKind::node("User"));
                let names: Vec<&str> = fields.keys().map(String::as_str).collect();
                assert_eq!(names, ["id", "title", "author", "comments"]);
            }
            other => panic!("expected object type, got {:?}", other),
        }
        match &schema.types["Actor"] {
            TypeDecl::Union { clauses } => {
                let names: Vec<&str> = clauses.keys().map(String::as_str).collect();
                assert_eq!(names, ["User", "Bot"]);
            }
            other => panic!("expected union type, got {:?}", other),
        }
    }

    #[test]
    fn test_serde_roundtrip() {
        let schema = Schema::new([
            (
                "User",
                TypeDecl::object([("id", FieldKind::Id), ("login", FieldKind::Primitive)]),
            ),
            ("Actor", TypeDecl::union(["User"])),
        ]);

        let json = serde_json::to_string(&schema).unwrap();
        let parsed: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, schema);
    }

    #[test]
    fn test_serialized_shape() {
        let decl = TypeDecl::object([("id", FieldKind::Id), ("author", FieldKind::node("User"))]);
        let value = serde_json::to_value(&decl).unwrap();
        assert_eq!(value["kind"], "OBJECT");
        assert_eq!(value["fields"]["id"]["kind"], "ID");
        assert_eq!(value["fields"]["author"]["kind"], "NODE");
        assert_eq!(value["fields"]["author"]["target"], "User");

        let union = TypeDecl::union(["User", "Bot"]);
        let value = serde_json::to_value(&union).unwrap();
        assert_eq!(value["kind"], "UNION");
        assert!(value["clauses"]["User"].is_null());
    }
}
