//! Schema decomposition - derived, immutable view of a declared schema
//!
//! Partitions each object type's fields into three disjoint ordered
//! sequences (primitive, link, connection) that drive table construction
//! and ingestion. Derived once per schema; pure, no I/O.

use indexmap::IndexMap;

use crate::schema::{FieldKind, Schema, TypeDecl};
use crate::{Error, Result};

/// Decomposed view of a single object type.
///
/// The three field-name sequences are pairwise disjoint and, together with
/// the id field, cover the type's whole field set. Sequence order is the
/// declaration order of the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTypeInfo {
    /// All declared fields, including the id field
    pub fields: IndexMap<String, FieldKind>,
    /// Name of the type's one id field
    pub id_field_name: String,
    pub primitive_field_names: Vec<String>,
    pub link_field_names: Vec<String>,
    pub connection_field_names: Vec<String>,
}

/// Decomposed view of a single union type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnionTypeInfo {
    /// Member clause names, in declaration order
    pub clauses: Vec<String>,
}

/// Decomposed view of a whole schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaInfo {
    pub object_types: IndexMap<String, ObjectTypeInfo>,
    pub union_types: IndexMap<String, UnionTypeInfo>,
}

/// Derive a [`SchemaInfo`] from a declared schema.
///
/// Fails on malformed input: an object type without exactly one id field,
/// a node target or connection element naming an undeclared type, or a
/// union clause that is not a declared object type.
pub fn decompose(schema: &Schema) -> Result<SchemaInfo> {
    let mut object_types = IndexMap::new();
    let mut union_types = IndexMap::new();

    for (typename, decl) in &schema.types {
        match decl {
            TypeDecl::Object { fields } => {
                let mut id_field = None;
                let mut primitive_field_names = Vec::new();
                let mut link_field_names = Vec::new();
                let mut connection_field_names = Vec::new();

                for (fieldname, kind) in fields {
                    match kind {
                        FieldKind::Id => {
                            if id_field.replace(fieldname.clone()).is_some() {
                                return Err(Error::MalformedSchema(format!(
                                    "object type {typename} declares more than one id field"
                                )));
                            }
                        }
                        FieldKind::Primitive => primitive_field_names.push(fieldname.clone()),
                        FieldKind::Node { target } => {
                            if !schema.types.contains_key(target) {
                                return Err(Error::MalformedSchema(format!(
                                    "field {typename}.{fieldname} links to undeclared type {target}"
                                )));
                            }
                            link_field_names.push(fieldname.clone());
                        }
                        FieldKind::Connection { element } => {
                            if !schema.types.contains_key(element) {
                                return Err(Error::MalformedSchema(format!(
                                    "field {typename}.{fieldname} connects to undeclared type {element}"
                                )));
                            }
                            connection_field_names.push(fieldname.clone());
                        }
                    }
                }

                let id_field_name = id_field.ok_or_else(|| {
                    Error::MalformedSchema(format!("object type {typename} has no id field"))
                })?;

                object_types.insert(
                    typename.clone(),
                    ObjectTypeInfo {
                        fields: fields.clone(),
                        id_field_name,
                        primitive_field_names,
                        link_field_names,
                        connection_field_names,
                    },
                );
            }
            TypeDecl::Union { clauses } => {
                for clause in clauses.keys() {
                    match schema.types.get(clause) {
                        Some(TypeDecl::Object { .. }) => {}
                        Some(TypeDecl::Union { .. }) => {
                            return Err(Error::MalformedSchema(format!(
                                "union type {typename} has non-object clause {clause}"
                            )));
                        }
                        None => {
                            return Err(Error::MalformedSchema(format!(
                                "union type {typename} references undeclared type {clause}"
                            )));
                        }
                    }
                }
                union_types.insert(
                    typename.clone(),
                    UnionTypeInfo {
                        clauses: clauses.keys().cloned().collect(),
                    },
                );
            }
        }
    }

    Ok(SchemaInfo {
        object_types,
        union_types,
    })
}
