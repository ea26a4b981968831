//! Structural metadata consumed by the engine.
//!
//! The engine never owns schema definitions. It asks a [`MetadataProvider`]
//! for a type's table, columns and declared relations and derives joins from
//! them. Two providers ship with the crate:
//! - [`StaticMetadata`]: assembled in code (tests, embedded schemas)
//! - [`PgCatalog`]: introspected from PostgreSQL `information_schema`

mod catalog;

pub use catalog::PgCatalog;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cardinality of a declared relation, seen from the declaring type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToOne,
}

/// One column pair of a foreign key.
///
/// `column` lives on the declaring type, `referenced_column` on the target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinColumn {
    pub column: String,
    pub referenced_column: String,
}

/// A relation declared by a type towards another type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationMetadata {
    /// Target type name.
    pub target: String,
    pub kind: RelationKind,
    pub join_columns: Vec<JoinColumn>,
}

/// Table, columns and relations of one type.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeMetadata {
    pub name: String,
    pub table_name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub relations: Vec<RelationMetadata>,
}

impl TypeMetadata {
    /// Create metadata for a type backed by a table of the same name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table_name: name.clone(),
            name,
            ..Default::default()
        }
    }

    /// Override the backing table.
    pub fn table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Add columns.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Declare a single-column relation to `target`.
    pub fn relation(
        mut self,
        target: impl Into<String>,
        kind: RelationKind,
        column: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        self.relations.push(RelationMetadata {
            target: target.into(),
            kind,
            join_columns: vec![JoinColumn {
                column: column.into(),
                referenced_column: referenced_column.into(),
            }],
        });
        self
    }

    /// Check whether the table has a column with this name.
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// First relation declared towards `target`.
    pub fn relation_to(&self, target: &str) -> Option<&RelationMetadata> {
        self.relations.iter().find(|r| r.target == target)
    }
}

/// Source of structural metadata, keyed by type or table name.
pub trait MetadataProvider: Send + Sync {
    /// Look up a type by type name, falling back to table name.
    fn metadata(&self, name: &str) -> Option<&TypeMetadata>;
}

/// In-memory metadata provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticMetadata {
    types: HashMap<String, TypeMetadata>,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type (builder style).
    pub fn with(mut self, meta: TypeMetadata) -> Self {
        self.insert(meta);
        self
    }

    /// Register or replace a type.
    pub fn insert(&mut self, meta: TypeMetadata) {
        self.types.insert(meta.name.clone(), meta);
    }

    /// Iterate over all registered types.
    pub fn types(&self) -> impl Iterator<Item = &TypeMetadata> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl MetadataProvider for StaticMetadata {
    fn metadata(&self, name: &str) -> Option<&TypeMetadata> {
        self.types
            .get(name)
            .or_else(|| self.types.values().find(|t| t.table_name == name))
    }
}
