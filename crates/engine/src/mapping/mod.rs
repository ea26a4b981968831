//! Mapping registry: per-type, per-field overrides.
//!
//! The registry is assembled once at startup (in code through
//! [`MappingRegistryBuilder`], optionally seeded from a TOML
//! [`MappingDeclaration`]) and then shared read-only behind an `Arc`.
//!
//! Each field carries at most one [`FieldMapping`] variant. Alias
//! redirection is resolved before anything else looks at the field.

mod declaration;

pub use declaration::{FieldDeclaration, MappingDeclaration, RelationDeclaration, TypeDeclaration};

use sea_query::{SelectStatement, SimpleExpr};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::engine::QueryContext;
use crate::error::{EngineError, EngineResult};
use crate::relation::RelationDescriptor;
use crate::selection::SelectionTree;

/// Computes a select expression from the table alias of the owning type.
pub type ExpressionFn = Arc<dyn Fn(&QueryContext, &str) -> SimpleExpr + Send + Sync>;

/// Rewrites the fully joined child subquery of a nested field.
pub type CustomQueryFn =
    Arc<dyn Fn(&QueryContext, SelectStatement, &JoinScope<'_>) -> SelectStatement + Send + Sync>;

/// Post-fetch transform: `(raw value, whole raw row, context) -> value`.
pub type TransformFn = Arc<dyn Fn(&Value, &Map<String, Value>, &QueryContext) -> Value + Send + Sync>;

/// Aliases and field visible to a custom query function.
#[derive(Debug, Clone, Copy)]
pub struct JoinScope<'a> {
    pub parent_alias: &'a str,
    pub child_alias: &'a str,
    pub field: &'a SelectionTree,
}

/// How one field of one type is selected or post-processed.
#[derive(Clone)]
pub enum FieldMapping {
    /// Read from a differently named column.
    Column(String),
    /// Select a computed expression.
    Expression(ExpressionFn),
    /// Extend the child subquery of a nested field.
    CustomQuery(CustomQueryFn),
    /// Explicit relation, bypassing schema discovery.
    Relation(RelationDescriptor),
    /// Replace the fetched value.
    Transform(TransformFn),
    /// Behave exactly like another field.
    Alias {
        field: String,
        target_type: Option<String>,
    },
}

impl FieldMapping {
    pub fn column(column: impl Into<String>) -> Self {
        Self::Column(column.into())
    }

    pub fn expression<F>(f: F) -> Self
    where
        F: Fn(&QueryContext, &str) -> SimpleExpr + Send + Sync + 'static,
    {
        Self::Expression(Arc::new(f))
    }

    pub fn custom_query<F>(f: F) -> Self
    where
        F: Fn(&QueryContext, SelectStatement, &JoinScope<'_>) -> SelectStatement
            + Send
            + Sync
            + 'static,
    {
        Self::CustomQuery(Arc::new(f))
    }

    pub fn relation(relation: RelationDescriptor) -> Self {
        Self::Relation(relation)
    }

    pub fn transform<F>(f: F) -> Self
    where
        F: Fn(&Value, &Map<String, Value>, &QueryContext) -> Value + Send + Sync + 'static,
    {
        Self::Transform(Arc::new(f))
    }

    pub fn alias(field: impl Into<String>) -> Self {
        Self::Alias {
            field: field.into(),
            target_type: None,
        }
    }

    /// Alias to a field whose sub-selection belongs to another type name.
    pub fn alias_of_type(field: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self::Alias {
            field: field.into(),
            target_type: Some(target_type.into()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Column(_) => "column",
            Self::Expression(_) => "expression",
            Self::CustomQuery(_) => "custom_query",
            Self::Relation(_) => "relation",
            Self::Transform(_) => "transform",
            Self::Alias { .. } => "alias",
        }
    }
}

impl fmt::Debug for FieldMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(c) => f.debug_tuple("Column").field(c).finish(),
            Self::Relation(r) => f.debug_tuple("Relation").field(r).finish(),
            Self::Alias { field, target_type } => f
                .debug_struct("Alias")
                .field("field", field)
                .field("target_type", target_type)
                .finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Overrides for one type.
#[derive(Debug, Clone, Default)]
pub struct TypeMapping {
    /// Source table, when it differs from the type name.
    pub table: Option<String>,
    pub fields: HashMap<String, FieldMapping>,
    /// Columns selected whether requested or not.
    pub required_columns: Vec<String>,
}

/// Read-only lookup table of type and field overrides.
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    types: HashMap<String, TypeMapping>,
}

impl MappingRegistry {
    pub fn builder() -> MappingRegistryBuilder {
        MappingRegistryBuilder::default()
    }

    /// An empty registry.
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn type_mapping(&self, type_name: &str) -> Option<&TypeMapping> {
        self.types.get(type_name)
    }

    pub fn field(&self, type_name: &str, field: &str) -> Option<&FieldMapping> {
        self.types.get(type_name)?.fields.get(field)
    }

    /// Table backing a type: the override, else the type name itself.
    pub fn table_name<'a>(&'a self, type_name: &'a str) -> &'a str {
        self.types
            .get(type_name)
            .and_then(|t| t.table.as_deref())
            .unwrap_or(type_name)
    }

    pub fn required_columns(&self, type_name: &str) -> &[String] {
        self.types
            .get(type_name)
            .map(|t| t.required_columns.as_slice())
            .unwrap_or(&[])
    }

    /// Follow alias redirections for `field`.
    ///
    /// The returned selection keeps the caller's output key but carries the
    /// target field's name, and its sub-selection is re-keyed to the target
    /// type when the alias names one. Non-aliased fields come back borrowed.
    pub fn resolve_alias<'a>(
        &self,
        type_name: &str,
        field: &'a SelectionTree,
    ) -> EngineResult<Cow<'a, SelectionTree>> {
        let mut current = Cow::Borrowed(field);
        let mut visited = HashSet::new();

        while let Some(FieldMapping::Alias {
            field: target,
            target_type,
        }) = self.field(type_name, &current.name)
        {
            if !visited.insert(current.name.clone()) {
                return Err(EngineError::AliasCycle {
                    type_name: type_name.to_string(),
                    field: field.name.clone(),
                });
            }

            let mut redirected = current.into_owned();
            redirected.alias = redirected.output_key().to_string();
            redirected.name = target.clone();
            if let Some(target_type) = target_type
                && redirected.is_complex()
            {
                let merged = std::mem::take(&mut redirected.fields_by_type_name)
                    .into_values()
                    .flatten()
                    .collect();
                redirected
                    .fields_by_type_name
                    .insert(target_type.clone(), merged);
            }
            current = Cow::Owned(redirected);
        }

        Ok(current)
    }
}

/// Assembles a [`MappingRegistry`] at startup.
#[derive(Debug, Default)]
pub struct MappingRegistryBuilder {
    types: HashMap<String, TypeMapping>,
}

impl MappingRegistryBuilder {
    /// Back `type_name` with a different table.
    pub fn table(mut self, type_name: &str, table: &str) -> Self {
        self.entry(type_name).table = Some(table.to_string());
        self
    }

    /// Always select these columns for `type_name`.
    pub fn required_columns<I, S>(mut self, type_name: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.entry(type_name);
        for column in columns {
            let column = column.into();
            if !entry.required_columns.contains(&column) {
                entry.required_columns.push(column);
            }
        }
        self
    }

    /// Set the mapping of one field, replacing any previous one.
    pub fn field(mut self, type_name: &str, field: &str, mapping: FieldMapping) -> Self {
        if let Some(previous) = self
            .entry(type_name)
            .fields
            .insert(field.to_string(), mapping)
        {
            tracing::debug!(
                type_name,
                field,
                previous = previous.kind(),
                "field mapping replaced"
            );
        }
        self
    }

    /// Apply a declaration, returning warnings for entries that were skipped
    /// or that replaced existing ones.
    pub fn apply_declaration(&mut self, declaration: MappingDeclaration) -> Vec<String> {
        declaration.apply(&mut self.types)
    }

    pub fn build(self) -> Arc<MappingRegistry> {
        Arc::new(MappingRegistry { types: self.types })
    }

    fn entry(&mut self, type_name: &str) -> &mut TypeMapping {
        self.types.entry(type_name.to_string()).or_default()
    }
}
