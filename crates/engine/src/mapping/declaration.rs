//! Declarative mappings loaded from TOML.
//!
//! Only the data-only variants can be declared: column renames, alias
//! redirections, and explicit column relations. Expression, custom query,
//! custom relation and transform mappings are closures and are registered in
//! code.
//!
//! ```toml
//! [types.Post]
//! table = "posts"
//! required_columns = ["id"]
//!
//! [types.Post.fields.headline]
//! column = "title"
//!
//! [types.Post.fields.writer]
//! alias = "author"
//!
//! [types.Post.fields.author]
//! relation = { many = false, parent_column = "author_id", child_column = "id" }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::{FieldMapping, TypeMapping};
use crate::relation::RelationDescriptor;

/// Top-level mapping declaration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MappingDeclaration {
    #[serde(default)]
    pub types: BTreeMap<String, TypeDeclaration>,
}

/// Overrides declared for one type.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TypeDeclaration {
    pub table: Option<String>,

    #[serde(default)]
    pub required_columns: Vec<String>,

    #[serde(default)]
    pub fields: BTreeMap<String, FieldDeclaration>,
}

/// A field override. Exactly one of `column`, `alias`, `relation` is set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FieldDeclaration {
    pub column: Option<String>,
    pub alias: Option<String>,
    /// Type name the aliased field's sub-selection belongs to.
    pub target_type: Option<String>,
    pub relation: Option<RelationDeclaration>,
}

/// Explicit column relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDeclaration {
    #[serde(default)]
    pub many: bool,
    pub parent_column: String,
    pub child_column: String,
}

/// Identifiers must be non-empty, alphanumeric/underscore, start with a
/// letter or underscore, max 63 chars (PostgreSQL NAMEDATALEN - 1).
fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
}

impl MappingDeclaration {
    /// Parse a TOML document.
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).context("failed to parse mapping declaration")
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read mappings from {}", path.display()))?;
        Self::from_toml(&source)
    }

    pub(super) fn apply(self, types: &mut HashMap<String, TypeMapping>) -> Vec<String> {
        let mut warnings = Vec::new();

        for (type_name, decl) in self.types {
            let entry = types.entry(type_name.clone()).or_default();

            if let Some(table) = decl.table {
                if is_valid_identifier(&table) {
                    entry.table = Some(table);
                } else {
                    warnings.push(format!("type '{type_name}': table '{table}' is invalid"));
                }
            }

            for column in decl.required_columns {
                if !is_valid_identifier(&column) {
                    warnings.push(format!(
                        "type '{type_name}': required column '{column}' is invalid"
                    ));
                    continue;
                }
                if !entry.required_columns.contains(&column) {
                    entry.required_columns.push(column);
                }
            }

            for (field, field_decl) in decl.fields {
                let mapping = match field_decl.into_mapping() {
                    Ok(mapping) => mapping,
                    Err(reason) => {
                        warnings.push(format!("type '{type_name}': field '{field}' {reason}"));
                        continue;
                    }
                };
                if entry.fields.insert(field.clone(), mapping).is_some() {
                    warnings.push(format!(
                        "type '{type_name}': field '{field}' overwrites existing mapping"
                    ));
                }
            }
        }

        warnings
    }
}

impl FieldDeclaration {
    fn into_mapping(self) -> Result<FieldMapping, &'static str> {
        match (self.column, self.alias, self.relation) {
            (Some(column), None, None) if is_valid_identifier(&column) => {
                Ok(FieldMapping::Column(column))
            }
            (Some(_), None, None) => Err("has an invalid column name"),
            (None, Some(alias), None) if !alias.is_empty() => Ok(FieldMapping::Alias {
                field: alias,
                target_type: self.target_type,
            }),
            (None, Some(_), None) => Err("has an empty alias"),
            (None, None, Some(rel))
                if is_valid_identifier(&rel.parent_column)
                    && is_valid_identifier(&rel.child_column) =>
            {
                Ok(FieldMapping::Relation(RelationDescriptor::columns(
                    rel.many,
                    rel.parent_column,
                    rel.child_column,
                )))
            }
            (None, None, Some(_)) => Err("has an invalid relation column"),
            (None, None, None) => Err("declares no mapping"),
            _ => Err("declares more than one of column, alias, relation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingRegistry;
    use crate::relation::RelationJoin;

    const SAMPLE: &str = r#"
[types.Post]
table = "posts"
required_columns = ["id", "author_id"]

[types.Post.fields.headline]
column = "title"

[types.Post.fields.writer]
alias = "author"
target_type = "User"

[types.Post.fields.author]
relation = { many = false, parent_column = "author_id", child_column = "id" }
"#;

    #[test]
    fn declaration_populates_registry() {
        let decl = MappingDeclaration::from_toml(SAMPLE).unwrap();
        let mut builder = MappingRegistry::builder();
        let warnings = builder.apply_declaration(decl);
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");

        let registry = builder.build();
        assert_eq!(registry.table_name("Post"), "posts");
        assert_eq!(registry.required_columns("Post"), ["id", "author_id"]);
        assert!(matches!(
            registry.field("Post", "headline"),
            Some(FieldMapping::Column(c)) if c == "title"
        ));
        assert!(matches!(
            registry.field("Post", "writer"),
            Some(FieldMapping::Alias { field, target_type: Some(t) }) if field == "author" && t == "User"
        ));
        match registry.field("Post", "author") {
            Some(FieldMapping::Relation(rel)) => {
                assert!(!rel.is_many);
                assert!(matches!(
                    &rel.join,
                    RelationJoin::Columns { parent_column, child_column }
                        if parent_column == "author_id" && child_column == "id"
                ));
            }
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn conflicting_or_empty_fields_warn() {
        let decl = MappingDeclaration::from_toml(
            r#"
[types.Post.fields.both]
column = "title"
alias = "name"

[types.Post.fields.nothing]

[types.Post.fields.bad]
column = "title; drop table posts"
"#,
        )
        .unwrap();
        let mut builder = MappingRegistry::builder();
        let warnings = builder.apply_declaration(decl);

        assert_eq!(warnings.len(), 3, "{warnings:?}");
        assert!(warnings.iter().any(|w| w.contains("more than one")));
        assert!(warnings.iter().any(|w| w.contains("declares no mapping")));
        assert!(warnings.iter().any(|w| w.contains("invalid column")));
        assert!(builder.build().field("Post", "both").is_none());
    }

    #[test]
    fn redeclared_field_warns_about_overwrite() {
        let mut builder =
            MappingRegistry::builder().field("Post", "headline", FieldMapping::column("name"));
        let warnings = builder.apply_declaration(MappingDeclaration::from_toml(SAMPLE).unwrap());

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("overwrites"));
    }

    #[test]
    fn identifier_validation() {
        assert!(is_valid_identifier("author_id"));
        assert!(is_valid_identifier("_hidden"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1st"));
        assert!(!is_valid_identifier("a-b"));
        assert!(!is_valid_identifier(&"x".repeat(64)));
    }
}
