//! Selection trees: which fields of which types a caller wants.
//!
//! The JSON shape matches parsed GraphQL resolve info:
//!
//! ```json
//! {
//!   "name": "posts",
//!   "alias": "posts",
//!   "args": {},
//!   "fieldsByTypeName": {
//!     "Post": {
//!       "id": { "name": "id", "alias": "id", "fieldsByTypeName": {} },
//!       "writer": { "name": "author", "alias": "writer", "fieldsByTypeName": { "User": { ... } } }
//!     }
//!   }
//! }
//! ```
//!
//! Inner maps are keyed by output alias.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{EngineError, EngineResult};

/// Concrete type name → (output alias → field selection).
pub type FieldsByTypeName = BTreeMap<String, BTreeMap<String, SelectionTree>>;

/// One requested field and, for object/array fields, its sub-selections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionTree {
    /// Source field name.
    pub name: String,

    /// Output key. Empty means "same as name".
    #[serde(default)]
    pub alias: String,

    /// Field arguments, passed through to mapping functions.
    #[serde(default)]
    pub args: Map<String, Value>,

    #[serde(default)]
    pub fields_by_type_name: FieldsByTypeName,
}

impl SelectionTree {
    /// A scalar field.
    pub fn leaf(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            alias: name.clone(),
            name,
            ..Default::default()
        }
    }

    /// An object or array field selecting `fields` of `type_name`.
    pub fn object(
        name: impl Into<String>,
        type_name: impl Into<String>,
        fields: impl IntoIterator<Item = SelectionTree>,
    ) -> Self {
        let mut tree = Self::leaf(name);
        tree.fields_by_type_name
            .insert(type_name.into(), index_by_alias(fields));
        tree
    }

    /// Add another concrete type's selection (union/interface fields).
    pub fn on_type(
        mut self,
        type_name: impl Into<String>,
        fields: impl IntoIterator<Item = SelectionTree>,
    ) -> Self {
        self.fields_by_type_name
            .insert(type_name.into(), index_by_alias(fields));
        self
    }

    /// Rename the output key.
    pub fn aliased(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// Attach field arguments.
    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.args = args;
        self
    }

    /// Parse a resolve-info JSON document.
    ///
    /// `null`, an empty object, or a tree without any selected type is
    /// rejected as empty.
    pub fn from_json(value: Value) -> EngineResult<Self> {
        if value.is_null() || value.as_object().is_some_and(Map::is_empty) {
            return Err(EngineError::EmptyResolveInfo);
        }
        let mut tree: SelectionTree = serde_json::from_value(value)
            .map_err(|e| EngineError::MalformedSelection(e.to_string()))?;
        if tree.fields_by_type_name.is_empty() {
            return Err(EngineError::EmptyResolveInfo);
        }
        tree.fill_aliases();
        Ok(tree)
    }

    /// Output key of this field.
    pub fn output_key(&self) -> &str {
        if self.alias.is_empty() {
            &self.name
        } else {
            &self.alias
        }
    }

    /// Whether this field targets an object/array type.
    pub fn is_complex(&self) -> bool {
        !self.fields_by_type_name.is_empty()
    }

    /// Find the first direct child field with this source name, across all
    /// selected types.
    pub fn child_named(&self, name: &str) -> Option<&SelectionTree> {
        self.fields_by_type_name
            .values()
            .flat_map(|fields| fields.values())
            .find(|child| child.name == name)
    }

    fn fill_aliases(&mut self) {
        if self.alias.is_empty() {
            self.alias = self.name.clone();
        }
        for fields in self.fields_by_type_name.values_mut() {
            for child in fields.values_mut() {
                child.fill_aliases();
            }
        }
    }
}

fn index_by_alias(fields: impl IntoIterator<Item = SelectionTree>) -> BTreeMap<String, SelectionTree> {
    fields
        .into_iter()
        .map(|f| (f.output_key().to_string(), f))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_resolve_info_shape() {
        let tree = SelectionTree::from_json(json!({
            "name": "posts",
            "fieldsByTypeName": {
                "Post": {
                    "id": { "name": "id", "alias": "id" },
                    "writer": {
                        "name": "author",
                        "alias": "writer",
                        "args": { "active": true },
                        "fieldsByTypeName": { "User": { "name": { "name": "name" } } }
                    }
                }
            }
        }))
        .unwrap();

        assert_eq!(tree.output_key(), "posts");
        let writer = &tree.fields_by_type_name["Post"]["writer"];
        assert_eq!(writer.name, "author");
        assert!(writer.is_complex());
        assert_eq!(writer.args["active"], json!(true));
        assert_eq!(writer.fields_by_type_name["User"]["name"].alias, "name");
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            SelectionTree::from_json(Value::Null),
            Err(EngineError::EmptyResolveInfo)
        ));
        assert!(matches!(
            SelectionTree::from_json(json!({})),
            Err(EngineError::EmptyResolveInfo)
        ));
        assert!(matches!(
            SelectionTree::from_json(json!({ "name": "posts" })),
            Err(EngineError::EmptyResolveInfo)
        ));
    }

    #[test]
    fn unparsable_input_is_malformed() {
        let err = SelectionTree::from_json(json!({ "name": 42 })).unwrap_err();
        assert!(matches!(err, EngineError::MalformedSelection(_)));
    }

    #[test]
    fn builders_index_children_by_alias() {
        let tree = SelectionTree::object(
            "posts",
            "Post",
            [
                SelectionTree::leaf("title").aliased("headline"),
                SelectionTree::leaf("id"),
            ],
        );
        let fields = &tree.fields_by_type_name["Post"];
        assert!(fields.contains_key("headline"));
        assert_eq!(fields["headline"].name, "title");
        assert!(tree.child_named("title").is_some());
    }
}
