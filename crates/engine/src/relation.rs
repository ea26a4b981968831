//! Relation descriptors and schema-driven relation discovery.

use sea_query::SelectStatement;
use std::fmt;
use std::sync::Arc;

use crate::engine::QueryContext;
use crate::error::{EngineError, EngineResult};
use crate::metadata::{JoinColumn, RelationKind, TypeMetadata};

/// Builds the join between a parent scope and a child subquery:
/// `(context, parent alias, child alias, child query) -> child query`.
pub type CustomRelationFn =
    Arc<dyn Fn(&QueryContext, &str, &str, SelectStatement) -> SelectStatement + Send + Sync>;

/// How child rows are joined to their parent.
#[derive(Clone)]
pub enum RelationJoin {
    /// `child.child_column = parent.parent_column`
    Columns {
        parent_column: String,
        child_column: String,
    },
    /// Full override; no condition is added by the engine.
    Custom(CustomRelationFn),
}

/// Cardinality plus join strategy connecting a parent type to a child type.
#[derive(Clone)]
pub struct RelationDescriptor {
    /// Multi-valued: aggregated as a JSON array.
    pub is_many: bool,
    pub join: RelationJoin,
}

impl RelationDescriptor {
    pub fn columns(
        is_many: bool,
        parent_column: impl Into<String>,
        child_column: impl Into<String>,
    ) -> Self {
        Self {
            is_many,
            join: RelationJoin::Columns {
                parent_column: parent_column.into(),
                child_column: child_column.into(),
            },
        }
    }

    pub fn custom<F>(is_many: bool, f: F) -> Self
    where
        F: Fn(&QueryContext, &str, &str, SelectStatement) -> SelectStatement
            + Send
            + Sync
            + 'static,
    {
        Self {
            is_many,
            join: RelationJoin::Custom(Arc::new(f)),
        }
    }
}

impl fmt::Debug for RelationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("RelationDescriptor");
        s.field("is_many", &self.is_many);
        if let RelationJoin::Columns {
            parent_column,
            child_column,
        } = &self.join
        {
            s.field("parent_column", parent_column)
                .field("child_column", child_column);
        } else {
            s.field("join", &"custom");
        }
        s.finish()
    }
}

/// Infer how `child` rows attach to `parent` rows.
///
/// The child's own declaration towards the parent wins; the parent's
/// declaration towards the child is the fallback. Only single-column keys
/// are supported. `Ok(None)` means neither side declares a relation.
pub fn find_relation(
    parent: &TypeMetadata,
    child: &TypeMetadata,
) -> EngineResult<Option<RelationDescriptor>> {
    if let Some(rel) = child.relation_to(&parent.name) {
        // Declared on the child: the key column lives on the child.
        let key = single_key(&rel.join_columns, parent, child)?;
        return Ok(Some(RelationDescriptor::columns(
            rel.kind == RelationKind::ManyToOne,
            &key.referenced_column,
            &key.column,
        )));
    }

    if let Some(rel) = parent.relation_to(&child.name) {
        // Declared on the parent: the key column lives on the parent.
        let key = single_key(&rel.join_columns, parent, child)?;
        return Ok(Some(RelationDescriptor::columns(
            rel.kind == RelationKind::OneToMany,
            &key.column,
            &key.referenced_column,
        )));
    }

    Ok(None)
}

fn single_key<'a>(
    columns: &'a [JoinColumn],
    parent: &TypeMetadata,
    child: &TypeMetadata,
) -> EngineResult<&'a JoinColumn> {
    match columns {
        [key] => Ok(key),
        _ => Err(EngineError::CompositeForeignKey {
            parent: parent.name.clone(),
            child: child.name.clone(),
            columns: columns.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TypeMetadata {
        TypeMetadata::new("users").columns(["id", "name"])
    }

    fn posts() -> TypeMetadata {
        TypeMetadata::new("posts")
            .columns(["id", "title", "author_id"])
            .relation("users", RelationKind::ManyToOne, "author_id", "id")
    }

    fn comments() -> TypeMetadata {
        TypeMetadata::new("comments")
            .columns(["id", "post_id", "body"])
            .relation("posts", RelationKind::ManyToOne, "post_id", "id")
    }

    fn join_columns(rel: &RelationDescriptor) -> (&str, &str) {
        match &rel.join {
            RelationJoin::Columns {
                parent_column,
                child_column,
            } => (parent_column.as_str(), child_column.as_str()),
            RelationJoin::Custom(_) => panic!("expected column join"),
        }
    }

    #[test]
    fn parent_declared_many_to_one_is_single_valued() {
        let rel = find_relation(&posts(), &users()).unwrap().unwrap();

        assert!(!rel.is_many);
        assert_eq!(join_columns(&rel), ("author_id", "id"));
    }

    #[test]
    fn child_declared_many_to_one_is_multi_valued() {
        let rel = find_relation(&posts(), &comments()).unwrap().unwrap();

        assert!(rel.is_many);
        assert_eq!(join_columns(&rel), ("id", "post_id"));
    }

    #[test]
    fn inverse_declarations_agree() {
        // users declares the inverse one-to-many towards posts.
        let users = users().relation("posts", RelationKind::OneToMany, "id", "author_id");
        let plain = TypeMetadata::new("posts").columns(["id", "author_id"]);

        let rel = find_relation(&users, &plain).unwrap().unwrap();
        assert!(rel.is_many);
        assert_eq!(join_columns(&rel), ("id", "author_id"));

        let back = find_relation(&plain, &users).unwrap().unwrap();
        assert!(!back.is_many);
        assert_eq!(join_columns(&back), ("author_id", "id"));
    }

    #[test]
    fn one_to_one_is_single_valued_both_ways() {
        let profiles = TypeMetadata::new("profiles")
            .columns(["user_id", "bio"])
            .relation("users", RelationKind::OneToOne, "user_id", "id");

        let rel = find_relation(&users(), &profiles).unwrap().unwrap();
        assert!(!rel.is_many);
        assert_eq!(join_columns(&rel), ("id", "user_id"));

        let back = find_relation(&profiles, &users()).unwrap().unwrap();
        assert!(!back.is_many);
        assert_eq!(join_columns(&back), ("user_id", "id"));
    }

    #[test]
    fn unrelated_types_yield_none() {
        assert!(find_relation(&users(), &comments()).unwrap().is_none());
    }

    #[test]
    fn composite_keys_are_rejected() {
        let mut lines = TypeMetadata::new("lines").relation(
            "orders",
            RelationKind::ManyToOne,
            "order_id",
            "id",
        );
        lines.relations[0].join_columns.push(JoinColumn {
            column: "region".to_string(),
            referenced_column: "region".to_string(),
        });
        let orders = TypeMetadata::new("orders");

        let err = find_relation(&orders, &lines).err().unwrap();
        assert!(matches!(err, EngineError::CompositeForeignKey { columns: 2, .. }));
    }
}
