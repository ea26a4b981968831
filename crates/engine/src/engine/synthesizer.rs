//! Selection tree → SQL using SeaQuery.
//!
//! Every nested object/array field becomes a correlated subquery whose rows
//! are folded into one JSON value by the database:
//! - multi-valued: `coalesce(json_agg(row_to_json(..)), '[]'::json)`
//! - single-valued: `row_to_json(..)` over a `LIMIT 1` subquery (NULL when
//!   no row matches)
//!
//! Statements are threaded by value: each step takes the statement built so
//! far and returns the extended one.

use sea_query::{Alias, Expr, Query, SelectStatement, SimpleExpr, SubQueryStatement};
use std::collections::HashSet;

use super::{QueryContext, child_type};
use crate::error::{EngineError, EngineResult};
use crate::mapping::{FieldMapping, JoinScope, MappingRegistry};
use crate::metadata::{MetadataProvider, TypeMetadata};
use crate::relation::{RelationDescriptor, RelationJoin, find_relation};
use crate::selection::{FieldsByTypeName, SelectionTree};

/// Alias of the derived table each JSON aggregate reads from.
const AGGREGATE_ALIAS: &str = "_agg";

/// Table aliases of the enclosing query scopes, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    aliases: Vec<String>,
}

impl Scope {
    pub fn root() -> Self {
        Self::default()
    }

    /// Alias of the innermost table.
    pub fn alias(&self) -> &str {
        self.aliases.last().map(String::as_str).unwrap_or_default()
    }

    /// Number of nested table scopes.
    pub fn depth(&self) -> usize {
        self.aliases.len()
    }

    /// Open a nested scope for `table`.
    ///
    /// The alias is the lower-cased table name. When an enclosing scope
    /// already uses it (self relations), a depth suffix keeps correlated
    /// references unambiguous.
    pub fn enter(&self, table: &str) -> Scope {
        let base = table.to_lowercase();
        let mut alias = base.clone();
        let mut suffix = self.aliases.len();
        while self.aliases.contains(&alias) {
            alias = format!("{base}_{suffix}");
            suffix += 1;
        }

        let mut aliases = self.aliases.clone();
        aliases.push(alias);
        Scope { aliases }
    }
}

/// Builds one statement for a whole selection tree.
pub struct Synthesizer<'a> {
    registry: &'a MappingRegistry,
    metadata: &'a dyn MetadataProvider,
    max_depth: usize,
}

impl<'a> Synthesizer<'a> {
    pub fn new(
        registry: &'a MappingRegistry,
        metadata: &'a dyn MetadataProvider,
        max_depth: usize,
    ) -> Self {
        Self {
            registry,
            metadata,
            max_depth,
        }
    }

    /// Select the requested fields of `type_name` from its table.
    ///
    /// Returns the statement and the alias its table was given, so callers
    /// can correlate against it.
    pub fn select_type(
        &self,
        ctx: &QueryContext,
        scope: &Scope,
        type_name: &str,
        fields_by_type_name: &FieldsByTypeName,
    ) -> EngineResult<(SelectStatement, String)> {
        if scope.depth() >= self.max_depth {
            return Err(EngineError::SelectionTooDeep {
                limit: self.max_depth,
            });
        }

        let table = self.registry.table_name(type_name);
        let scope = scope.enter(table);
        let alias = scope.alias().to_string();
        let meta = self.lookup(type_name);

        let mut query = Query::select();
        query.from_as(Alias::new(table), Alias::new(&alias));

        let mut selected = HashSet::new();
        for field in fields_by_type_name
            .get(type_name)
            .into_iter()
            .flat_map(|fields| fields.values())
        {
            selected.insert(field.output_key().to_string());
            query = self.select_field(ctx, query, &scope, meta, type_name, field)?;
        }

        for column in self.registry.required_columns(type_name) {
            if selected.contains(column) {
                continue;
            }
            query.expr_as(
                Expr::col((Alias::new(&alias), Alias::new(column))),
                Alias::new(column),
            );
        }

        Ok((query, alias))
    }

    /// Add one requested field of `type_name` to `query`.
    ///
    /// First match wins: alias redirection, nested selection, mapped column
    /// or expression, same-named column. Fields with no backing column are
    /// left out of the statement; a transform can still fill them.
    pub fn select_field(
        &self,
        ctx: &QueryContext,
        mut query: SelectStatement,
        scope: &Scope,
        meta: Option<&TypeMetadata>,
        type_name: &str,
        field: &SelectionTree,
    ) -> EngineResult<SelectStatement> {
        let field = self.registry.resolve_alias(type_name, field)?;
        if field.is_complex() {
            return self.select_complex_field(ctx, query, scope, meta, type_name, &field);
        }

        let alias = scope.alias();
        let key = Alias::new(field.output_key());
        match self.registry.field(type_name, &field.name) {
            Some(FieldMapping::Column(column)) => {
                query.expr_as(Expr::col((Alias::new(alias), Alias::new(column))), key);
            }
            Some(FieldMapping::Expression(expression)) => {
                query.expr_as(expression(ctx, alias), key);
            }
            _ if meta.is_some_and(|m| m.has_column(&field.name)) => {
                query.expr_as(Expr::col((Alias::new(alias), Alias::new(&field.name))), key);
            }
            Some(FieldMapping::Transform(_)) => {}
            _ => {
                tracing::warn!(
                    type_name,
                    field = %field.name,
                    "no backing column, field will be null"
                );
            }
        }

        Ok(query)
    }

    /// Add a nested object/array field as one aggregated JSON column.
    pub fn select_complex_field(
        &self,
        ctx: &QueryContext,
        mut query: SelectStatement,
        scope: &Scope,
        meta: Option<&TypeMetadata>,
        type_name: &str,
        field: &SelectionTree,
    ) -> EngineResult<SelectStatement> {
        let child_type = child_type(type_name, field)?;
        let mapping = self.registry.field(type_name, &field.name);

        let relation = match mapping {
            Some(FieldMapping::Relation(relation)) => relation.clone(),
            _ => self
                .discover_relation(meta, type_name, child_type)?
                .ok_or_else(|| EngineError::relation_not_found(type_name, &field.name))?,
        };

        let parent_alias = scope.alias();
        let (child, child_alias) =
            self.select_type(ctx, scope, child_type, &field.fields_by_type_name)?;

        let mut child = match &relation.join {
            RelationJoin::Custom(join) => join(ctx, parent_alias, &child_alias, child),
            RelationJoin::Columns {
                parent_column,
                child_column,
            } => {
                let mut child = child;
                child.and_where(
                    Expr::col((Alias::new(&child_alias), Alias::new(child_column)))
                        .equals((Alias::new(parent_alias), Alias::new(parent_column))),
                );
                child
            }
        };

        if !relation.is_many {
            child.limit(1);
        }

        if let Some(FieldMapping::CustomQuery(custom)) = mapping {
            let join_scope = JoinScope {
                parent_alias,
                child_alias: &child_alias,
                field,
            };
            child = custom(ctx, child, &join_scope);
        }

        query.expr_as(aggregate(child, &relation), Alias::new(field.output_key()));
        Ok(query)
    }

    fn discover_relation(
        &self,
        parent: Option<&TypeMetadata>,
        parent_type: &str,
        child_type: &str,
    ) -> EngineResult<Option<RelationDescriptor>> {
        let parent = parent.or_else(|| self.lookup(parent_type));
        match (parent, self.lookup(child_type)) {
            (Some(parent), Some(child)) => find_relation(parent, child),
            _ => Ok(None),
        }
    }

    /// Metadata by type name, else by mapped table name.
    fn lookup(&self, type_name: &str) -> Option<&'a TypeMetadata> {
        self.metadata
            .metadata(type_name)
            .or_else(|| self.metadata.metadata(self.registry.table_name(type_name)))
    }
}

/// Fold the child statement's rows into one JSON value.
fn aggregate(child: SelectStatement, relation: &RelationDescriptor) -> SimpleExpr {
    let row = format!(r#"row_to_json("{AGGREGATE_ALIAS}")"#);
    let projection = if relation.is_many {
        Expr::cust(format!("coalesce(json_agg({row}), '[]'::json)"))
    } else {
        Expr::cust(row)
    };

    let mut wrapper = Query::select();
    wrapper
        .expr(projection)
        .from_subquery(child, Alias::new(AGGREGATE_ALIAS));

    SimpleExpr::SubQuery(None, Box::new(SubQueryStatement::SelectStatement(wrapper)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::QueryExecutor;
    use crate::metadata::{RelationKind, StaticMetadata};
    use crate::selection::SelectionTree;
    use async_trait::async_trait;
    use sea_query::PostgresQueryBuilder;
    use serde_json::Value;
    use std::sync::Arc;

    struct NoDatabase;

    #[async_trait]
    impl QueryExecutor for NoDatabase {
        async fn fetch_rows(&self, _sql: &str) -> Result<Vec<Value>, sqlx::Error> {
            Ok(Vec::new())
        }
    }

    fn ctx() -> QueryContext {
        QueryContext::new(Arc::new(NoDatabase))
    }

    fn blog() -> StaticMetadata {
        StaticMetadata::new()
            .with(TypeMetadata::new("users").columns(["id", "name", "manager_id"]).relation(
                "users",
                RelationKind::ManyToOne,
                "manager_id",
                "id",
            ))
            .with(
                TypeMetadata::new("posts")
                    .columns(["id", "title", "author_id"])
                    .relation("users", RelationKind::ManyToOne, "author_id", "id"),
            )
            .with(
                TypeMetadata::new("comments")
                    .columns(["id", "post_id", "body"])
                    .relation("posts", RelationKind::ManyToOne, "post_id", "id"),
            )
            .with(TypeMetadata::new("tags").columns(["id", "label"]))
    }

    fn render(registry: &MappingRegistry, tree: &SelectionTree) -> EngineResult<String> {
        let metadata = blog();
        let synth = Synthesizer::new(registry, &metadata, 16);
        let type_name = tree.fields_by_type_name.keys().next().cloned().unwrap();
        let (query, _) =
            synth.select_type(&ctx(), &Scope::root(), &type_name, &tree.fields_by_type_name)?;
        Ok(query.to_string(PostgresQueryBuilder))
    }

    #[test]
    fn scalar_fields_select_columns_under_aliases() {
        let tree = SelectionTree::object(
            "posts",
            "posts",
            [
                SelectionTree::leaf("id"),
                SelectionTree::leaf("title").aliased("headline"),
            ],
        );
        let sql = render(&MappingRegistry::default(), &tree).unwrap();

        assert!(sql.contains(r#"FROM "posts" AS "posts""#), "{sql}");
        assert!(sql.contains(r#""posts"."id" AS "id""#), "{sql}");
        assert!(sql.contains(r#""posts"."title" AS "headline""#), "{sql}");
    }

    #[test]
    fn unknown_scalar_is_omitted() {
        let tree = SelectionTree::object(
            "posts",
            "posts",
            [SelectionTree::leaf("id"), SelectionTree::leaf("excerpt")],
        );
        let sql = render(&MappingRegistry::default(), &tree).unwrap();

        assert!(!sql.contains("excerpt"), "{sql}");
    }

    #[test]
    fn single_valued_relation_is_limited_object() {
        let tree = SelectionTree::object(
            "posts",
            "posts",
            [
                SelectionTree::leaf("id"),
                SelectionTree::object("author", "users", [SelectionTree::leaf("name")]),
            ],
        );
        let sql = render(&MappingRegistry::default(), &tree).unwrap();

        assert!(sql.contains(r#"row_to_json("_agg")"#), "{sql}");
        assert!(!sql.contains("json_agg"), "{sql}");
        assert!(
            sql.contains(r#"WHERE "users"."id" = "posts"."author_id""#),
            "{sql}"
        );
        assert!(sql.contains("LIMIT 1"), "{sql}");
        assert!(sql.contains(r#"AS "author""#), "{sql}");
    }

    #[test]
    fn multi_valued_relation_is_coalesced_array() {
        let tree = SelectionTree::object(
            "posts",
            "posts",
            [SelectionTree::object(
                "comments",
                "comments",
                [SelectionTree::leaf("body")],
            )],
        );
        let sql = render(&MappingRegistry::default(), &tree).unwrap();

        assert!(
            sql.contains(r#"coalesce(json_agg(row_to_json("_agg")), '[]'::json)"#),
            "{sql}"
        );
        assert!(
            sql.contains(r#"WHERE "comments"."post_id" = "posts"."id""#),
            "{sql}"
        );
        assert!(!sql.contains("LIMIT"), "{sql}");
    }

    #[test]
    fn missing_relation_names_type_and_field() {
        let tree = SelectionTree::object(
            "posts",
            "posts",
            [SelectionTree::object("tags", "tags", [SelectionTree::leaf("label")])],
        );
        let err = render(&MappingRegistry::default(), &tree).unwrap_err();

        assert_eq!(err.to_string(), "Could not find relation posts.tags");
    }

    #[test]
    fn relation_override_skips_discovery() {
        let registry = MappingRegistry::builder()
            .field(
                "posts",
                "tags",
                FieldMapping::relation(RelationDescriptor::columns(true, "id", "post_id")),
            )
            .build();
        let tree = SelectionTree::object(
            "posts",
            "posts",
            [SelectionTree::object("tags", "tags", [SelectionTree::leaf("label")])],
        );
        let sql = render(&registry, &tree).unwrap();

        assert!(sql.contains(r#"WHERE "tags"."post_id" = "posts"."id""#), "{sql}");
        assert!(sql.contains("json_agg"), "{sql}");
    }

    #[test]
    fn custom_relation_replaces_join_condition() {
        let registry = MappingRegistry::builder()
            .field(
                "posts",
                "tags",
                FieldMapping::relation(RelationDescriptor::custom(true, |_, parent, child, mut q| {
                    q.and_where(Expr::cust(format!(
                        r#""{child}"."id" IN (SELECT tag_id FROM post_tags WHERE post_id = "{parent}"."id")"#
                    )));
                    q
                })),
            )
            .build();
        let tree = SelectionTree::object(
            "posts",
            "posts",
            [SelectionTree::object("tags", "tags", [SelectionTree::leaf("label")])],
        );
        let sql = render(&registry, &tree).unwrap();

        assert!(sql.contains("post_tags"), "{sql}");
        assert!(!sql.contains(r#""tags"."post_id""#), "{sql}");
    }

    #[test]
    fn custom_query_sees_joined_subquery() {
        let registry = MappingRegistry::builder()
            .field(
                "posts",
                "comments",
                FieldMapping::custom_query(|_, mut q, scope| {
                    q.and_where(Expr::cust(format!(r#""{}"."body" <> ''"#, scope.child_alias)));
                    q
                }),
            )
            .build();
        let tree = SelectionTree::object(
            "posts",
            "posts",
            [SelectionTree::object("comments", "comments", [SelectionTree::leaf("body")])],
        );
        let sql = render(&registry, &tree).unwrap();

        assert!(sql.contains(r#""comments"."post_id" = "posts"."id""#), "{sql}");
        assert!(sql.contains(r#""comments"."body" <> ''"#), "{sql}");
    }

    #[test]
    fn column_and_expression_mappings() {
        let registry = MappingRegistry::builder()
            .field("posts", "headline", FieldMapping::column("title"))
            .field(
                "posts",
                "shout",
                FieldMapping::expression(|_, alias| {
                    Expr::cust(format!(r#"upper("{alias}"."title")"#))
                }),
            )
            .build();
        let tree = SelectionTree::object(
            "posts",
            "posts",
            [SelectionTree::leaf("headline"), SelectionTree::leaf("shout")],
        );
        let sql = render(&registry, &tree).unwrap();

        assert!(sql.contains(r#""posts"."title" AS "headline""#), "{sql}");
        assert!(sql.contains(r#"upper("posts"."title") AS "shout""#), "{sql}");
    }

    #[test]
    fn required_columns_are_always_selected_once() {
        let registry = MappingRegistry::builder()
            .required_columns("posts", ["id", "author_id"])
            .build();
        let tree = SelectionTree::object("posts", "posts", [SelectionTree::leaf("id")]);
        let sql = render(&registry, &tree).unwrap();

        assert_eq!(sql.matches(r#"AS "id""#).count(), 1, "{sql}");
        assert!(sql.contains(r#""posts"."author_id" AS "author_id""#), "{sql}");
    }

    #[test]
    fn table_override_drives_alias() {
        let registry = MappingRegistry::builder()
            .table("Post", "Posts")
            .field("Post", "id", FieldMapping::column("id"))
            .build();
        let metadata = blog();
        let synth = Synthesizer::new(&registry, &metadata, 16);
        let tree = SelectionTree::object("posts", "Post", [SelectionTree::leaf("id")]);

        let (query, alias) = synth
            .select_type(&ctx(), &Scope::root(), "Post", &tree.fields_by_type_name)
            .unwrap();
        assert_eq!(alias, "posts");
        assert!(query
            .to_string(PostgresQueryBuilder)
            .contains(r#"FROM "Posts" AS "posts""#));
    }

    #[test]
    fn self_relation_gets_distinct_alias() {
        let tree = SelectionTree::object(
            "users",
            "users",
            [SelectionTree::object("reports", "users", [SelectionTree::leaf("name")])],
        );
        let sql = render(&MappingRegistry::default(), &tree).unwrap();

        assert!(sql.contains(r#"FROM "users" AS "users_1""#), "{sql}");
        assert!(
            sql.contains(r#"WHERE "users_1"."manager_id" = "users"."id""#),
            "{sql}"
        );
        assert!(sql.contains("json_agg"), "{sql}");
    }

    #[test]
    fn alias_redirection_selects_target() {
        let registry = MappingRegistry::builder()
            .field("posts", "writer", FieldMapping::alias("author"))
            .build();
        let tree = SelectionTree::object(
            "posts",
            "posts",
            [SelectionTree::object("writer", "users", [SelectionTree::leaf("name")])],
        );
        let sql = render(&registry, &tree).unwrap();

        assert!(
            sql.contains(r#"WHERE "users"."id" = "posts"."author_id""#),
            "{sql}"
        );
        assert!(sql.contains(r#"AS "writer""#), "{sql}");
    }

    #[test]
    fn depth_guard_rejects_deep_selections() {
        let registry = MappingRegistry::default();
        let metadata = blog();
        let synth = Synthesizer::new(&registry, &metadata, 1);
        let tree = SelectionTree::object(
            "posts",
            "posts",
            [SelectionTree::object("author", "users", [SelectionTree::leaf("name")])],
        );

        let err = synth
            .select_type(&ctx(), &Scope::root(), "posts", &tree.fields_by_type_name)
            .unwrap_err();
        assert!(matches!(err, EngineError::SelectionTooDeep { limit: 1 }));
    }

    #[test]
    fn polymorphic_nested_field_is_ambiguous() {
        let tree = SelectionTree::object(
            "posts",
            "posts",
            [SelectionTree::object("author", "users", [SelectionTree::leaf("name")])
                .on_type("tags", [SelectionTree::leaf("label")])],
        );
        let err = render(&MappingRegistry::default(), &tree).unwrap_err();

        assert!(matches!(err, EngineError::AmbiguousFieldType { .. }));
    }

    #[test]
    fn scope_alias_derivation() {
        let root = Scope::root();
        assert_eq!(root.alias(), "");

        let posts = root.enter("Posts");
        assert_eq!(posts.alias(), "posts");
        assert_eq!(posts.depth(), 1);

        let nested = posts.enter("posts");
        assert_eq!(nested.alias(), "posts_1");
        assert_eq!(nested.enter("posts").alias(), "posts_2");
    }
}
