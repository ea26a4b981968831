//! Selection query engine.
//!
//! This module provides:
//! - Synthesizer: selection tree → one JSON-aggregating SeaQuery statement
//! - Transformer: aggregated rows → objects shaped like the selection
//! - Pagination: connection envelopes (edges + page info) over a node query
//! - Engine: ties the three together around a single database round trip

mod pagination;
mod synthesizer;
mod transformer;

pub use pagination::{
    BeforeQuery, Connection, Edge, PageInfo, PaginationHooks, decode_cursor, encode_cursor,
    key_cursor,
};
pub use synthesizer::{Scope, Synthesizer};
pub use transformer::Transformer;

use sea_query::PostgresQueryBuilder;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::DEFAULT_MAX_SELECTION_DEPTH;
use crate::db::QueryExecutor;
use crate::error::{EngineError, EngineResult};
use crate::mapping::MappingRegistry;
use crate::metadata::MetadataProvider;
use crate::selection::SelectionTree;

/// Per-request handle: database session plus caller identity and
/// environment readable by mapping functions. Never mutated by the engine.
#[derive(Clone)]
pub struct QueryContext {
    executor: Arc<dyn QueryExecutor>,
    /// Authenticated caller, if any.
    pub current_user_id: Option<Uuid>,
    /// Free-form request environment (locale, tenant, ...).
    pub vars: HashMap<String, String>,
}

impl QueryContext {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            executor,
            current_user_id: None,
            vars: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.current_user_id = Some(user_id);
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn executor(&self) -> &dyn QueryExecutor {
        self.executor.as_ref()
    }
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("current_user_id", &self.current_user_id)
            .field("vars", &self.vars)
            .finish_non_exhaustive()
    }
}

/// Entry point: compiles, executes and reshapes selections.
///
/// Holds only read-only configuration, so one instance is shared by all
/// concurrent requests.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<MappingRegistry>,
    metadata: Arc<dyn MetadataProvider>,
    max_depth: usize,
}

impl Engine {
    pub fn new(registry: Arc<MappingRegistry>, metadata: Arc<dyn MetadataProvider>) -> Self {
        Self {
            registry,
            metadata,
            max_depth: DEFAULT_MAX_SELECTION_DEPTH,
        }
    }

    /// Limit how many tables deep a selection may nest.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn registry(&self) -> &MappingRegistry {
        &self.registry
    }

    pub fn metadata(&self) -> &dyn MetadataProvider {
        self.metadata.as_ref()
    }

    pub fn synthesizer(&self) -> Synthesizer<'_> {
        Synthesizer::new(&self.registry, self.metadata.as_ref(), self.max_depth)
    }

    pub fn transformer(&self) -> Transformer<'_> {
        Transformer::new(&self.registry)
    }

    /// Render the SQL for a root selection without executing it.
    pub fn to_sql(&self, ctx: &QueryContext, tree: &SelectionTree) -> EngineResult<String> {
        self.render(ctx, tree, None).map(|(sql, _)| sql)
    }

    /// Execute a root selection and return one object per row.
    pub async fn query(&self, ctx: &QueryContext, tree: &SelectionTree) -> EngineResult<Vec<Value>> {
        self.query_with(ctx, tree, None).await
    }

    /// Like [`Engine::query`], deserializing each object into `T`.
    pub async fn query_as<T: DeserializeOwned>(
        &self,
        ctx: &QueryContext,
        tree: &SelectionTree,
    ) -> EngineResult<Vec<T>> {
        self.query(ctx, tree)
            .await?
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(EngineError::from))
            .collect()
    }

    /// Execute a root selection, letting `before_query` amend the root
    /// statement (extra filters, ordering, limits) before it is rendered.
    pub async fn query_with(
        &self,
        ctx: &QueryContext,
        tree: &SelectionTree,
        before_query: Option<&BeforeQuery<'_>>,
    ) -> EngineResult<Vec<Value>> {
        let (sql, type_name) = self.render(ctx, tree, before_query)?;
        tracing::debug!(type_name, sql = %sql, "executing selection query");

        let rows = ctx.executor().fetch_rows(&sql).await?;
        tracing::debug!(type_name, rows = rows.len(), "selection query returned");

        let transformer = self.transformer();
        rows.iter()
            .map(|row| transformer.transform_type(ctx, row, type_name, &tree.fields_by_type_name))
            .collect()
    }

    fn render<'t>(
        &self,
        ctx: &QueryContext,
        tree: &'t SelectionTree,
        before_query: Option<&BeforeQuery<'_>>,
    ) -> EngineResult<(String, &'t str)> {
        let type_name = root_type(tree)?;
        let (query, alias) =
            self.synthesizer()
                .select_type(ctx, &Scope::root(), type_name, &tree.fields_by_type_name)?;
        let query = match before_query {
            Some(hook) => hook(query, &alias),
            None => query,
        };
        Ok((query.to_string(PostgresQueryBuilder), type_name))
    }
}

/// The single concrete type selected at the root.
fn root_type(tree: &SelectionTree) -> EngineResult<&str> {
    let (type_name, fields) = single_type(&tree.fields_by_type_name).map_err(|candidates| {
        if candidates.is_empty() {
            EngineError::EmptyResolveInfo
        } else {
            EngineError::AmbiguousFieldType {
                type_name: "(root)".to_string(),
                field: tree.name.clone(),
                candidates,
            }
        }
    })?;
    if fields.is_empty() {
        return Err(EngineError::EmptyResolveInfo);
    }
    Ok(type_name)
}

/// Concrete type targeted by a nested field.
pub(crate) fn child_type<'t>(type_name: &str, field: &'t SelectionTree) -> EngineResult<&'t str> {
    single_type(&field.fields_by_type_name)
        .map(|(child, _)| child)
        .map_err(|candidates| EngineError::AmbiguousFieldType {
            type_name: type_name.to_string(),
            field: field.name.clone(),
            candidates,
        })
}

fn single_type<V>(types: &BTreeMap<String, V>) -> Result<(&str, &V), Vec<String>> {
    let mut iter = types.iter();
    match (iter.next(), iter.next()) {
        (Some((name, fields)), None) => Ok((name.as_str(), fields)),
        _ => Err(types.keys().cloned().collect()),
    }
}
