//! Cursor-paginated connections over a node query.
//!
//! The selection must follow the `edges { node { ... } cursor } pageInfo`
//! envelope. Page boundaries, cursors and extra filtering are entirely up to
//! the caller's hooks; the engine only runs the node query and assembles the
//! envelope.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sea_query::SelectStatement;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Engine, QueryContext};
use crate::error::{EngineError, EngineResult};
use crate::selection::SelectionTree;

/// Amends the root node statement before rendering: `(statement, root
/// alias) -> statement`.
pub type BeforeQuery<'a> = dyn Fn(SelectStatement, &str) -> SelectStatement + Send + Sync + 'a;

type CountPredicate<'a> = Box<dyn Fn(usize) -> bool + Send + Sync + 'a>;
type NodeCursor<'a> = Box<dyn Fn(&Value, usize) -> String + Send + Sync + 'a>;
type TransformNodes<'a> = Box<dyn Fn(Vec<Value>) -> Vec<Value> + Send + Sync + 'a>;

/// Caller-supplied behavior of one paginated query.
pub struct PaginationHooks<'a> {
    has_previous_page: CountPredicate<'a>,
    has_next_page: CountPredicate<'a>,
    node_to_cursor: NodeCursor<'a>,
    before_query: Option<Box<BeforeQuery<'a>>>,
    transform_nodes: Option<TransformNodes<'a>>,
}

impl<'a> PaginationHooks<'a> {
    /// Page predicates receive the node count; the cursor function receives
    /// a node and its 0-based position.
    pub fn new(
        has_previous_page: impl Fn(usize) -> bool + Send + Sync + 'a,
        has_next_page: impl Fn(usize) -> bool + Send + Sync + 'a,
        node_to_cursor: impl Fn(&Value, usize) -> String + Send + Sync + 'a,
    ) -> Self {
        Self {
            has_previous_page: Box::new(has_previous_page),
            has_next_page: Box::new(has_next_page),
            node_to_cursor: Box::new(node_to_cursor),
            before_query: None,
            transform_nodes: None,
        }
    }

    /// Amend the node statement, e.g. with a cursor boundary, ordering and
    /// page size.
    pub fn before_query(
        mut self,
        f: impl Fn(SelectStatement, &str) -> SelectStatement + Send + Sync + 'a,
    ) -> Self {
        self.before_query = Some(Box::new(f));
        self
    }

    /// Rewrite the fetched nodes before cursors are assigned.
    pub fn transform_nodes(mut self, f: impl Fn(Vec<Value>) -> Vec<Value> + Send + Sync + 'a) -> Self {
        self.transform_nodes = Some(Box::new(f));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub node: Value,
    pub cursor: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub page_info: PageInfo,
    pub edges: Vec<Edge>,
}

impl Engine {
    /// Run the `edges.node` sub-selection of `tree` and wrap the nodes in a
    /// connection.
    pub async fn query_paginated(
        &self,
        ctx: &QueryContext,
        tree: &SelectionTree,
        hooks: &PaginationHooks<'_>,
    ) -> EngineResult<Connection> {
        if !tree.is_complex() {
            return Err(EngineError::EmptyResolveInfo);
        }
        let node_tree = tree
            .child_named("edges")
            .and_then(|edges| edges.child_named("node"))
            .ok_or(EngineError::MissingConnectionNodes)?;

        let mut nodes = self
            .query_with(ctx, node_tree, hooks.before_query.as_deref())
            .await?;
        if let Some(transform) = &hooks.transform_nodes {
            nodes = transform(nodes);
        }

        let count = nodes.len();
        let has_previous_page = (hooks.has_previous_page)(count);
        let has_next_page = (hooks.has_next_page)(count);

        let edges: Vec<Edge> = nodes
            .into_iter()
            .enumerate()
            .map(|(index, node)| {
                let cursor = (hooks.node_to_cursor)(&node, index);
                Edge { node, cursor }
            })
            .collect();

        tracing::debug!(
            edges = edges.len(),
            has_next_page,
            has_previous_page,
            "assembled connection"
        );

        Ok(Connection {
            page_info: PageInfo {
                start_cursor: edges.first().map(|e| e.cursor.clone()),
                end_cursor: edges.last().map(|e| e.cursor.clone()),
                has_next_page,
                has_previous_page,
            },
            edges,
        })
    }
}

/// Opaque cursor for a JSON key.
pub fn encode_cursor(key: &Value) -> String {
    URL_SAFE_NO_PAD.encode(key.to_string())
}

/// Reverse of [`encode_cursor`].
pub fn decode_cursor(cursor: &str) -> EngineResult<Value> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|e| EngineError::InvalidCursor(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| EngineError::InvalidCursor(e.to_string()))
}

/// Cursor function encoding one field of each node.
pub fn key_cursor(field: &str) -> impl Fn(&Value, usize) -> String + Send + Sync + '_ {
    move |node: &Value, _: usize| encode_cursor(node.get(field).unwrap_or(&Value::Null))
}
