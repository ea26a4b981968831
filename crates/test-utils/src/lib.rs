//! Prism test utilities.
//!
//! Helpers for integration testing: a blog schema fixture, a stub executor
//! that records SQL and replays canned rows, and assertion utilities.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use prism_engine::db::QueryExecutor;
use prism_engine::{QueryContext, RelationKind, SelectionTree, StaticMetadata, TypeMetadata};

/// Blog schema: `users`, `posts.author_id -> users.id`,
/// `comments.post_id -> posts.id`.
pub fn blog_metadata() -> StaticMetadata {
    StaticMetadata::new()
        .with(TypeMetadata::new("users").columns(["id", "name"]))
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
}

/// `posts { id title author { id name } }`
pub fn posts_with_author() -> SelectionTree {
    SelectionTree::object(
        "posts",
        "posts",
        [
            SelectionTree::leaf("id"),
            SelectionTree::leaf("title"),
            SelectionTree::object(
                "author",
                "users",
                [SelectionTree::leaf("id"), SelectionTree::leaf("name")],
            ),
        ],
    )
}

/// `posts { edges { node { <fields> } cursor } pageInfo { ... } }`
pub fn connection_of(
    name: &str,
    connection_type: &str,
    node_type: &str,
    fields: impl IntoIterator<Item = SelectionTree>,
) -> SelectionTree {
    SelectionTree::object(
        name,
        connection_type,
        [
            SelectionTree::object(
                "edges",
                format!("{connection_type}Edge"),
                [
                    SelectionTree::object("node", node_type, fields),
                    SelectionTree::leaf("cursor"),
                ],
            ),
            SelectionTree::object(
                "pageInfo",
                "PageInfo",
                [
                    SelectionTree::leaf("hasNextPage"),
                    SelectionTree::leaf("endCursor"),
                ],
            ),
        ],
    )
}

type Responder = Box<dyn Fn(&str) -> Result<Vec<Value>, sqlx::Error> + Send + Sync>;

/// [`QueryExecutor`] that records every statement and answers from a
/// closure instead of a database.
pub struct StubExecutor {
    executed: Mutex<Vec<String>>,
    responder: Responder,
}

impl StubExecutor {
    /// Answer every statement with no rows.
    pub fn empty() -> Self {
        Self::with_responder(|_| Ok(Vec::new()))
    }

    /// Answer every statement with the same rows.
    pub fn with_rows(rows: Vec<Value>) -> Self {
        Self::with_responder(move |_| Ok(rows.clone()))
    }

    /// Compute rows from the rendered SQL.
    pub fn with_responder<F>(f: F) -> Self
    where
        F: Fn(&str) -> Result<Vec<Value>, sqlx::Error> + Send + Sync + 'static,
    {
        Self {
            executed: Mutex::new(Vec::new()),
            responder: Box::new(f),
        }
    }

    /// Fail every statement as the database would.
    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::with_responder(move |_| Err(sqlx::Error::Protocol(message.clone())))
    }

    /// Every statement executed so far, oldest first.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    /// Most recent statement.
    pub fn last_sql(&self) -> Option<String> {
        self.executed.lock().last().cloned()
    }
}

#[async_trait]
impl QueryExecutor for StubExecutor {
    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Value>, sqlx::Error> {
        self.executed.lock().push(sql.to_string());
        (self.responder)(sql)
    }
}

/// Context whose database session is `executor`.
pub fn stub_context(executor: &Arc<StubExecutor>) -> QueryContext {
    QueryContext::new(executor.clone())
}

/// Assertion helpers for JSON results and rendered SQL.
pub mod assert {
    use serde_json::Value;

    /// Assert that an object has exactly these keys, in any order.
    pub fn keys_eq(value: &Value, expected: &[&str]) {
        let mut actual: Vec<&str> = value
            .as_object()
            .map(|o| o.keys().map(String::as_str).collect())
            .unwrap_or_default();
        actual.sort_unstable();
        let mut expected = expected.to_vec();
        expected.sort_unstable();
        assert_eq!(actual, expected, "key mismatch in {value}");
    }

    /// Assert that a JSON value equals expected.
    pub fn json_eq(actual: &Value, expected: &Value) {
        assert_eq!(
            actual,
            expected,
            "JSON mismatch:\nactual: {}\nexpected: {}",
            serde_json::to_string_pretty(actual).unwrap_or_default(),
            serde_json::to_string_pretty(expected).unwrap_or_default()
        );
    }

    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{needle}'\nActual: {haystack}"
        );
    }
}
