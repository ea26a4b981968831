//! Engine error types.

use thiserror::Error;

/// Errors raised while compiling a selection into SQL, executing it, or
/// reshaping the result.
///
/// Every variant is a request-level failure. Nothing here is retried by the
/// engine; schema and configuration defects surface with enough context to
/// find the offending type and field.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Resolve info is empty")]
    EmptyResolveInfo,

    #[error("malformed selection: {0}")]
    MalformedSelection(String),

    #[error("Could not find relation {type_name}.{field}")]
    RelationNotFound { type_name: String, field: String },

    #[error(
        "relation between {parent} and {child} uses a composite foreign key ({columns} columns), which is not supported"
    )]
    CompositeForeignKey {
        parent: String,
        child: String,
        columns: usize,
    },

    #[error("field {type_name}.{field} selects more than one concrete type: {candidates:?}")]
    AmbiguousFieldType {
        type_name: String,
        field: String,
        candidates: Vec<String>,
    },

    #[error("alias redirection for {type_name}.{field} loops back on itself")]
    AliasCycle { type_name: String, field: String },

    #[error("selection exceeds the maximum nesting depth of {limit}")]
    SelectionTooDeep { limit: usize },

    #[error("connection selection has no edges.node subtree")]
    MissingConnectionNodes,

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("failed to decode result row")]
    Decode(#[from] serde_json::Error),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Shorthand for the unresolvable-relation error.
    pub fn relation_not_found(type_name: &str, field: &str) -> Self {
        Self::RelationNotFound {
            type_name: type_name.to_string(),
            field: field.to_string(),
        }
    }
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;
