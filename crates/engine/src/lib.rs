//! Prism Engine Library
//!
//! Compiles a nested field selection into one PostgreSQL statement that
//! aggregates nested rows as JSON, runs it, and reshapes the rows back into
//! the requested tree. The `prism` binary wraps it for command-line use.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod metadata;
pub mod relation;
pub mod selection;

pub use db::{PgExecutor, QueryExecutor};
pub use engine::{Connection, Edge, Engine, PageInfo, PaginationHooks, QueryContext};
pub use error::{EngineError, EngineResult};
pub use mapping::{FieldMapping, MappingDeclaration, MappingRegistry};
pub use metadata::{MetadataProvider, PgCatalog, RelationKind, StaticMetadata, TypeMetadata};
pub use relation::RelationDescriptor;
pub use selection::SelectionTree;
