//! PostgreSQL catalog introspection.
//!
//! Loads table columns from `information_schema` and foreign keys from
//! `pg_constraint` once at startup. Each table becomes a type of the same
//! name. Every foreign key produces two relations:
//! - on the referencing table: `many-to-one` (or `one-to-one` when the key
//!   columns are unique)
//! - on the referenced table: the inverse `one-to-many` (or `one-to-one`)
//!
//! Constraint names are only unique per table, so keys are grouped by
//! `(table, constraint)`.
//!
//! A self-referencing key (`users.manager_id -> users.id`) puts both
//! directions on the same type, and relation discovery takes the first one.
//! Fields that need the other direction require a relation mapping.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{JoinColumn, RelationKind, RelationMetadata, StaticMetadata, TypeMetadata};

/// Loader for [`StaticMetadata`] backed by the live database schema.
pub struct PgCatalog;

#[derive(Debug, Clone, sqlx::FromRow)]
struct ColumnRow {
    table_name: String,
    column_name: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ForeignKeyRow {
    constraint_name: String,
    table_name: String,
    column_name: String,
    referenced_table: String,
    referenced_column: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct UniqueKeyRow {
    constraint_name: String,
    table_name: String,
    column_name: String,
}

impl PgCatalog {
    /// Introspect every table in `schema`.
    pub async fn load(pool: &PgPool, schema: &str) -> Result<StaticMetadata> {
        let columns = sqlx::query_as::<_, ColumnRow>(
            r#"
            SELECT table_name::text AS table_name, column_name::text AS column_name
            FROM information_schema.columns
            WHERE table_schema = $1
            ORDER BY table_name, ordinal_position
            "#,
        )
        .bind(schema)
        .fetch_all(pool)
        .await
        .context("failed to load table columns")?;

        let foreign_keys = sqlx::query_as::<_, ForeignKeyRow>(
            r#"
            SELECT
                c.conname::text AS constraint_name,
                src.relname::text AS table_name,
                src_att.attname::text AS column_name,
                dst.relname::text AS referenced_table,
                dst_att.attname::text AS referenced_column
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class src ON src.oid = c.conrelid
            JOIN pg_catalog.pg_namespace ns ON ns.oid = src.relnamespace
            JOIN pg_catalog.pg_class dst ON dst.oid = c.confrelid
            CROSS JOIN LATERAL unnest(c.conkey, c.confkey)
                WITH ORDINALITY AS k(attnum, referenced_attnum, position)
            JOIN pg_catalog.pg_attribute src_att
              ON src_att.attrelid = c.conrelid AND src_att.attnum = k.attnum
            JOIN pg_catalog.pg_attribute dst_att
              ON dst_att.attrelid = c.confrelid AND dst_att.attnum = k.referenced_attnum
            WHERE c.contype = 'f'
              AND ns.nspname = $1
            ORDER BY src.relname, c.conname, k.position
            "#,
        )
        .bind(schema)
        .fetch_all(pool)
        .await
        .context("failed to load foreign keys")?;

        let unique_keys = sqlx::query_as::<_, UniqueKeyRow>(
            r#"
            SELECT
                tc.constraint_name::text AS constraint_name,
                tc.table_name::text AS table_name,
                kcu.column_name::text AS column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON kcu.constraint_schema = tc.constraint_schema
             AND kcu.constraint_name = tc.constraint_name
             AND kcu.table_name = tc.table_name
            WHERE tc.table_schema = $1
              AND tc.constraint_type IN ('UNIQUE', 'PRIMARY KEY')
            "#,
        )
        .bind(schema)
        .fetch_all(pool)
        .await
        .context("failed to load unique keys")?;

        let catalog = assemble(columns, foreign_keys, unique_keys);
        tracing::info!(schema, types = catalog.len(), "loaded catalog metadata");
        Ok(catalog)
    }
}

/// Build metadata from raw catalog rows.
fn assemble(
    columns: Vec<ColumnRow>,
    foreign_keys: Vec<ForeignKeyRow>,
    unique_keys: Vec<UniqueKeyRow>,
) -> StaticMetadata {
    let mut types: BTreeMap<String, TypeMetadata> = BTreeMap::new();
    for row in columns {
        types
            .entry(row.table_name.clone())
            .or_insert_with(|| TypeMetadata::new(row.table_name))
            .columns
            .push(row.column_name);
    }

    // table -> set of unique column sets
    let mut unique_sets: HashMap<String, HashMap<String, Vec<String>>> = HashMap::new();
    for row in unique_keys {
        unique_sets
            .entry(row.table_name)
            .or_default()
            .entry(row.constraint_name)
            .or_default()
            .push(row.column_name);
    }
    let is_unique = |table: &str, cols: &[JoinColumn]| {
        let wanted: HashSet<&str> = cols.iter().map(|c| c.column.as_str()).collect();
        unique_sets.get(table).is_some_and(|sets| {
            sets.values()
                .any(|set| set.iter().map(String::as_str).collect::<HashSet<_>>() == wanted)
        })
    };

    // (table, constraint) -> (referenced table, column pairs), in key order
    let mut constraints: BTreeMap<(String, String), (String, Vec<JoinColumn>)> = BTreeMap::new();
    for row in foreign_keys {
        constraints
            .entry((row.table_name, row.constraint_name))
            .or_insert_with(|| (row.referenced_table, Vec::new()))
            .1
            .push(JoinColumn {
                column: row.column_name,
                referenced_column: row.referenced_column,
            });
    }

    for ((table, constraint), (referenced, join_columns)) in constraints {
        if table == referenced {
            tracing::warn!(
                table = %table,
                constraint = %constraint,
                "self-referencing foreign key; fields needing the inverse direction require a relation mapping"
            );
        }
        let one_to_one = is_unique(&table, &join_columns);
        let inverse_columns = join_columns
            .iter()
            .map(|c| JoinColumn {
                column: c.referenced_column.clone(),
                referenced_column: c.column.clone(),
            })
            .collect();

        if let Some(owner) = types.get_mut(&table) {
            owner.relations.push(RelationMetadata {
                target: referenced.clone(),
                kind: if one_to_one {
                    RelationKind::OneToOne
                } else {
                    RelationKind::ManyToOne
                },
                join_columns,
            });
        }
        if let Some(target) = types.get_mut(&referenced) {
            target.relations.push(RelationMetadata {
                target: table,
                kind: if one_to_one {
                    RelationKind::OneToOne
                } else {
                    RelationKind::OneToMany
                },
                join_columns: inverse_columns,
            });
        }
    }

    types
        .into_values()
        .fold(StaticMetadata::new(), |catalog, meta| catalog.with(meta))
}
