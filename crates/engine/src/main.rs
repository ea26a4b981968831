//! Prism command-line interface.
//!
//! Introspects a database, shows the SQL a selection compiles to, or runs a
//! selection and prints the reshaped rows.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use prism_engine::config::Config;
use prism_engine::db;
use prism_engine::{
    Engine, MappingDeclaration, MappingRegistry, PgCatalog, PgExecutor, QueryContext,
    SelectionTree,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the introspected table metadata as JSON.
    Introspect,

    /// Print the SQL synthesized for a selection.
    Sql {
        /// Selection tree JSON file (resolve-info shape).
        #[arg(long)]
        selection: PathBuf,
    },

    /// Execute a selection and print the resulting objects.
    Query {
        /// Selection tree JSON file (resolve-info shape).
        #[arg(long)]
        selection: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    let pool = db::create_pool(&config).await?;
    if !db::check_health(&pool).await {
        anyhow::bail!("database health check failed");
    }
    let metadata = PgCatalog::load(&pool, &config.database_schema)
        .await
        .context("failed to introspect database schema")?;
    info!(
        schema = %config.database_schema,
        types = metadata.len(),
        "Catalog loaded"
    );

    if let Command::Introspect = args.command {
        let types: Vec<_> = metadata.types().collect();
        println!("{}", serde_json::to_string_pretty(&types)?);
        return Ok(());
    }

    let registry = load_registry(&config)?;
    let engine = Engine::new(registry, Arc::new(metadata)).with_max_depth(config.max_selection_depth);
    let executor = PgExecutor::new(pool).with_statement_timeout(config.statement_timeout);
    let ctx = QueryContext::new(Arc::new(executor));

    match args.command {
        Command::Introspect => {}
        Command::Sql { selection } => {
            let tree = read_selection(&selection)?;
            println!("{}", engine.to_sql(&ctx, &tree)?);
        }
        Command::Query { selection } => {
            let tree = read_selection(&selection)?;
            let rows = engine.query(&ctx, &tree).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }

    Ok(())
}

fn load_registry(config: &Config) -> Result<Arc<MappingRegistry>> {
    let mut builder = MappingRegistry::builder();

    if let Some(path) = &config.mappings_path {
        let declaration = MappingDeclaration::load(path)?;
        for warning in builder.apply_declaration(declaration) {
            warn!(path = %path.display(), "{warning}");
        }
        info!(path = %path.display(), "Mapping declarations applied");
    }

    Ok(builder.build())
}

fn read_selection(path: &Path) -> Result<SelectionTree> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read selection {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("selection {} is not valid JSON", path.display()))?;
    Ok(SelectionTree::from_json(value)?)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("prism=info,prism_engine=info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
