use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tidemark_store::{
    AdjustType, IntervalLevel, QueryApi, QueryRequest, SchemaDescriptor, SchemaGroup,
    StoreBuilder, StoreConfig, TidemarkStore, load_or_init_config,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Schemas(args) => export_schemas(args).await,
        Command::Reconcile(args) => reconcile(args).await,
        Command::Count(args) => count_rows(args).await,
    }
}

#[derive(Parser)]
#[command(author, version, about = "Developer utilities for tidemark datastores")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the manifest of the built-in schema catalog as JSON.
    Schemas(SchemasArgs),
    /// Add missing columns and indexes to every catalog table.
    Reconcile(DatastoreArgs),
    /// Print row counts per catalog schema for one provider.
    Count(CountArgs),
}

#[derive(Parser)]
struct DatastoreArgs {
    /// Directory holding tidemark.json and the sqlite files.
    #[arg(long, default_value = ".tidemark")]
    datastore: PathBuf,
    /// Providers the catalog is registered for.
    #[arg(long = "provider", default_values_t = vec!["em".to_string()])]
    providers: Vec<String>,
}

#[derive(Parser)]
struct SchemasArgs {
    #[command(flatten)]
    store: DatastoreArgs,
    /// Write the manifest here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Parser)]
struct CountArgs {
    #[command(flatten)]
    store: DatastoreArgs,
    /// Provider whose tables are counted (defaults to the first registered).
    #[arg(long)]
    of: Option<String>,
}

/// Entity and bar schemas every datastore carries.
fn catalog() -> Vec<(&'static str, SchemaGroup, &'static str)> {
    vec![
        (
            "stock_kdata",
            SchemaGroup::kdata(
                "stock_kdata",
                "stock",
                &[IntervalLevel::Min5, IntervalLevel::Day1, IntervalLevel::Week1],
                &[None, Some(AdjustType::Hfq)],
            ),
            "stock",
        ),
        (
            "index_kdata",
            SchemaGroup::kdata("index_kdata", "index", &[IntervalLevel::Day1], &[None]),
            "index",
        ),
    ]
}

async fn open_catalog(config: StoreConfig, args: &DatastoreArgs) -> Result<StoreBuilder> {
    let providers: Vec<&str> = args.providers.iter().map(String::as_str).collect();
    let mut builder = StoreBuilder::new(config, &args.datastore);
    for entity_type in ["stock", "index"] {
        builder
            .register_entity(&providers, "meta", entity_type, SchemaDescriptor::entity(entity_type))
            .await
            .with_context(|| format!("register {entity_type} entities"))?;
    }
    for (database, group, entity_type) in catalog() {
        builder
            .register_schema(&providers, database, group, Some(entity_type))
            .await
            .with_context(|| format!("register {database}"))?;
    }
    Ok(builder)
}

fn load_config(datastore: &Path) -> Result<StoreConfig> {
    load_or_init_config(datastore)
        .with_context(|| format!("load config from {}", datastore.display()))
}

async fn export_schemas(args: SchemasArgs) -> Result<()> {
    let config = load_config(&args.store.datastore)?;
    let store = open_catalog(config, &args.store).await?.build();
    let json = serde_json::to_string_pretty(&store.registry().manifest())?;
    match args.out {
        Some(out) => {
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create_dir_all {}", parent.display()))?;
            }
            fs::write(&out, format!("{json}\n"))
                .with_context(|| format!("write {}", out.display()))?;
            println!("Wrote schema manifest to {}", out.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn reconcile(args: DatastoreArgs) -> Result<()> {
    let config = load_config(&args.datastore)?.reconcile_ddl(true);
    let builder = open_catalog(config, &args).await?;
    let mut failed = 0;
    for report in builder.reconcile_reports() {
        println!(
            "{}: +{} columns, +{} indexes",
            report.table,
            report.added_columns.len(),
            report.created_indexes.len()
        );
        for failure in &report.failures {
            eprintln!("  {failure}");
            failed += 1;
        }
    }
    if failed > 0 {
        return Err(anyhow!("{failed} reconciliation steps failed"));
    }
    Ok(())
}

async fn provider_counts(store: &TidemarkStore, provider: &str) -> Result<Vec<(String, u64)>> {
    let mut counts = Vec::new();
    for schema in store.registry().schemas_for_provider(provider) {
        let total = store
            .count(schema, &QueryRequest::new().provider(provider))
            .await
            .with_context(|| format!("count {}", schema.name))?;
        counts.push((schema.name.clone(), total));
    }
    Ok(counts)
}

async fn count_rows(args: CountArgs) -> Result<()> {
    let config = load_config(&args.store.datastore)?;
    let store = open_catalog(config, &args.store).await?.build();
    let provider = match args.of {
        Some(provider) => provider,
        None => store
            .registry()
            .providers()
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("no providers registered"))?,
    };
    for (name, total) in provider_counts(&store, &provider).await? {
        println!("{name}\t{total}");
    }
    Ok(())
}
