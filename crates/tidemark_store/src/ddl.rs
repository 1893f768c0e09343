use sea_orm::sea_query::{Alias, ColumnDef, Table};
use sea_orm_migration::SchemaManager;
use serde::Serialize;

use tidemark_core::{ColumnSpec, SchemaDescriptor, TidemarkError, TidemarkResult, ValueType};

use crate::backends::Engine;

/// Outcome of one reconciliation pass over a table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub table: String,
    pub added_columns: Vec<String>,
    pub created_indexes: Vec<String>,
    pub failures: Vec<String>,
}

fn column_def(spec: &ColumnSpec) -> ColumnDef {
    let mut def = ColumnDef::new(Alias::new(&spec.name));
    match spec.value_type {
        ValueType::Str => def.string(),
        ValueType::Text | ValueType::Json => def.text(),
        ValueType::I64 | ValueType::Time => def.big_integer(),
        ValueType::F64 => def.double(),
        ValueType::Bool => def.boolean(),
    };
    if spec.primary_key {
        def.not_null().primary_key();
    } else if !spec.nullable {
        def.not_null();
    }
    def
}

pub(crate) async fn create_table(engine: &Engine, schema: &SchemaDescriptor) -> TidemarkResult<()> {
    let mut table = Table::create();
    table.table(Alias::new(&schema.table)).if_not_exists();
    for spec in &schema.columns {
        table.col(column_def(spec));
    }
    SchemaManager::new(engine.connection())
        .create_table(table.to_owned())
        .await
        .map_err(|err| {
            log::error!("create table {} failed: {err}", schema.table);
            TidemarkError::storage(format!("create table {}: {err}", schema.table))
        })
}

/// Applies the durability mode, adds missing columns and creates missing
/// indexes. Each step is attempted independently; failures are logged and
/// reported, never raised.
pub(crate) async fn reconcile_table(engine: &Engine, schema: &SchemaDescriptor) -> ReconcileReport {
    let mut report = ReconcileReport {
        table: schema.table.clone(),
        ..ReconcileReport::default()
    };
    let conn = engine.connection();
    let dialect = engine.dialect();
    let mode = engine.write_mode().unwrap_or_default();

    if let Err(err) = dialect.set_durability_mode(conn, mode).await {
        log::warn!(
            "{}/{}: set write mode {mode:?} failed: {err}",
            engine.provider(),
            engine.database()
        );
        report.failures.push(format!("write mode: {err}"));
    }

    match dialect.list_columns(conn, &schema.table).await {
        Ok(existing) => {
            for spec in schema
                .columns
                .iter()
                .filter(|spec| !existing.contains(&spec.name))
            {
                // Added columns are always nullable; existing rows have no value.
                let added = ColumnSpec {
                    nullable: true,
                    primary_key: false,
                    ..spec.clone()
                };
                let alter = Table::alter()
                    .table(Alias::new(&schema.table))
                    .add_column(column_def(&added))
                    .to_owned();
                match SchemaManager::new(conn).alter_table(alter).await {
                    Ok(()) => {
                        log::info!("{}: added column {}", schema.table, spec.name);
                        report.added_columns.push(spec.name.clone());
                    }
                    Err(err) => {
                        log::warn!("{}: add column {} failed: {err}", schema.table, spec.name);
                        report.failures.push(format!("column {}: {err}", spec.name));
                    }
                }
            }
        }
        Err(err) => {
            log::warn!("{}: list columns failed: {err}", schema.table);
            report.failures.push(format!("list columns: {err}"));
        }
    }

    match dialect.list_indexes(conn, &schema.table).await {
        Ok(existing) => {
            log::debug!("{}: existing indexes {existing:?}", schema.table);
            for index in schema
                .planned_indexes()
                .into_iter()
                .filter(|index| !existing.contains(&index.name))
            {
                match dialect.create_index(conn, &schema.table, &index).await {
                    Ok(()) => report.created_indexes.push(index.name),
                    Err(err) => {
                        log::warn!("{}: create index {} failed: {err}", schema.table, index.name);
                        report.failures.push(format!("index {}: {err}", index.name));
                    }
                }
            }
        }
        Err(err) => {
            log::warn!("{}: list indexes failed: {err}", schema.table);
            report.failures.push(format!("list indexes: {err}"));
        }
    }

    report
}
