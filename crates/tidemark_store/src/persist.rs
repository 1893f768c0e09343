use std::borrow::Cow;
use std::collections::HashSet;

use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Expr, ExprTrait, Query, Value as SeaValue};

use tidemark_core::{
    ColumnSpec, Frame, ID_COLUMN, PersistApi, QueryRequest, SchemaDescriptor, TidemarkError,
    TidemarkResult, UpsertOptions, Value,
};

use crate::TidemarkStore;
use crate::backends::Engine;
use crate::db::{exec, query_all, to_sea_value};
use crate::query::build_condition;

impl TidemarkStore {
    fn chunk_rows(&self, engine: &Engine, options: &UpsertOptions, width: usize) -> usize {
        let requested = options.chunk_size.unwrap_or(self.chunk_size()).max(1);
        let bind_cap = (engine.dialect().max_bind_params() / width.max(1)).max(1);
        requested.min(bind_cap)
    }

    async fn write_chunk(
        &self,
        engine: &Engine,
        schema: &SchemaDescriptor,
        columns: &[&ColumnSpec],
        chunk: &Frame,
        options: &UpsertOptions,
    ) -> TidemarkResult<usize> {
        let ids: Vec<String> = chunk
            .column(ID_COLUMN)
            .unwrap_or_default()
            .iter()
            .map(Value::key_string)
            .collect();
        let session = engine.session().await?;

        let rows: Vec<usize> = if options.force_update {
            let deleted = engine
                .dialect()
                .delete_by_ids(session.transaction(), &schema.table, &ids)
                .await?;
            log::debug!("{}: replaced {deleted} existing rows", schema.table);
            (0..chunk.len()).collect()
        } else if options.require_check {
            let select = Query::select()
                .column(Alias::new(ID_COLUMN))
                .from(Alias::new(&schema.table))
                .and_where(Expr::col(Alias::new(ID_COLUMN)).is_in(ids.iter().map(String::as_str)))
                .to_owned();
            let mut existing = HashSet::new();
            for row in query_all(session.transaction(), &select).await? {
                let id: String = row.try_get("", ID_COLUMN)?;
                existing.insert(id);
            }
            (0..chunk.len())
                .filter(|idx| !existing.contains(&ids[*idx]))
                .collect()
        } else {
            (0..chunk.len()).collect()
        };

        if rows.is_empty() {
            session.commit().await?;
            return Ok(0);
        }

        let mut insert = Query::insert();
        insert
            .into_table(Alias::new(&schema.table))
            .columns(columns.iter().map(|spec| Alias::new(&spec.name)));
        for idx in &rows {
            let values = columns
                .iter()
                .map(|spec| {
                    let value = chunk.value(*idx, &spec.name).unwrap_or(&Value::Null);
                    to_sea_value(value, spec.value_type)
                })
                .collect::<TidemarkResult<Vec<SeaValue>>>()?;
            insert
                .values(values.into_iter().map(Into::into))
                .map_err(|err| TidemarkError::storage(format!("build insert: {err}")))?;
        }
        exec(session.transaction(), &insert).await?;
        session.commit().await?;
        Ok(rows.len())
    }
}

#[async_trait]
impl PersistApi for TidemarkStore {
    async fn upsert(
        &self,
        schema: &SchemaDescriptor,
        provider: &str,
        frame: &Frame,
        options: UpsertOptions,
    ) -> TidemarkResult<usize> {
        if frame.is_empty() {
            return Ok(0);
        }
        let schema = self.resolve_schema(schema)?;
        let engine = self.engine_for(schema, Some(provider)).await?;

        let mut data = Cow::Borrowed(frame);
        if options.drop_duplicates && data.has_column(ID_COLUMN) {
            let (deduped, duplicated) = data.drop_duplicates_keep_last(ID_COLUMN)?;
            if !duplicated.is_empty() {
                log::warn!(
                    "{}: dropped {} rows with duplicated ids {duplicated:?}",
                    schema.name,
                    frame.len() - deduped.len()
                );
                data = Cow::Owned(deduped);
            }
        }

        let columns: Vec<&ColumnSpec> = schema
            .columns
            .iter()
            .filter(|spec| data.has_column(&spec.name))
            .collect();
        if columns.is_empty() {
            return Err(TidemarkError::schema_contract(format!(
                "dataset shares no columns with {}",
                schema.name
            )));
        }
        if !data.has_column(ID_COLUMN) {
            return Err(TidemarkError::schema_contract(format!(
                "dataset for {} has no '{ID_COLUMN}' column",
                schema.name
            )));
        }

        let chunk_rows = self.chunk_rows(&engine, &options, columns.len());
        let mut written = 0;
        let mut start = 0;
        while start < data.len() {
            let chunk = data.slice(start, start + chunk_rows);
            written += self
                .write_chunk(&engine, schema, &columns, &chunk, &options)
                .await?;
            start += chunk_rows;
        }
        log::info!(
            "{provider}: wrote {written} of {} rows into {}",
            data.len(),
            schema.table
        );
        Ok(written)
    }

    async fn delete(&self, schema: &SchemaDescriptor, request: &QueryRequest) -> TidemarkResult<u64> {
        let schema = self.resolve_schema(schema)?;
        let cond = build_condition(schema, request)?;
        let delete = Query::delete()
            .from_table(Alias::new(&schema.table))
            .cond_where(cond)
            .to_owned();
        let engine = self.engine_for(schema, request.provider.as_deref()).await?;
        let session = engine.session().await?;
        let deleted = exec(session.transaction(), &delete).await?;
        session.commit().await?;
        log::info!("{}: deleted {deleted} rows", schema.table);
        Ok(deleted)
    }
}
