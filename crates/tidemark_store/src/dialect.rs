use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Expr, ExprTrait, Index, IndexCreateStatement, Query, Value as SeaValue};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction, Statement};
use sea_orm_migration::SchemaManager;

use tidemark_core::{ID_COLUMN, IndexManifest, TidemarkError, TidemarkResult};

use crate::WriteMode;
use crate::db::{exec, exec_raw, query_all_raw, statement_failed};

/// Backend-specific DDL and bulk-delete behaviour, picked once per engine.
#[async_trait]
pub trait BackendDialect: Send + Sync + fmt::Debug {
    fn backend(&self) -> DatabaseBackend;

    fn name(&self) -> &'static str;

    /// Upper bound on bind parameters in one statement.
    fn max_bind_params(&self) -> usize;

    /// Type that SUM and AVG results are cast to before decoding.
    fn float_type(&self) -> &'static str;

    async fn list_indexes(&self, conn: &DatabaseConnection, table: &str)
    -> TidemarkResult<Vec<String>>;

    async fn list_columns(&self, conn: &DatabaseConnection, table: &str)
    -> TidemarkResult<Vec<String>>;

    async fn set_durability_mode(
        &self,
        conn: &DatabaseConnection,
        mode: WriteMode,
    ) -> TidemarkResult<()>;

    async fn create_index(
        &self,
        conn: &DatabaseConnection,
        table: &str,
        index: &IndexManifest,
    ) -> TidemarkResult<()> {
        let stmt = index_statement(table, index, true);
        SchemaManager::new(conn)
            .create_index(stmt)
            .await
            .map_err(|err| TidemarkError::storage(format!("create index {}: {err}", index.name)))
    }

    /// Deletes rows by primary key inside a write session.
    async fn delete_by_ids(
        &self,
        txn: &DatabaseTransaction,
        table: &str,
        ids: &[String],
    ) -> TidemarkResult<u64> {
        delete_by_ids_in(txn, table, ids).await
    }
}

pub fn dialect_for(backend: DatabaseBackend) -> TidemarkResult<Arc<dyn BackendDialect>> {
    match backend {
        DatabaseBackend::Sqlite => Ok(Arc::new(SqliteDialect)),
        DatabaseBackend::Postgres => Ok(Arc::new(PostgresDialect)),
        DatabaseBackend::MySql => Ok(Arc::new(MysqlDialect)),
        #[allow(unreachable_patterns)]
        other => Err(TidemarkError::config(format!(
            "unsupported database backend {other:?}"
        ))),
    }
}

fn index_statement(table: &str, index: &IndexManifest, if_not_exists: bool) -> IndexCreateStatement {
    let mut stmt = Index::create();
    stmt.name(&index.name).table(Alias::new(table));
    for column in &index.columns {
        stmt.col(Alias::new(column));
    }
    if index.unique {
        stmt.unique();
    }
    if if_not_exists {
        stmt.if_not_exists();
    }
    stmt.to_owned()
}

async fn delete_by_ids_in(
    txn: &DatabaseTransaction,
    table: &str,
    ids: &[String],
) -> TidemarkResult<u64> {
    let condition = match ids {
        [] => return Ok(0),
        [single] => Expr::col(Alias::new(ID_COLUMN)).eq(single.as_str()),
        many => Expr::col(Alias::new(ID_COLUMN)).is_in(many.iter().map(String::as_str)),
    };
    let delete = Query::delete()
        .from_table(Alias::new(table))
        .and_where(condition)
        .to_owned();
    exec(txn, &delete).await
}

async fn names_from(
    conn: &DatabaseConnection,
    stmt: Statement,
    column: &str,
) -> TidemarkResult<Vec<String>> {
    let rows = query_all_raw(conn, stmt).await?;
    let mut names = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get("", column)?;
        if !names.contains(&name) {
            names.push(name);
        }
    }
    Ok(names)
}

fn quote_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[derive(Debug)]
pub struct SqliteDialect;

#[async_trait]
impl BackendDialect for SqliteDialect {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Sqlite
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn max_bind_params(&self) -> usize {
        32_766
    }

    fn float_type(&self) -> &'static str {
        "REAL"
    }

    async fn list_indexes(
        &self,
        conn: &DatabaseConnection,
        table: &str,
    ) -> TidemarkResult<Vec<String>> {
        let sql = format!("PRAGMA index_list('{}')", quote_literal(table));
        names_from(conn, Statement::from_string(self.backend(), sql), "name").await
    }

    async fn list_columns(
        &self,
        conn: &DatabaseConnection,
        table: &str,
    ) -> TidemarkResult<Vec<String>> {
        let sql = format!("PRAGMA table_info('{}')", quote_literal(table));
        names_from(conn, Statement::from_string(self.backend(), sql), "name").await
    }

    async fn set_durability_mode(
        &self,
        conn: &DatabaseConnection,
        mode: WriteMode,
    ) -> TidemarkResult<()> {
        let journal = match mode {
            WriteMode::Fast => "WAL",
            WriteMode::Durable => "DELETE",
        };
        let sql = format!("PRAGMA journal_mode={journal}");
        query_all_raw(conn, Statement::from_string(self.backend(), sql)).await?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct PostgresDialect;

#[async_trait]
impl BackendDialect for PostgresDialect {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Postgres
    }

    fn name(&self) -> &'static str {
        "postgres"
    }

    fn max_bind_params(&self) -> usize {
        65_535
    }

    fn float_type(&self) -> &'static str {
        "DOUBLE PRECISION"
    }

    async fn list_indexes(
        &self,
        conn: &DatabaseConnection,
        table: &str,
    ) -> TidemarkResult<Vec<String>> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "SELECT indexname FROM pg_indexes WHERE tablename = $1",
            [table.into()],
        );
        names_from(conn, stmt, "indexname").await
    }

    async fn list_columns(
        &self,
        conn: &DatabaseConnection,
        table: &str,
    ) -> TidemarkResult<Vec<String>> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "SELECT column_name FROM information_schema.columns WHERE table_name = $1",
            [table.into()],
        );
        names_from(conn, stmt, "column_name").await
    }

    async fn set_durability_mode(
        &self,
        _conn: &DatabaseConnection,
        mode: WriteMode,
    ) -> TidemarkResult<()> {
        // Postgres always journals through its WAL.
        log::debug!("postgres ignores write mode {mode:?}");
        Ok(())
    }

    async fn delete_by_ids(
        &self,
        txn: &DatabaseTransaction,
        table: &str,
        ids: &[String],
    ) -> TidemarkResult<u64> {
        if ids.len() < 2 {
            return delete_by_ids_in(txn, table, ids).await;
        }
        let sql = format!(
            "DELETE FROM \"{}\" WHERE \"{ID_COLUMN}\" = ANY($1)",
            table.replace('"', "\"\"")
        );
        let array: SeaValue = ids.to_vec().into();
        exec_raw(
            txn,
            Statement::from_sql_and_values(self.backend(), sql, [array]),
        )
        .await
    }
}

#[derive(Debug)]
pub struct MysqlDialect;

#[async_trait]
impl BackendDialect for MysqlDialect {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::MySql
    }

    fn name(&self) -> &'static str {
        "mysql"
    }

    fn max_bind_params(&self) -> usize {
        65_535
    }

    fn float_type(&self) -> &'static str {
        "DOUBLE"
    }

    async fn list_indexes(
        &self,
        conn: &DatabaseConnection,
        table: &str,
    ) -> TidemarkResult<Vec<String>> {
        let sql = format!("SHOW INDEX FROM `{}`", table.replace('`', "``"));
        names_from(conn, Statement::from_string(self.backend(), sql), "Key_name").await
    }

    async fn list_columns(
        &self,
        conn: &DatabaseConnection,
        table: &str,
    ) -> TidemarkResult<Vec<String>> {
        let sql = format!("SHOW COLUMNS FROM `{}`", table.replace('`', "``"));
        names_from(conn, Statement::from_string(self.backend(), sql), "Field").await
    }

    async fn set_durability_mode(
        &self,
        conn: &DatabaseConnection,
        mode: WriteMode,
    ) -> TidemarkResult<()> {
        let (flush, sync) = match mode {
            WriteMode::Fast => (2, 0),
            WriteMode::Durable => (1, 1),
        };
        for sql in [
            format!("SET GLOBAL innodb_flush_log_at_trx_commit = {flush}"),
            format!("SET GLOBAL sync_binlog = {sync}"),
        ] {
            exec_raw(conn, Statement::from_string(self.backend(), sql)).await?;
        }
        Ok(())
    }

    async fn create_index(
        &self,
        conn: &DatabaseConnection,
        table: &str,
        index: &IndexManifest,
    ) -> TidemarkResult<()> {
        // MySQL has no CREATE INDEX IF NOT EXISTS; callers check the live index list first.
        let stmt = index_statement(table, index, false);
        let sql = stmt.to_string(sea_orm::sea_query::MysqlQueryBuilder);
        conn.execute_raw(Statement::from_string(self.backend(), sql.clone()))
            .await
            .map_err(|err| statement_failed(&sql, err))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::sea_query::Func;

    #[test]
    fn dialects_report_bind_limits() {
        let sqlite = dialect_for(DatabaseBackend::Sqlite).expect("sqlite");
        assert_eq!(sqlite.name(), "sqlite");
        assert_eq!(sqlite.max_bind_params(), 32_766);
        let pg = dialect_for(DatabaseBackend::Postgres).expect("postgres");
        assert_eq!(pg.max_bind_params(), 65_535);
    }

    #[test]
    fn sums_cast_to_backend_float() {
        let pg = dialect_for(DatabaseBackend::Postgres).expect("postgres");
        let sum = Func::cast_as(Func::sum(Expr::col(Alias::new("volume"))), pg.float_type());
        let sql = Query::select()
            .expr_as(sum, Alias::new("sum"))
            .from(Alias::new("bars"))
            .to_string(sea_orm::sea_query::PostgresQueryBuilder);
        assert_eq!(
            sql,
            r#"SELECT CAST(SUM("volume") AS DOUBLE PRECISION) AS "sum" FROM "bars""#
        );
        let mysql = dialect_for(DatabaseBackend::MySql).expect("mysql");
        assert_eq!(mysql.float_type(), "DOUBLE");
    }

    #[test]
    fn index_statement_lists_columns() {
        let index = IndexManifest {
            name: "bars_timestamp_entity_id_index".into(),
            columns: vec!["timestamp".into(), "entity_id".into()],
            unique: false,
        };
        let sql = index_statement("bars", &index, true).to_string(sea_orm::sea_query::SqliteQueryBuilder);
        assert!(sql.contains("IF NOT EXISTS"));
        assert!(sql.contains("\"bars_timestamp_entity_id_index\""));
        assert!(sql.contains("\"timestamp\", \"entity_id\""));
    }
}
