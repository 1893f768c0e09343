use sea_orm::sea_query::{
    MysqlQueryBuilder, PostgresQueryBuilder, QueryStatementWriter, SqliteQueryBuilder,
    Value as SeaValue,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, DbErr, QueryResult, Statement};

use tidemark_core::{TidemarkError, TidemarkResult, Timestamp, Value, ValueType};

pub(crate) fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_orm::sea_query::Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

/// Logs the statement that failed and maps the error into the storage category.
pub(crate) fn statement_failed(sql: &str, err: DbErr) -> TidemarkError {
    log::error!("statement failed: {err}; sql: {sql}");
    TidemarkError::storage(err.to_string())
}

pub(crate) async fn exec<C, S>(conn: &C, stmt: &S) -> TidemarkResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    exec_raw(conn, Statement::from_sql_and_values(backend, sql, values)).await
}

pub(crate) async fn exec_raw<C: ConnectionTrait>(conn: &C, stmt: Statement) -> TidemarkResult<u64> {
    let sql = stmt.sql.clone();
    let result = conn
        .execute_raw(stmt)
        .await
        .map_err(|err| statement_failed(&sql, err))?;
    Ok(result.rows_affected())
}

pub(crate) async fn query_all<C, S>(conn: &C, stmt: &S) -> TidemarkResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    query_all_raw(conn, Statement::from_sql_and_values(backend, sql, values)).await
}

pub(crate) async fn query_all_raw<C: ConnectionTrait>(
    conn: &C,
    stmt: Statement,
) -> TidemarkResult<Vec<QueryResult>> {
    let sql = stmt.sql.clone();
    conn.query_all_raw(stmt)
        .await
        .map_err(|err| statement_failed(&sql, err))
}

pub(crate) async fn query_one<C, S>(conn: &C, stmt: &S) -> TidemarkResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    conn.query_one_raw(Statement::from_sql_and_values(backend, sql.clone(), values))
        .await
        .map_err(|err| statement_failed(&sql, err))
}

fn null_of(value_type: ValueType) -> SeaValue {
    match value_type {
        ValueType::Str | ValueType::Text | ValueType::Json => SeaValue::String(None),
        ValueType::I64 | ValueType::Time => SeaValue::BigInt(None),
        ValueType::F64 => SeaValue::Double(None),
        ValueType::Bool => SeaValue::Bool(None),
    }
}

/// Binds a dynamic value to the storage type of its column.
pub(crate) fn to_sea_value(value: &Value, value_type: ValueType) -> TidemarkResult<SeaValue> {
    let mismatch = || {
        TidemarkError::schema_contract(format!(
            "value {value:?} does not fit a {} column",
            value_type.as_str()
        ))
    };
    Ok(match (value_type, value) {
        (_, Value::Null) => null_of(value_type),
        (ValueType::Str | ValueType::Text, Value::Str(text)) => SeaValue::String(Some(text.clone())),
        (ValueType::Str | ValueType::Text, Value::Json(json)) => SeaValue::String(Some(json.to_string())),
        (ValueType::Json, Value::Json(json)) => SeaValue::String(Some(json.to_string())),
        (ValueType::Json, Value::Str(text)) => SeaValue::String(Some(text.clone())),
        (ValueType::I64, Value::I64(number)) => SeaValue::BigInt(Some(*number)),
        (ValueType::I64, Value::Bool(flag)) => SeaValue::BigInt(Some(i64::from(*flag))),
        (ValueType::F64, Value::F64(number)) => SeaValue::Double(Some(*number)),
        (ValueType::F64, Value::I64(number)) => SeaValue::Double(Some(*number as f64)),
        (ValueType::Bool, Value::Bool(flag)) => SeaValue::Bool(Some(*flag)),
        (ValueType::Time, Value::Time(ts)) => SeaValue::BigInt(Some(ts.as_micros())),
        (ValueType::Time, Value::I64(micros)) => SeaValue::BigInt(Some(*micros)),
        (ValueType::Time, Value::Str(text)) => {
            SeaValue::BigInt(Some(Timestamp::parse(text)?.as_micros()))
        }
        _ => return Err(mismatch()),
    })
}

/// Reads one column of a fetched row as the given storage type.
pub(crate) fn read_value(
    row: &QueryResult,
    column: &str,
    value_type: ValueType,
) -> TidemarkResult<Value> {
    let value = match value_type {
        ValueType::Str | ValueType::Text => row
            .try_get::<Option<String>>("", column)?
            .map(Value::Str),
        ValueType::I64 => row.try_get::<Option<i64>>("", column)?.map(Value::I64),
        ValueType::F64 => row.try_get::<Option<f64>>("", column)?.map(Value::F64),
        ValueType::Bool => row.try_get::<Option<bool>>("", column)?.map(Value::Bool),
        ValueType::Time => row
            .try_get::<Option<i64>>("", column)?
            .map(|micros| Value::Time(Timestamp(micros))),
        ValueType::Json => match row.try_get::<Option<String>>("", column)? {
            Some(raw) => Some(Value::Json(serde_json::from_str(&raw).map_err(|err| {
                TidemarkError::storage(format!("column {column} holds invalid json: {err}"))
            })?)),
            None => None,
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Aggregates come back as doubles on some backends and integers on others.
pub(crate) fn read_number(row: &QueryResult, column: &str) -> TidemarkResult<Value> {
    if let Ok(value) = row.try_get::<Option<f64>>("", column) {
        return Ok(value.map(Value::F64).unwrap_or(Value::Null));
    }
    let value = row.try_get::<Option<i64>>("", column)?;
    Ok(value.map(Value::I64).unwrap_or(Value::Null))
}

pub(crate) fn read_count(row: &QueryResult, column: &str) -> TidemarkResult<u64> {
    let count: i64 = row.try_get("", column)?;
    Ok(u64::try_from(count).unwrap_or_default())
}
