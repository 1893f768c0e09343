use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Condition, Expr, ExprTrait, Func, Order, Query, SelectStatement};

use tidemark_core::{
    Aggregate, CODE_COLUMN, CompareOp, ENTITY_ID_COLUMN, Filter, Frame, FromRow, ID_COLUMN,
    LEVEL_COLUMN, OrderBy, QueryApi, QueryOutput, QueryRequest, Record, ReturnShape, Row,
    SchemaDescriptor, SortDirection, TidemarkError, TidemarkResult, Timestamp, Value, ValueType,
    rows_as,
};

use crate::TidemarkStore;
use crate::db::{query_all, query_one, read_count, read_number, read_value, to_sea_value};

/// Output column of a select: name in the result set and how to decode it.
#[derive(Clone, Debug)]
pub(crate) struct OutputColumn {
    pub name: String,
    pub value_type: ValueType,
}

fn column_type(schema: &SchemaDescriptor, column: &str) -> TidemarkResult<ValueType> {
    schema
        .column_spec(column)
        .map(|spec| spec.value_type)
        .ok_or_else(|| {
            TidemarkError::invalid(format!("schema {} has no column '{column}'", schema.name))
        })
}

fn time_field<'a>(schema: &'a SchemaDescriptor, request: &'a QueryRequest) -> TidemarkResult<&'a str> {
    let field = request.time_field.as_deref().unwrap_or(&schema.time_field);
    column_type(schema, field)?;
    Ok(field)
}

fn bind_all(values: &[Value], value_type: ValueType) -> TidemarkResult<Vec<sea_orm::sea_query::Value>> {
    values
        .iter()
        .map(|value| to_sea_value(value, value_type))
        .collect()
}

/// Conjunction of every predicate the request carries. Shared by all read and
/// delete paths so filter semantics cannot drift between them.
pub(crate) fn build_condition(
    schema: &SchemaDescriptor,
    request: &QueryRequest,
) -> TidemarkResult<Condition> {
    let mut cond = Condition::all();
    if let Some(entity_ids) = &request.entity_ids {
        cond = cond.add(Expr::col(Alias::new(ENTITY_ID_COLUMN)).is_in(entity_ids.iter().map(String::as_str)));
    }
    if let Some(codes) = &request.codes {
        column_type(schema, CODE_COLUMN)?;
        cond = cond.add(Expr::col(Alias::new(CODE_COLUMN)).is_in(codes.iter().map(String::as_str)));
    }
    if let Some(ids) = &request.ids {
        cond = cond.add(Expr::col(Alias::new(ID_COLUMN)).is_in(ids.iter().map(String::as_str)));
    }
    if let Some(level) = request.level {
        if schema.has_column(LEVEL_COLUMN) {
            cond = cond.add(Expr::col(Alias::new(LEVEL_COLUMN)).eq(level.as_str()));
        }
    }
    let time_col = time_field(schema, request)?;
    let time_type = column_type(schema, time_col)?;
    if let Some(start) = request.start {
        let bound = to_sea_value(&Value::Time(start), time_type)?;
        cond = cond.add(Expr::col(Alias::new(time_col)).gte(bound));
    }
    if let Some(end) = request.end {
        let bound = to_sea_value(&Value::Time(end), time_type)?;
        cond = cond.add(Expr::col(Alias::new(time_col)).lte(bound));
    }
    for filter in &request.filters {
        let value_type = column_type(schema, filter.column())?;
        let col = Expr::col(Alias::new(filter.column()));
        let expr = match filter {
            Filter::Compare { op, value, .. } => {
                let value = to_sea_value(value, value_type)?;
                match op {
                    CompareOp::Eq => col.eq(value),
                    CompareOp::Ne => col.ne(value),
                    CompareOp::Lt => col.lt(value),
                    CompareOp::Lte => col.lte(value),
                    CompareOp::Gt => col.gt(value),
                    CompareOp::Gte => col.gte(value),
                }
            }
            Filter::In { values, .. } => col.is_in(bind_all(values, value_type)?),
            Filter::NotIn { values, .. } => col.is_not_in(bind_all(values, value_type)?),
            Filter::IsNull(_) => col.is_null(),
            Filter::NotNull(_) => col.is_not_null(),
            Filter::Like { pattern, .. } => col.like(pattern.as_str()),
        };
        cond = cond.add(expr);
    }
    Ok(cond)
}

/// Select honouring projection (with the time column forced in), labels,
/// distinct, order (ascending time by default) and limit.
pub(crate) fn build_select(
    schema: &SchemaDescriptor,
    request: &QueryRequest,
) -> TidemarkResult<(SelectStatement, Vec<OutputColumn>)> {
    let time_col = time_field(schema, request)?;
    let mut columns: Vec<String> = match &request.columns {
        Some(columns) => columns.clone(),
        None => schema.columns.iter().map(|spec| spec.name.clone()).collect(),
    };
    if !columns.iter().any(|column| column == time_col) {
        columns.push(time_col.to_string());
    }

    let mut select = Query::select();
    select.from(Alias::new(&schema.table));
    let mut outputs = Vec::with_capacity(columns.len());
    for column in &columns {
        let value_type = column_type(schema, column)?;
        match request.labels.get(column) {
            Some(label) => {
                select.expr_as(Expr::col(Alias::new(column)), Alias::new(label));
                outputs.push(OutputColumn {
                    name: label.clone(),
                    value_type,
                });
            }
            None => {
                select.column(Alias::new(column));
                outputs.push(OutputColumn {
                    name: column.clone(),
                    value_type,
                });
            }
        }
    }
    if request.distinct {
        select.distinct();
    }
    select.cond_where(build_condition(schema, request)?);

    let default_order = [OrderBy::asc(time_col)];
    let order: &[OrderBy] = if request.order.is_empty() {
        &default_order
    } else {
        &request.order
    };
    for item in order {
        column_type(schema, &item.column)?;
        let direction = match item.direction {
            SortDirection::Asc => Order::Asc,
            SortDirection::Desc => Order::Desc,
        };
        select.order_by(Alias::new(&item.column), direction);
    }
    if let Some(limit) = request.limit {
        select.limit(limit);
    }
    Ok((select.to_owned(), outputs))
}

fn decode_rows(
    rows: &[sea_orm::QueryResult],
    outputs: &[OutputColumn],
) -> TidemarkResult<Vec<Vec<Value>>> {
    rows.iter()
        .map(|row| {
            outputs
                .iter()
                .map(|output| read_value(row, &output.name, output.value_type))
                .collect()
        })
        .collect()
}

fn to_mappings(outputs: &[OutputColumn], rows: Vec<Vec<Value>>) -> Vec<Row> {
    rows.into_iter()
        .map(|values| {
            outputs
                .iter()
                .map(|output| output.name.clone())
                .zip(values)
                .collect()
        })
        .collect()
}

impl TidemarkStore {
    /// Typed rows via [`FromRow`].
    pub async fn query_as<T: FromRow>(
        &self,
        schema: &SchemaDescriptor,
        request: &QueryRequest,
    ) -> TidemarkResult<Vec<T>> {
        let request = request.clone().shape(ReturnShape::Mappings);
        let rows = self.query(schema, &request).await?.into_mappings()?;
        rows_as(&rows)
    }

    pub async fn get_by_id(
        &self,
        schema: &SchemaDescriptor,
        id: &str,
        provider: Option<&str>,
    ) -> TidemarkResult<Option<Row>> {
        let mut request = QueryRequest::new()
            .ids([id])
            .limit(1)
            .shape(ReturnShape::Mappings);
        request.provider = provider.map(str::to_string);
        let rows = self.query(schema, &request).await?.into_mappings()?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl QueryApi for TidemarkStore {
    async fn query(
        &self,
        schema: &SchemaDescriptor,
        request: &QueryRequest,
    ) -> TidemarkResult<QueryOutput> {
        let schema = self.resolve_schema(schema)?;
        let (select, outputs) = build_select(schema, request)?;
        if request.shape == ReturnShape::Statement {
            return Ok(QueryOutput::Statement(select));
        }
        let engine = self.engine_for(schema, request.provider.as_deref()).await?;
        let rows = query_all(engine.connection(), &select).await?;
        let values = decode_rows(&rows, &outputs)?;
        log::debug!("query {} returned {} rows", schema.name, values.len());
        Ok(match request.shape {
            ReturnShape::Frame | ReturnShape::Statement => {
                let names = outputs.iter().map(|output| output.name.clone()).collect();
                QueryOutput::Frame(Frame::from_rows(names, values)?)
            }
            ReturnShape::Mappings => QueryOutput::Mappings(to_mappings(&outputs, values)),
            ReturnShape::Records => QueryOutput::Records(
                to_mappings(&outputs, values)
                    .iter()
                    .map(Record::from_row)
                    .collect::<TidemarkResult<_>>()?,
            ),
        })
    }

    async fn count(&self, schema: &SchemaDescriptor, request: &QueryRequest) -> TidemarkResult<u64> {
        let schema = self.resolve_schema(schema)?;
        let select = Query::select()
            .expr_as(Func::count(Expr::col(Alias::new(ID_COLUMN))), Alias::new("count"))
            .from(Alias::new(&schema.table))
            .cond_where(build_condition(schema, request)?)
            .to_owned();
        let engine = self.engine_for(schema, request.provider.as_deref()).await?;
        match query_one(engine.connection(), &select).await? {
            Some(row) => read_count(&row, "count"),
            None => Ok(0),
        }
    }

    async fn exists_by_id(
        &self,
        schema: &SchemaDescriptor,
        id: &str,
        provider: Option<&str>,
    ) -> TidemarkResult<bool> {
        let schema = self.resolve_schema(schema)?;
        let mut request = QueryRequest::new().ids([id]);
        request.provider = provider.map(str::to_string);
        let select = Query::select()
            .column(Alias::new(ID_COLUMN))
            .from(Alias::new(&schema.table))
            .cond_where(build_condition(schema, &request)?)
            .limit(1)
            .to_owned();
        let engine = self.engine_for(schema, provider).await?;
        Ok(query_one(engine.connection(), &select).await?.is_some())
    }

    async fn group_by(
        &self,
        schema: &SchemaDescriptor,
        column: &str,
        aggregate: Aggregate,
        target: Option<&str>,
        request: &QueryRequest,
    ) -> TidemarkResult<Frame> {
        let schema = self.resolve_schema(schema)?;
        let key_type = column_type(schema, column)?;
        let target = match (aggregate, target) {
            (_, Some(target)) => {
                column_type(schema, target)?;
                target
            }
            (Aggregate::Count, None) => ID_COLUMN,
            (_, None) => {
                return Err(TidemarkError::invalid(format!(
                    "{} needs a target column",
                    aggregate.as_str()
                )));
            }
        };
        let engine = self.engine_for(schema, request.provider.as_deref()).await?;
        let float_type = engine.dialect().float_type();
        let target_expr = Expr::col(Alias::new(target));
        // postgres and mysql widen SUM/AVG of integers to NUMERIC/DECIMAL
        let agg_expr = match aggregate {
            Aggregate::Count => Func::count(target_expr),
            Aggregate::Sum => Func::cast_as(Func::sum(target_expr), float_type),
            Aggregate::Avg => Func::cast_as(Func::avg(target_expr), float_type),
            Aggregate::Min => Func::min(target_expr),
            Aggregate::Max => Func::max(target_expr),
        };
        let agg_name = aggregate.as_str();
        let select = Query::select()
            .column(Alias::new(column))
            .expr_as(agg_expr, Alias::new(agg_name))
            .from(Alias::new(&schema.table))
            .cond_where(build_condition(schema, request)?)
            .group_by_col(Alias::new(column))
            .order_by(Alias::new(column), Order::Asc)
            .to_owned();
        let rows = query_all(engine.connection(), &select).await?;
        let mut frame = Frame::new(vec![column.to_string(), agg_name.to_string()]);
        for row in &rows {
            let key = read_value(row, column, key_type)?;
            let value = match aggregate {
                Aggregate::Count => Value::I64(read_count(row, agg_name)? as i64),
                _ => read_number(row, agg_name)?,
            };
            frame.push_row(vec![key, value])?;
        }
        Ok(frame)
    }

    async fn latest_timestamp(
        &self,
        schema: &SchemaDescriptor,
        request: &QueryRequest,
    ) -> TidemarkResult<Option<Timestamp>> {
        let schema = self.resolve_schema(schema)?;
        let time_col = time_field(schema, request)?;
        let time_type = column_type(schema, time_col)?;
        let select = Query::select()
            .expr_as(Func::max(Expr::col(Alias::new(time_col))), Alias::new("latest"))
            .from(Alias::new(&schema.table))
            .cond_where(build_condition(schema, request)?)
            .to_owned();
        let engine = self.engine_for(schema, request.provider.as_deref()).await?;
        let Some(row) = query_one(engine.connection(), &select).await? else {
            return Ok(None);
        };
        let latest = read_value(&row, "latest", time_type)?;
        Ok(match latest {
            Value::Str(text) => Some(Timestamp::parse(&text)?),
            other => other.as_time(),
        })
    }

    async fn query_entities(
        &self,
        entity_type: &str,
        request: &QueryRequest,
    ) -> TidemarkResult<Frame> {
        let schema = self.registry().entity_schema(entity_type)?.clone();
        let mut request = request.clone();
        if request.order.is_empty() {
            request = request.order_by(OrderBy::asc(CODE_COLUMN));
        }
        self.query_frame(&schema, &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::sea_query::SqliteQueryBuilder;
    use tidemark_core::IntervalLevel;

    fn bars() -> SchemaDescriptor {
        SchemaDescriptor::kdata("stock", IntervalLevel::Day1, None)
    }

    #[test]
    fn default_order_is_ascending_time() -> TidemarkResult<()> {
        let (select, outputs) = build_select(&bars(), &QueryRequest::new())?;
        let sql = select.to_string(SqliteQueryBuilder);
        assert!(sql.ends_with("ORDER BY \"timestamp\" ASC"), "{sql}");
        assert_eq!(outputs.len(), bars().columns.len());
        Ok(())
    }

    #[test]
    fn projection_forces_time_column_and_labels() -> TidemarkResult<()> {
        let request = QueryRequest::new()
            .columns(["close"])
            .label("close", "price");
        let (select, outputs) = build_select(&bars(), &request)?;
        let names: Vec<&str> = outputs.iter().map(|output| output.name.as_str()).collect();
        assert_eq!(names, vec!["price", "timestamp"]);
        let sql = select.to_string(SqliteQueryBuilder);
        assert!(sql.contains("\"close\" AS \"price\""), "{sql}");
        Ok(())
    }

    #[test]
    fn filters_are_conjunctive() -> TidemarkResult<()> {
        let request = QueryRequest::new()
            .entity_ids(["stock_sh_600000"])
            .level(IntervalLevel::Day1)
            .start(Timestamp(10))
            .filter(Filter::gt("close", 1.5));
        let (select, _) = build_select(&bars(), &request)?;
        let sql = select.to_string(SqliteQueryBuilder);
        assert!(sql.contains("\"entity_id\" IN ('stock_sh_600000')"), "{sql}");
        assert!(sql.contains("\"level\" = '1d'"), "{sql}");
        assert!(sql.contains("\"timestamp\" >= 10"), "{sql}");
        assert!(sql.contains("\"close\" > 1.5"), "{sql}");
        assert_eq!(sql.matches(" AND ").count(), 3, "{sql}");
        Ok(())
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let request = QueryRequest::new().filter(Filter::eq("nope", 1_i64));
        assert!(build_select(&bars(), &request).is_err());
        let request = QueryRequest::new().order_by(OrderBy::desc("nope"));
        assert!(build_select(&bars(), &request).is_err());
    }

    #[test]
    fn level_is_skipped_without_level_column() -> TidemarkResult<()> {
        let schema = SchemaDescriptor::record("Note", "note");
        let request = QueryRequest::new().level(IntervalLevel::Day1);
        let sql = build_select(&schema, &request)?.0.to_string(SqliteQueryBuilder);
        assert!(!sql.contains("level"), "{sql}");
        Ok(())
    }
}
