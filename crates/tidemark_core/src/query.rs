use std::collections::BTreeMap;

use sea_orm::sea_query::SelectStatement;
use serde::{Deserialize, Serialize};

use crate::{FromRow, Frame, IntervalLevel, Record, Row, TidemarkError, TidemarkResult, Timestamp, Value};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// Extra predicate applied on top of the request's own filters.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    NotIn {
        column: String,
        values: Vec<Value>,
    },
    IsNull(String),
    NotNull(String),
    Like {
        column: String,
        pattern: String,
    },
}

impl Filter {
    fn compare(column: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        Filter::Compare {
            column: column.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    pub fn lt(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn lte(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lte, value)
    }

    pub fn gt(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn gte(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gte, value)
    }

    pub fn is_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn not_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::NotIn {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(column: &str) -> Self {
        Filter::IsNull(column.to_string())
    }

    pub fn not_null(column: &str) -> Self {
        Filter::NotNull(column.to_string())
    }

    pub fn like(column: &str, pattern: impl Into<String>) -> Self {
        Filter::Like {
            column: column.to_string(),
            pattern: pattern.into(),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Compare { column, .. }
            | Filter::In { column, .. }
            | Filter::NotIn { column, .. }
            | Filter::Like { column, .. } => column,
            Filter::IsNull(column) | Filter::NotNull(column) => column,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Shape of a query result.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnShape {
    #[default]
    Frame,
    Records,
    Mappings,
    /// The unexecuted select, for further composition.
    Statement,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregate {
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Avg => "avg",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
        }
    }
}

/// Filter/order/projection description shared by the query and delete paths.
///
/// Unset fields do not constrain the query. The default order is ascending by
/// the schema's time field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryRequest {
    pub provider: Option<String>,
    pub entity_ids: Option<Vec<String>>,
    pub codes: Option<Vec<String>>,
    pub ids: Option<Vec<String>>,
    pub level: Option<IntervalLevel>,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub filters: Vec<Filter>,
    pub order: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub columns: Option<Vec<String>>,
    /// Output column renames, `column -> label`.
    pub labels: BTreeMap<String, String>,
    pub time_field: Option<String>,
    pub distinct: bool,
    pub shape: ReturnShape,
}

impl QueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn entity_id(self, entity_id: impl Into<String>) -> Self {
        self.entity_ids([entity_id.into()])
    }

    pub fn entity_ids<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.entity_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn code(self, code: impl Into<String>) -> Self {
        self.codes([code.into()])
    }

    pub fn codes<S: Into<String>>(mut self, codes: impl IntoIterator<Item = S>) -> Self {
        self.codes = Some(codes.into_iter().map(Into::into).collect());
        self
    }

    pub fn ids<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn level(mut self, level: IntervalLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn start(mut self, start: Timestamp) -> Self {
        self.start = Some(start);
        self
    }

    pub fn end(mut self, end: Timestamp) -> Self {
        self.end = Some(end);
        self
    }

    pub fn between(self, start: Timestamp, end: Timestamp) -> Self {
        self.start(start).end(end)
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn label(mut self, column: impl Into<String>, label: impl Into<String>) -> Self {
        self.labels.insert(column.into(), label.into());
        self
    }

    pub fn time_field(mut self, time_field: impl Into<String>) -> Self {
        self.time_field = Some(time_field.into());
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn shape(mut self, shape: ReturnShape) -> Self {
        self.shape = shape;
        self
    }
}

/// Result of a query in the requested shape.
#[derive(Debug)]
pub enum QueryOutput {
    Frame(Frame),
    Records(Vec<Record>),
    Mappings(Vec<Row>),
    Statement(SelectStatement),
}

impl QueryOutput {
    pub fn into_frame(self) -> TidemarkResult<Frame> {
        match self {
            QueryOutput::Frame(frame) => Ok(frame),
            QueryOutput::Mappings(rows) => Ok(Frame::from_mappings(&rows)),
            other => Err(shape_mismatch("frame", &other)),
        }
    }

    pub fn into_records(self) -> TidemarkResult<Vec<Record>> {
        match self {
            QueryOutput::Records(records) => Ok(records),
            QueryOutput::Mappings(rows) => rows.iter().map(Record::from_row).collect(),
            QueryOutput::Frame(frame) => frame.to_mappings().iter().map(Record::from_row).collect(),
            other => Err(shape_mismatch("records", &other)),
        }
    }

    pub fn into_mappings(self) -> TidemarkResult<Vec<Row>> {
        match self {
            QueryOutput::Mappings(rows) => Ok(rows),
            QueryOutput::Frame(frame) => Ok(frame.to_mappings()),
            other => Err(shape_mismatch("mappings", &other)),
        }
    }

    pub fn into_statement(self) -> TidemarkResult<SelectStatement> {
        match self {
            QueryOutput::Statement(stmt) => Ok(stmt),
            other => Err(shape_mismatch("statement", &other)),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            QueryOutput::Frame(_) => "frame",
            QueryOutput::Records(_) => "records",
            QueryOutput::Mappings(_) => "mappings",
            QueryOutput::Statement(_) => "statement",
        }
    }
}

fn shape_mismatch(expected: &str, output: &QueryOutput) -> TidemarkError {
    TidemarkError::invalid(format!(
        "expected {expected} output, query returned {}",
        output.kind()
    ))
}

/// Knobs for the bulk write path.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UpsertOptions {
    /// Replace rows whose id already exists instead of skipping them.
    pub force_update: bool,
    /// Rows per write transaction; defaults to the store's configured chunk size.
    pub chunk_size: Option<usize>,
    /// Collapse incoming rows sharing an id, keeping the last one.
    pub drop_duplicates: bool,
    /// Look up stored ids and insert only net-new rows. With both this and
    /// `force_update` off, every row is inserted and id collisions surface as
    /// storage errors.
    pub require_check: bool,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            force_update: false,
            chunk_size: None,
            drop_duplicates: true,
            require_check: true,
        }
    }
}

impl UpsertOptions {
    pub fn force_update() -> Self {
        Self {
            force_update: true,
            ..Self::default()
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }
}

/// Collects typed rows from mappings.
pub fn rows_as<T: FromRow>(rows: &[Row]) -> TidemarkResult<Vec<T>> {
    rows.iter().map(T::from_row).collect()
}
