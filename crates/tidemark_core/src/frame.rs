use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{
    ENTITY_ID_COLUMN, ID_COLUMN, PROVIDER_COLUMN, TIMESTAMP_COLUMN, TidemarkError, TidemarkResult,
    Timestamp, Value,
};

/// Single row keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Column-oriented table. Every column holds exactly `len()` values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    columns: Vec<String>,
    data: Vec<Vec<Value>>,
}

impl Frame {
    pub fn new(columns: Vec<String>) -> Self {
        let data = vec![Vec::new(); columns.len()];
        Self { columns, data }
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> TidemarkResult<Self> {
        let mut frame = Self::new(columns);
        for row in rows {
            frame.push_row(row)?;
        }
        Ok(frame)
    }

    /// Builds a frame from mappings; the column set is the union of all keys and
    /// absent entries become `Null`.
    pub fn from_mappings(rows: &[Row]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in rows {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        let mut frame = Self::new(columns);
        for row in rows {
            for (idx, column) in frame.columns.iter().enumerate() {
                frame.data[idx].push(row.get(column).cloned().unwrap_or(Value::Null));
            }
        }
        frame
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> TidemarkResult<()> {
        if row.len() != self.columns.len() {
            return Err(TidemarkError::invalid(format!(
                "row has {} values, frame has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (column, value) in self.data.iter_mut().zip(row) {
            column.push(value);
        }
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.data.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.column_index(name).map(|idx| self.data[idx].as_slice())
    }

    fn require_column(&self, name: &str) -> TidemarkResult<usize> {
        self.column_index(name)
            .ok_or_else(|| TidemarkError::invalid(format!("frame has no column '{name}'")))
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        self.column_index(column)
            .and_then(|idx| self.data[idx].get(row))
    }

    pub fn row(&self, row: usize) -> Vec<Value> {
        self.data.iter().map(|column| column[row].clone()).collect()
    }

    pub fn row_map(&self, row: usize) -> Row {
        self.columns
            .iter()
            .zip(&self.data)
            .map(|(name, column)| (name.clone(), column[row].clone()))
            .collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.len()).map(|idx| self.row(idx))
    }

    pub fn to_mappings(&self) -> Vec<Row> {
        (0..self.len()).map(|idx| self.row_map(idx)).collect()
    }

    /// Projection in the given column order.
    pub fn select(&self, names: &[&str]) -> TidemarkResult<Frame> {
        let mut columns = Vec::with_capacity(names.len());
        let mut data = Vec::with_capacity(names.len());
        for name in names {
            let idx = self.require_column(name)?;
            columns.push(name.to_string());
            data.push(self.data[idx].clone());
        }
        Ok(Frame { columns, data })
    }

    pub fn take(&self, indices: &[usize]) -> Frame {
        let data = self
            .data
            .iter()
            .map(|column| indices.iter().map(|idx| column[*idx].clone()).collect())
            .collect();
        Frame {
            columns: self.columns.clone(),
            data,
        }
    }

    pub fn slice(&self, start: usize, end: usize) -> Frame {
        let end = end.min(self.len());
        let start = start.min(end);
        let indices: Vec<usize> = (start..end).collect();
        self.take(&indices)
    }

    pub fn tail(&self, count: usize) -> Frame {
        let len = self.len();
        self.slice(len.saturating_sub(count), len)
    }

    pub fn filter(&self, mut keep: impl FnMut(usize) -> bool) -> Frame {
        let indices: Vec<usize> = (0..self.len()).filter(|idx| keep(*idx)).collect();
        self.take(&indices)
    }

    /// Drops rows whose `column` value repeats, keeping the last occurrence. Kept
    /// rows stay in their original order; returns the keys that had duplicates.
    pub fn drop_duplicates_keep_last(&self, column: &str) -> TidemarkResult<(Frame, Vec<String>)> {
        let idx = self.require_column(column)?;
        let mut last_seen: HashMap<String, usize> = HashMap::new();
        let mut duplicated = Vec::new();
        for (row, value) in self.data[idx].iter().enumerate() {
            let key = value.key_string();
            if last_seen.insert(key.clone(), row).is_some() && !duplicated.contains(&key) {
                duplicated.push(key);
            }
        }
        if duplicated.is_empty() {
            return Ok((self.clone(), duplicated));
        }
        let frame = self.filter(|row| {
            last_seen
                .get(&self.data[idx][row].key_string())
                .is_some_and(|kept| *kept == row)
        });
        Ok((frame, duplicated))
    }

    /// Appends rows aligned by column name. Columns only one side has are padded
    /// with `Null`.
    pub fn append(&mut self, other: &Frame) {
        let before = self.len();
        for name in &other.columns {
            if !self.has_column(name) {
                self.columns.push(name.clone());
                self.data.push(vec![Value::Null; before]);
            }
        }
        for (idx, name) in self.columns.iter().enumerate() {
            match other.column_index(name) {
                Some(other_idx) => self.data[idx].extend(other.data[other_idx].iter().cloned()),
                None => self.data[idx].extend(std::iter::repeat_n(Value::Null, other.len())),
            }
        }
    }

    pub fn concat(frames: impl IntoIterator<Item = Frame>) -> Frame {
        let mut out = Frame::default();
        for frame in frames {
            if out.columns.is_empty() && out.is_empty() {
                out = frame;
            } else {
                out.append(&frame);
            }
        }
        out
    }

    /// Stable sort by the given columns, ascending.
    pub fn sort_by_columns(&mut self, names: &[&str]) -> TidemarkResult<()> {
        let keys = names
            .iter()
            .map(|name| self.require_column(name))
            .collect::<TidemarkResult<Vec<_>>>()?;
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|left, right| {
            keys.iter()
                .map(|key| self.data[*key][*left].compare(&self.data[*key][*right]))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        *self = self.take(&order);
        Ok(())
    }

    pub fn max_time(&self, column: &str) -> Option<Timestamp> {
        self.column(column)?
            .iter()
            .filter_map(Value::as_time)
            .max()
    }
}

/// Conversion from a fetched row into a typed value.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> TidemarkResult<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> TidemarkResult<Self> {
        Ok(row.clone())
    }
}

/// Generic typed record: the mixin columns plus every other column by name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub entity_id: String,
    pub timestamp: Timestamp,
    pub provider: Option<String>,
    pub fields: Row,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl FromRow for Record {
    fn from_row(row: &Row) -> TidemarkResult<Self> {
        let mut fields = row.clone();
        let id = take_str(&mut fields, ID_COLUMN)?;
        let entity_id = take_str(&mut fields, ENTITY_ID_COLUMN)?;
        let timestamp = fields
            .remove(TIMESTAMP_COLUMN)
            .and_then(|value| value.as_time())
            .ok_or_else(|| TidemarkError::invalid("record row is missing 'timestamp'"))?;
        let provider = fields
            .remove(PROVIDER_COLUMN)
            .and_then(|value| value.as_str().map(str::to_string));
        Ok(Record {
            id,
            entity_id,
            timestamp,
            provider,
            fields,
        })
    }
}

fn take_str(fields: &mut Row, name: &str) -> TidemarkResult<String> {
    match fields.remove(name) {
        Some(Value::Str(value)) => Ok(value),
        _ => Err(TidemarkError::invalid(format!("record row is missing '{name}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars() -> Frame {
        Frame::from_rows(
            vec!["id".into(), "entity_id".into(), "timestamp".into(), "close".into()],
            vec![
                vec!["a_1".into(), "a".into(), Timestamp(2).into(), 1.0.into()],
                vec!["b_1".into(), "b".into(), Timestamp(1).into(), 2.0.into()],
                vec!["a_1".into(), "a".into(), Timestamp(2).into(), 3.0.into()],
            ],
        )
        .expect("frame")
    }

    #[test]
    fn rejects_ragged_rows() {
        let mut frame = Frame::new(vec!["id".into()]);
        assert!(frame.push_row(vec!["x".into(), 1_i64.into()]).is_err());
    }

    #[test]
    fn drop_duplicates_keeps_last_occurrence() {
        let (frame, dups) = bars().drop_duplicates_keep_last("id").expect("dedupe");
        assert_eq!(dups, vec!["a_1".to_string()]);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.value(0, "id"), Some(&Value::from("b_1")));
        assert_eq!(frame.value(1, "close"), Some(&Value::F64(3.0)));
    }

    #[test]
    fn sort_and_project() {
        let mut frame = bars();
        frame.sort_by_columns(&["timestamp", "close"]).expect("sort");
        assert_eq!(frame.value(0, "entity_id"), Some(&Value::from("b")));
        let projected = frame.select(&["close", "id"]).expect("select");
        assert_eq!(projected.columns(), ["close".to_string(), "id".to_string()]);
        assert!(frame.select(&["missing"]).is_err());
        assert_eq!(frame.max_time("timestamp"), Some(Timestamp(2)));
    }

    #[test]
    fn append_aligns_columns_by_name() {
        let mut left = Frame::from_rows(vec!["id".into()], vec![vec!["x".into()]]).expect("left");
        let right = Frame::from_rows(
            vec!["close".into(), "id".into()],
            vec![vec![1.0.into(), "y".into()]],
        )
        .expect("right");
        left.append(&right);
        assert_eq!(left.len(), 2);
        assert_eq!(left.value(0, "close"), Some(&Value::Null));
        assert_eq!(left.value(1, "id"), Some(&Value::from("y")));
    }

    #[test]
    fn mappings_roundtrip_into_records() {
        let frame = bars();
        let rows = frame.to_mappings();
        assert_eq!(Frame::from_mappings(&rows).len(), 3);
        let record = Record::from_row(&rows[1]).expect("record");
        assert_eq!(record.entity_id, "b");
        assert_eq!(record.timestamp, Timestamp(1));
        assert_eq!(record.field("close"), Some(&Value::F64(2.0)));
        assert!(record.provider.is_none());
    }
}
