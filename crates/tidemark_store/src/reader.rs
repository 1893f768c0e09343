use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};

use tidemark_core::{
    ENTITY_ID_COLUMN, Filter, Frame, IntervalLevel, OrderBy, QueryApi, QueryRequest,
    SchemaDescriptor, TidemarkError, TidemarkResult, Timestamp, Value,
};

const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Receives reader notifications on the task that drives the reader.
pub trait DataListener: Send + Sync {
    /// Full dataset after `load` or on registration when data is present.
    fn on_data_loaded(&self, data: &Frame);

    /// Full dataset, once per catch-up round that added rows.
    fn on_data_changed(&self, data: &Frame);

    /// Only the rows a catch-up round added for one entity.
    fn on_entity_data_changed(&self, entity_id: &str, added: &Frame);
}

#[derive(Clone, Debug)]
pub struct ReaderSpec {
    pub schema: SchemaDescriptor,
    pub provider: Option<String>,
    /// Explicit entities to track.
    pub entity_ids: Option<Vec<String>>,
    /// Resolve tracked entities from this entity type's reference schema when
    /// `entity_ids` is unset.
    pub entity_type: Option<String>,
    pub codes: Option<Vec<String>>,
    pub exchanges: Option<Vec<String>>,
    pub level: Option<IntervalLevel>,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub columns: Option<Vec<String>>,
    pub filters: Vec<Filter>,
    /// Order and row cap of the initial `load`; catch-up always reads in time order.
    pub order: Vec<OrderBy>,
    pub limit: Option<u64>,
    /// Rows kept per entity; older rows are trimmed after each append.
    pub keep_window: Option<usize>,
    pub poll_interval: Duration,
}

impl ReaderSpec {
    pub fn new(schema: SchemaDescriptor) -> Self {
        Self {
            schema,
            provider: None,
            entity_ids: None,
            entity_type: None,
            codes: None,
            exchanges: None,
            level: None,
            start: None,
            end: None,
            columns: None,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            keep_window: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn entity_ids<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.entity_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn codes<S: Into<String>>(mut self, codes: impl IntoIterator<Item = S>) -> Self {
        self.codes = Some(codes.into_iter().map(Into::into).collect());
        self
    }

    pub fn exchanges<S: Into<String>>(mut self, exchanges: impl IntoIterator<Item = S>) -> Self {
        self.exchanges = Some(exchanges.into_iter().map(Into::into).collect());
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

    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
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

    pub fn keep_window(mut self, rows: usize) -> Self {
        self.keep_window = Some(rows);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReaderState {
    Empty,
    Loaded,
    CatchingUp,
    Closed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CatchUpReport {
    /// Entities that received rows, in the order they caught up.
    pub changed: Vec<String>,
    /// Entities given up on for this round.
    pub timed_out: Vec<String>,
    pub added_rows: usize,
}

/// Materialized per-entity view over one schema, advanced by polling.
pub struct DataReader {
    source: Arc<dyn QueryApi>,
    spec: ReaderSpec,
    entity_ids: Vec<String>,
    data: BTreeMap<String, Frame>,
    listeners: Vec<Arc<dyn DataListener>>,
    state: ReaderState,
}

impl DataReader {
    /// Resolves the tracked entities; no data is read until `load`.
    pub async fn new(source: Arc<dyn QueryApi>, spec: ReaderSpec) -> TidemarkResult<Self> {
        let entity_ids = match (&spec.entity_ids, &spec.entity_type) {
            (Some(ids), _) => ids.clone(),
            (None, Some(entity_type)) => {
                let mut request = QueryRequest::new();
                request.provider = spec.provider.clone();
                if let Some(codes) = &spec.codes {
                    request = request.codes(codes.iter().cloned());
                }
                if let Some(exchanges) = &spec.exchanges {
                    request = request.filter(Filter::is_in("exchange", exchanges.iter().map(String::as_str)));
                }
                source.entity_ids(entity_type, &request).await?
            }
            (None, None) => Vec::new(),
        };
        Ok(Self {
            source,
            spec,
            entity_ids,
            data: BTreeMap::new(),
            listeners: Vec::new(),
            state: ReaderState::Empty,
        })
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Tracked entities: the configured ones plus any discovered by `load`.
    pub fn entity_ids(&self) -> &[String] {
        &self.entity_ids
    }

    pub fn entity_data(&self, entity_id: &str) -> Option<&Frame> {
        self.data.get(entity_id)
    }

    pub fn latest_timestamp(&self, entity_id: &str) -> Option<Timestamp> {
        self.data
            .get(entity_id)
            .and_then(|frame| frame.max_time(&self.spec.schema.time_field))
    }

    /// Whole materialized dataset ordered by time, then entity.
    pub fn data(&self) -> TidemarkResult<Frame> {
        let mut frame = Frame::concat(self.data.values().cloned());
        if !frame.is_empty() {
            frame.sort_by_columns(&[self.spec.schema.time_field.as_str(), ENTITY_ID_COLUMN])?;
        }
        Ok(frame)
    }

    /// Adds a listener once; registering the same `Arc` again only replays
    /// the loaded data.
    pub fn register_listener(&mut self, listener: Arc<dyn DataListener>) -> TidemarkResult<()> {
        if matches!(self.state, ReaderState::Loaded) && !self.data.is_empty() {
            listener.on_data_loaded(&self.data()?);
        }
        if !self
            .listeners
            .iter()
            .any(|registered| Arc::ptr_eq(registered, &listener))
        {
            self.listeners.push(listener);
        }
        Ok(())
    }

    /// Removes a listener by identity; returns whether it was registered.
    pub fn deregister_listener(&mut self, listener: &Arc<dyn DataListener>) -> bool {
        let before = self.listeners.len();
        self.listeners
            .retain(|registered| !Arc::ptr_eq(registered, listener));
        self.listeners.len() != before
    }

    pub fn close(&mut self) {
        self.data.clear();
        self.listeners.clear();
        self.state = ReaderState::Closed;
    }

    fn ensure_open(&self) -> TidemarkResult<()> {
        if self.state == ReaderState::Closed {
            return Err(TidemarkError::invalid("reader is closed"));
        }
        Ok(())
    }

    fn base_request(&self) -> QueryRequest {
        let mut request = QueryRequest::new();
        request.provider = self.spec.provider.clone();
        request.level = self.spec.level;
        request.filters = self.spec.filters.clone();
        if let Some(columns) = &self.spec.columns {
            let mut columns = columns.clone();
            if !columns.iter().any(|column| column == ENTITY_ID_COLUMN) {
                columns.push(ENTITY_ID_COLUMN.to_string());
            }
            request.columns = Some(columns);
        }
        request
    }

    fn trim(&self, frame: Frame) -> Frame {
        match self.spec.keep_window {
            Some(window) if frame.len() > window => frame.tail(window),
            _ => frame,
        }
    }

    fn replace_data(&mut self, frame: &Frame) {
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        if let Some(column) = frame.column(ENTITY_ID_COLUMN) {
            for (idx, value) in column.iter().enumerate() {
                groups.entry(value.key_string()).or_default().push(idx);
            }
        }
        self.data.clear();
        for (entity_id, rows) in groups {
            if !self.entity_ids.contains(&entity_id) {
                self.entity_ids.push(entity_id.clone());
            }
            let slice = self.trim(frame.take(&rows));
            self.data.insert(entity_id, slice);
        }
    }

    fn notify_loaded(&self) -> TidemarkResult<()> {
        if self.listeners.is_empty() {
            return Ok(());
        }
        let full = self.data()?;
        for listener in &self.listeners {
            listener.on_data_loaded(&full);
        }
        Ok(())
    }

    /// Reads the configured window for every tracked entity and replaces the
    /// materialized state.
    pub async fn load(&mut self) -> TidemarkResult<()> {
        self.ensure_open()?;
        self.load_frame().await?;
        self.notify_loaded()
    }

    async fn load_frame(&mut self) -> TidemarkResult<()> {
        let mut request = self.base_request();
        if !self.entity_ids.is_empty() {
            request = request.entity_ids(self.entity_ids.iter().cloned());
        }
        request.start = self.spec.start;
        request.end = self.spec.end;
        request.order = self.spec.order.clone();
        request.limit = self.spec.limit;
        let frame = self.source.query_frame(&self.spec.schema, &request).await?;
        self.replace_data(&frame);
        self.state = ReaderState::Loaded;
        log::debug!(
            "reader loaded {} rows for {} entities of {}",
            frame.len(),
            self.data.len(),
            self.spec.schema.name
        );
        Ok(())
    }

    /// Loads only the latest `window` rows of each tracked entity.
    pub async fn load_window(&mut self, window: usize) -> TidemarkResult<()> {
        self.ensure_open()?;
        if self.entity_ids.is_empty() {
            self.load_frame().await?;
            for frame in self.data.values_mut() {
                *frame = frame.tail(window);
            }
            return self.notify_loaded();
        }
        let time_field = self.spec.schema.time_field.clone();
        let mut frames = Vec::with_capacity(self.entity_ids.len());
        for entity_id in &self.entity_ids {
            let mut request = self
                .base_request()
                .entity_id(entity_id.clone())
                .order_by(OrderBy::desc(time_field.as_str()))
                .limit(window as u64);
            request.end = self.spec.end;
            let mut frame = self.source.query_frame(&self.spec.schema, &request).await?;
            frame.sort_by_columns(&[time_field.as_str()])?;
            frames.push(frame);
        }
        self.replace_data(&Frame::concat(frames));
        self.state = ReaderState::Loaded;
        self.notify_loaded()
    }

    /// Advances every tracked entity past its latest known row, up to `to`.
    ///
    /// Entities with new rows are reported to listeners with just those rows;
    /// entities that stay quiet for `timeout` are given up on for this round.
    /// The dataset-changed notification fires once at the end if anything moved.
    pub async fn catch_up(
        &mut self,
        to: Option<Timestamp>,
        timeout: Duration,
    ) -> TidemarkResult<CatchUpReport> {
        self.ensure_open()?;
        if self.state == ReaderState::Empty {
            self.load().await?;
            return Ok(CatchUpReport::default());
        }
        self.state = ReaderState::CatchingUp;
        let result = self.catch_up_round(to, timeout).await;
        self.state = ReaderState::Loaded;
        let report = result?;
        if !report.changed.is_empty() && !self.listeners.is_empty() {
            let full = self.data()?;
            for listener in &self.listeners {
                listener.on_data_changed(&full);
            }
        }
        Ok(report)
    }

    async fn catch_up_round(
        &mut self,
        to: Option<Timestamp>,
        timeout: Duration,
    ) -> TidemarkResult<CatchUpReport> {
        let started = Instant::now();
        let time_field = self.spec.schema.time_field.clone();
        let end = to.or(self.spec.end);
        let mut pending = self.entity_ids.clone();
        let mut report = CatchUpReport::default();

        while !pending.is_empty() {
            let mut still_pending = Vec::new();
            for entity_id in pending {
                let mut request = self.base_request().entity_id(entity_id.clone());
                match self.latest_timestamp(&entity_id) {
                    Some(latest) => {
                        request = request.filter(Filter::gt(&time_field, Value::Time(latest)));
                    }
                    None => request.start = self.spec.start,
                }
                request.end = end;
                let added = self.source.query_frame(&self.spec.schema, &request).await?;
                if !added.is_empty() {
                    let merged = match self.data.remove(&entity_id) {
                        Some(mut existing) => {
                            existing.append(&added);
                            existing
                        }
                        None => added.clone(),
                    };
                    let merged = self.trim(merged);
                    self.data.insert(entity_id.clone(), merged);
                    for listener in &self.listeners {
                        listener.on_entity_data_changed(&entity_id, &added);
                    }
                    report.added_rows += added.len();
                    report.changed.push(entity_id);
                } else if started.elapsed() >= timeout {
                    log::warn!(
                        "{}: no new {} rows within {timeout:?}, skipping this round",
                        entity_id,
                        self.spec.schema.name
                    );
                    report.timed_out.push(entity_id);
                } else {
                    still_pending.push(entity_id);
                }
            }
            pending = still_pending;
            if !pending.is_empty() {
                let remaining = timeout.saturating_sub(started.elapsed());
                sleep(self.spec.poll_interval.min(remaining)).await;
            }
        }
        Ok(report)
    }
}
