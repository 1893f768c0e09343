use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tidemark_store::{
    DataListener, DataReader, Frame, IntervalLevel, OrderBy, PersistApi, QueryApi, ReaderSpec,
    ReaderState, SchemaDescriptor, SchemaGroup, StoreBuilder, StoreConfig, TidemarkError,
    TidemarkResult, TidemarkStore, Timestamp, UpsertOptions, Value, ValueType, encode_entity_id,
    record_id,
};
use tempfile::tempdir;

const SH: &str = "stock_sh_600000";
const SZ: &str = "stock_sz_000001";

#[derive(Default)]
struct Recorder {
    loaded: Mutex<Vec<usize>>,
    changed: Mutex<Vec<usize>>,
    entity_changes: Mutex<Vec<(String, usize)>>,
}

impl DataListener for Recorder {
    fn on_data_loaded(&self, data: &Frame) {
        self.loaded.lock().expect("lock").push(data.len());
    }

    fn on_data_changed(&self, data: &Frame) {
        self.changed.lock().expect("lock").push(data.len());
    }

    fn on_entity_data_changed(&self, entity_id: &str, added: &Frame) {
        self.entity_changes
            .lock()
            .expect("lock")
            .push((entity_id.to_string(), added.len()));
    }
}

fn daily_bar() -> SchemaDescriptor {
    SchemaDescriptor::record("StockDailyBar", "stock_daily_bar")
        .column("code", ValueType::Str)
        .with_level(IntervalLevel::Day1)
        .column("close", ValueType::F64)
}

fn bars(entity_id: &str, days: &[u8]) -> TidemarkResult<Frame> {
    let mut frame = Frame::new(
        ["id", "entity_id", "timestamp", "code", "level", "close"]
            .into_iter()
            .map(String::from)
            .collect(),
    );
    let code = tidemark_store::code_of(entity_id)?;
    for day in days {
        let ts = Timestamp::from_ymd(2024, 1, *day)?;
        frame.push_row(vec![
            record_id(entity_id, ts, IntervalLevel::Day1)?.into(),
            entity_id.into(),
            ts.into(),
            code.as_str().into(),
            "1d".into(),
            Value::F64(f64::from(*day)),
        ])?;
    }
    Ok(frame)
}

async fn seeded_store(base: &std::path::Path) -> TidemarkResult<TidemarkStore> {
    let mut builder = StoreBuilder::new(StoreConfig::default_sqlite(), base);
    builder
        .register_schema(
            &["p1"],
            "stock_bars",
            SchemaGroup::new("stock_bars").with(daily_bar()),
            None,
        )
        .await?;
    let store = builder.build();
    for entity_id in [SH, SZ] {
        store
            .upsert(&daily_bar(), "p1", &bars(entity_id, &[2, 3])?, UpsertOptions::default())
            .await?;
    }
    Ok(store)
}

fn spec() -> ReaderSpec {
    ReaderSpec::new(daily_bar())
        .provider("p1")
        .entity_ids([SH, SZ])
        .level(IntervalLevel::Day1)
        .poll_interval(Duration::from_millis(10))
}

#[tokio::test]
async fn load_replays_to_late_listeners() -> TidemarkResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded_store(dir.path()).await?;
    let source: Arc<dyn QueryApi> = Arc::new(store);
    let mut reader = DataReader::new(source, spec()).await?;
    assert_eq!(reader.state(), ReaderState::Empty);

    let early = Arc::new(Recorder::default());
    reader.register_listener(early.clone())?;
    reader.load().await?;
    assert_eq!(reader.state(), ReaderState::Loaded);
    assert_eq!(*early.loaded.lock().expect("lock"), vec![4]);

    let late = Arc::new(Recorder::default());
    reader.register_listener(late.clone())?;
    assert_eq!(*late.loaded.lock().expect("lock"), vec![4]);

    let data = reader.data()?;
    assert_eq!(data.value(0, "entity_id"), Some(&Value::from(SH)));
    assert_eq!(data.value(1, "entity_id"), Some(&Value::from(SZ)));
    assert_eq!(
        reader.latest_timestamp(SZ),
        Some(Timestamp::from_ymd(2024, 1, 3)?)
    );
    Ok(())
}

#[tokio::test]
async fn catch_up_delivers_only_new_rows() -> TidemarkResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded_store(dir.path()).await?;
    let source: Arc<dyn QueryApi> = Arc::new(store.clone());
    let mut reader = DataReader::new(source, spec()).await?;
    reader.load().await?;
    let recorder = Arc::new(Recorder::default());
    reader.register_listener(recorder.clone())?;

    store
        .upsert(&daily_bar(), "p1", &bars(SH, &[4, 5])?, UpsertOptions::default())
        .await?;

    let report = reader.catch_up(None, Duration::from_millis(50)).await?;
    assert_eq!(report.changed, vec![SH.to_string()]);
    assert_eq!(report.timed_out, vec![SZ.to_string()]);
    assert_eq!(report.added_rows, 2);
    assert_eq!(reader.state(), ReaderState::Loaded);

    assert_eq!(
        *recorder.entity_changes.lock().expect("lock"),
        vec![(SH.to_string(), 2)]
    );
    assert_eq!(*recorder.changed.lock().expect("lock"), vec![6]);
    assert_eq!(reader.entity_data(SH).map(Frame::len), Some(4));
    assert_eq!(
        reader.latest_timestamp(SH),
        Some(Timestamp::from_ymd(2024, 1, 5)?)
    );

    let again = reader.catch_up(None, Duration::from_millis(30)).await?;
    assert!(again.changed.is_empty());
    assert_eq!(recorder.entity_changes.lock().expect("lock").len(), 1);
    assert_eq!(recorder.changed.lock().expect("lock").len(), 1);
    Ok(())
}

#[tokio::test]
async fn catch_up_stops_at_the_requested_bound() -> TidemarkResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded_store(dir.path()).await?;
    let source: Arc<dyn QueryApi> = Arc::new(store.clone());
    let mut reader = DataReader::new(source, spec()).await?;
    reader.load().await?;
    let recorder = Arc::new(Recorder::default());
    reader.register_listener(recorder.clone())?;

    store
        .upsert(&daily_bar(), "p1", &bars(SH, &[4, 5, 6])?, UpsertOptions::default())
        .await?;

    let bound = Timestamp::from_ymd(2024, 1, 5)?;
    let report = reader
        .catch_up(Some(bound), Duration::from_millis(30))
        .await?;
    assert_eq!(report.added_rows, 2);
    assert_eq!(reader.latest_timestamp(SH), Some(bound));
    assert_eq!(
        *recorder.entity_changes.lock().expect("lock"),
        vec![(SH.to_string(), 2)]
    );

    let rest = reader.catch_up(None, Duration::from_millis(30)).await?;
    assert_eq!(rest.changed, vec![SH.to_string()]);
    assert_eq!(rest.added_rows, 1);
    assert_eq!(
        reader.latest_timestamp(SH),
        Some(Timestamp::from_ymd(2024, 1, 6)?)
    );
    assert_eq!(reader.entity_data(SH).map(Frame::len), Some(5));
    Ok(())
}

#[tokio::test]
async fn catch_up_gives_up_after_timeout() -> TidemarkResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded_store(dir.path()).await?;
    let source: Arc<dyn QueryApi> = Arc::new(store);
    let mut reader = DataReader::new(source, spec()).await?;
    reader.load().await?;

    let started = Instant::now();
    let report = reader.catch_up(None, Duration::from_millis(100)).await?;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
    assert_eq!(report.timed_out.len(), 2);
    assert_eq!(report.added_rows, 0);
    Ok(())
}

#[tokio::test]
async fn catch_up_on_empty_reader_loads() -> TidemarkResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded_store(dir.path()).await?;
    let source: Arc<dyn QueryApi> = Arc::new(store);
    let mut reader = DataReader::new(source, spec()).await?;
    let recorder = Arc::new(Recorder::default());
    reader.register_listener(recorder.clone())?;

    let report = reader.catch_up(None, Duration::from_millis(10)).await?;
    assert!(report.changed.is_empty());
    assert_eq!(reader.state(), ReaderState::Loaded);
    assert_eq!(*recorder.loaded.lock().expect("lock"), vec![4]);
    Ok(())
}

#[tokio::test]
async fn window_limits_rows_per_entity() -> TidemarkResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded_store(dir.path()).await?;
    let source: Arc<dyn QueryApi> = Arc::new(store.clone());

    let mut reader = DataReader::new(source.clone(), spec()).await?;
    reader.load_window(1).await?;
    assert_eq!(reader.entity_data(SH).map(Frame::len), Some(1));
    assert_eq!(
        reader.latest_timestamp(SH),
        Some(Timestamp::from_ymd(2024, 1, 3)?)
    );

    let mut windowed = DataReader::new(source, spec().keep_window(2)).await?;
    windowed.load().await?;
    store
        .upsert(&daily_bar(), "p1", &bars(SZ, &[4])?, UpsertOptions::default())
        .await?;
    windowed.catch_up(None, Duration::from_millis(20)).await?;
    let sz = windowed.entity_data(SZ).expect("sz rows");
    assert_eq!(sz.len(), 2);
    assert_eq!(
        sz.max_time("timestamp"),
        Some(Timestamp::from_ymd(2024, 1, 4)?)
    );
    Ok(())
}

#[tokio::test]
async fn untracked_window_load_notifies_once() -> TidemarkResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded_store(dir.path()).await?;
    let source: Arc<dyn QueryApi> = Arc::new(store);
    let mut reader = DataReader::new(source, ReaderSpec::new(daily_bar()).provider("p1")).await?;
    assert!(reader.entity_ids().is_empty());
    let recorder = Arc::new(Recorder::default());
    reader.register_listener(recorder.clone())?;

    reader.load_window(1).await?;
    assert_eq!(*recorder.loaded.lock().expect("lock"), vec![2]);
    assert_eq!(reader.entity_data(SH).map(Frame::len), Some(1));
    assert_eq!(
        reader.latest_timestamp(SZ),
        Some(Timestamp::from_ymd(2024, 1, 3)?)
    );
    Ok(())
}

#[tokio::test]
async fn load_applies_order_and_limit() -> TidemarkResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded_store(dir.path()).await?;
    let source: Arc<dyn QueryApi> = Arc::new(store);
    let newest_first = spec()
        .order_by(OrderBy::desc("timestamp"))
        .order_by(OrderBy::asc("entity_id"))
        .limit(3);
    let mut reader = DataReader::new(source, newest_first).await?;
    reader.load().await?;

    assert_eq!(reader.data()?.len(), 3);
    assert_eq!(reader.entity_data(SH).map(Frame::len), Some(2));
    assert_eq!(reader.entity_data(SZ).map(Frame::len), Some(1));
    assert_eq!(
        reader.latest_timestamp(SZ),
        Some(Timestamp::from_ymd(2024, 1, 3)?)
    );
    Ok(())
}

#[tokio::test]
async fn registering_twice_keeps_one_subscription() -> TidemarkResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded_store(dir.path()).await?;
    let source: Arc<dyn QueryApi> = Arc::new(store.clone());
    let mut reader = DataReader::new(source, spec()).await?;
    reader.load().await?;

    let recorder = Arc::new(Recorder::default());
    let listener: Arc<dyn DataListener> = recorder.clone();
    reader.register_listener(listener.clone())?;
    reader.register_listener(listener.clone())?;
    assert_eq!(*recorder.loaded.lock().expect("lock"), vec![4, 4]);

    store
        .upsert(&daily_bar(), "p1", &bars(SZ, &[4])?, UpsertOptions::default())
        .await?;
    reader.catch_up(None, Duration::from_millis(20)).await?;
    assert_eq!(
        *recorder.entity_changes.lock().expect("lock"),
        vec![(SZ.to_string(), 1)]
    );
    assert_eq!(*recorder.changed.lock().expect("lock"), vec![5]);

    assert!(reader.deregister_listener(&listener));
    assert!(!reader.deregister_listener(&listener));
    Ok(())
}

#[tokio::test]
async fn deregistered_and_closed_readers_stay_quiet() -> TidemarkResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded_store(dir.path()).await?;
    let source: Arc<dyn QueryApi> = Arc::new(store.clone());
    let mut reader = DataReader::new(source, spec()).await?;
    reader.load().await?;

    let recorder = Arc::new(Recorder::default());
    let listener: Arc<dyn DataListener> = recorder.clone();
    reader.register_listener(listener.clone())?;
    assert!(reader.deregister_listener(&listener));
    assert!(!reader.deregister_listener(&listener));

    store
        .upsert(&daily_bar(), "p1", &bars(SH, &[4])?, UpsertOptions::default())
        .await?;
    reader.catch_up(None, Duration::from_millis(20)).await?;
    assert!(recorder.entity_changes.lock().expect("lock").is_empty());

    reader.close();
    assert_eq!(reader.state(), ReaderState::Closed);
    let err = reader.load().await.expect_err("closed reader");
    assert!(matches!(err, TidemarkError::Validation { .. }));
    Ok(())
}

#[tokio::test]
async fn entities_resolve_from_entity_schema() -> TidemarkResult<()> {
    let dir = tempdir().expect("tempdir");
    let mut builder = StoreBuilder::new(StoreConfig::default_sqlite(), dir.path());
    builder
        .register_entity(&["p1"], "stock_meta", "stock", SchemaDescriptor::entity("stock"))
        .await?;
    builder
        .register_schema(
            &["p1"],
            "stock_bars",
            SchemaGroup::new("stock_bars").with(daily_bar()),
            Some("stock"),
        )
        .await?;
    let store = builder.build();

    let mut stocks = Frame::new(
        ["id", "entity_id", "timestamp", "entity_type", "exchange", "code"]
            .into_iter()
            .map(String::from)
            .collect(),
    );
    let listed = Timestamp::from_ymd(2000, 1, 1)?;
    for (exchange, code) in [("sh", "600000"), ("sz", "000001")] {
        let entity_id = encode_entity_id("stock", exchange, code);
        stocks.push_row(vec![
            entity_id.as_str().into(),
            entity_id.as_str().into(),
            listed.into(),
            "stock".into(),
            exchange.into(),
            code.into(),
        ])?;
    }
    let entity_schema = store.registry().entity_schema("stock")?.clone();
    store
        .upsert(&entity_schema, "p1", &stocks, UpsertOptions::default())
        .await?;
    store
        .upsert(&daily_bar(), "p1", &bars(SH, &[2])?, UpsertOptions::default())
        .await?;

    let source: Arc<dyn QueryApi> = Arc::new(store);
    let all = DataReader::new(
        source.clone(),
        ReaderSpec::new(daily_bar()).provider("p1").entity_type("stock"),
    )
    .await?;
    assert_eq!(all.entity_ids(), [SZ.to_string(), SH.to_string()]);

    let mut sh_only = DataReader::new(
        source,
        ReaderSpec::new(daily_bar())
            .provider("p1")
            .entity_type("stock")
            .exchanges(["sh"]),
    )
    .await?;
    assert_eq!(sh_only.entity_ids(), [SH.to_string()]);
    sh_only.load().await?;
    assert_eq!(sh_only.entity_data(SH).map(Frame::len), Some(1));
    Ok(())
}
