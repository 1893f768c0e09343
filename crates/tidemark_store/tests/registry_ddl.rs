use tidemark_store::{
    AdjustType, DatabaseConfig, DatabaseDescriptor, IntervalLevel, MANIFEST_VERSION, QueryApi,
    QueryRequest, SchemaDescriptor, SchemaGroup, StoreBuilder, StoreConfig, TidemarkError,
    TidemarkResult, ValueType,
};
use tempfile::tempdir;

fn daily_bar() -> SchemaDescriptor {
    SchemaDescriptor::record("StockDailyBar", "stock_daily_bar")
        .column("code", ValueType::Str)
        .with_level(IntervalLevel::Day1)
        .column("close", ValueType::F64)
}

#[tokio::test]
async fn reconcile_creates_planned_indexes() -> TidemarkResult<()> {
    let dir = tempdir().expect("tempdir");
    let config = StoreConfig::default_sqlite().reconcile_ddl(true);
    let mut builder = StoreBuilder::new(config, dir.path());
    builder
        .register_schema(
            &["p1"],
            "stock_bars",
            SchemaGroup::new("stock_bars").with(daily_bar()),
            None,
        )
        .await?;

    let reports = builder.reconcile_reports().to_vec();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].failures.is_empty(), "{:?}", reports[0].failures);
    assert!(reports[0].added_columns.is_empty());
    assert_eq!(
        reports[0].created_indexes,
        vec![
            "stock_daily_bar_timestamp_index",
            "stock_daily_bar_entity_id_index",
            "stock_daily_bar_code_index",
            "stock_daily_bar_timestamp_entity_id_index",
            "stock_daily_bar_timestamp_code_index",
        ]
    );

    let store = builder.build();
    let engine = store.engine_for(&daily_bar(), Some("p1")).await?;
    let live = engine
        .dialect()
        .list_indexes(engine.connection(), "stock_daily_bar")
        .await?;
    assert!(live.contains(&"stock_daily_bar_timestamp_entity_id_index".to_string()));

    let again = store.reconcile().await?;
    assert_eq!(again.len(), 1);
    assert!(again[0].created_indexes.is_empty());
    assert!(again[0].failures.is_empty());
    Ok(())
}

#[tokio::test]
async fn reconcile_adds_new_columns_to_existing_tables() -> TidemarkResult<()> {
    let dir = tempdir().expect("tempdir");
    let mut first = StoreBuilder::new(StoreConfig::default_sqlite(), dir.path());
    first
        .register_schema(
            &["p1"],
            "stock_bars",
            SchemaGroup::new("stock_bars").with(daily_bar()),
            None,
        )
        .await?;
    drop(first.build());

    let evolved = daily_bar().column("turnover", ValueType::F64);
    let mut second = StoreBuilder::new(StoreConfig::default_sqlite().reconcile_ddl(true), dir.path());
    second
        .register_schema(
            &["p1"],
            "stock_bars",
            SchemaGroup::new("stock_bars").with(evolved.clone()),
            None,
        )
        .await?;
    let report = &second.reconcile_reports()[0];
    assert_eq!(report.added_columns, vec!["turnover".to_string()]);

    let store = second.build();
    let engine = store.engine_for(&evolved, Some("p1")).await?;
    let columns = engine
        .dialect()
        .list_columns(engine.connection(), "stock_daily_bar")
        .await?;
    assert!(columns.contains(&"turnover".to_string()));
    assert_eq!(
        store.count(&evolved, &QueryRequest::new().provider("p1")).await?,
        0
    );
    Ok(())
}

#[tokio::test]
async fn registry_tracks_providers_databases_and_groups() -> TidemarkResult<()> {
    let dir = tempdir().expect("tempdir");
    let mut builder = StoreBuilder::new(StoreConfig::default_sqlite(), dir.path());
    let group = SchemaGroup::kdata(
        "stock_kdata",
        "stock",
        &[IntervalLevel::Day1, IntervalLevel::Min5],
        &[None, Some(AdjustType::Hfq)],
    );
    builder
        .register_schema(&["em", "joinquant"], "stock_kdata", group, Some("stock"))
        .await?;
    builder
        .register_entity(&["em"], "stock_meta", "stock", SchemaDescriptor::entity("stock"))
        .await?;
    let store = builder.build();
    let registry = store.registry();

    assert_eq!(registry.providers(), ["em".to_string(), "joinquant".to_string()]);
    assert_eq!(
        registry.databases_for_provider("em"),
        ["stock_kdata".to_string(), "stock_meta".to_string()]
    );
    assert_eq!(registry.databases_for_provider("joinquant"), ["stock_kdata".to_string()]);
    assert_eq!(registry.schemas_in_database("stock_kdata").len(), 4);
    assert_eq!(registry.groups_in_database("stock_kdata"), ["stock_kdata".to_string()]);
    assert_eq!(registry.entity_types(), vec!["stock"]);

    let hfq = registry.kdata_schema("stock", IntervalLevel::Day1, Some(AdjustType::Hfq))?;
    assert_eq!(hfq.name, "Stock1dHfqKdata");
    assert_eq!(hfq.table, "stock_1d_hfq_kdata");
    assert_eq!(registry.database_of(&hfq.name)?, "stock_kdata");
    assert_eq!(registry.group_of(&hfq.name), Some("stock_kdata"));
    assert_eq!(registry.entity_schema("stock")?.table, "stock");

    let err = registry
        .kdata_schema("stock", IntervalLevel::Week1, None)
        .expect_err("not registered");
    assert!(matches!(err, TidemarkError::NotFound { .. }));

    let manifest = registry.manifest();
    assert_eq!(manifest.manifest_version, MANIFEST_VERSION);
    assert_eq!(manifest.tables.len(), 5);
    let json = serde_json::to_value(&manifest).map_err(|err| TidemarkError::invalid(err.to_string()))?;
    assert_eq!(json["manifest_version"], MANIFEST_VERSION);

    assert!(dir.path().join("em").join("em_stock_kdata.db").exists());
    assert!(dir.path().join("joinquant").join("joinquant_stock_kdata.db").exists());
    assert!(!dir.path().join("joinquant").join("joinquant_stock_meta.db").exists());
    Ok(())
}

#[tokio::test]
async fn missing_database_configuration_is_rejected() -> TidemarkResult<()> {
    let dir = tempdir().expect("tempdir");
    let config = StoreConfig {
        default_backend: None,
        ..StoreConfig::default_sqlite()
    }
    .with_database(DatabaseDescriptor::new(
        "stock_bars",
        DatabaseConfig::Sqlite {
            path: Some(dir.path().join("bars.db").to_string_lossy().into_owned()),
        },
    ));
    let mut builder = StoreBuilder::new(config, dir.path());
    builder
        .register_schema(
            &["p1"],
            "stock_bars",
            SchemaGroup::new("stock_bars").with(daily_bar()),
            None,
        )
        .await?;
    assert!(dir.path().join("bars.db").exists());

    let err = builder
        .register_schema(
            &["p1"],
            "elsewhere",
            SchemaGroup::new("elsewhere").with(SchemaDescriptor::record("Other", "other")),
            None,
        )
        .await
        .expect_err("no descriptor and no default");
    assert!(matches!(err, TidemarkError::Config { .. }));
    Ok(())
}

#[tokio::test]
async fn rebinding_a_schema_to_another_database_fails() -> TidemarkResult<()> {
    let dir = tempdir().expect("tempdir");
    let mut builder = StoreBuilder::new(StoreConfig::default_sqlite(), dir.path());
    builder
        .register_schema(
            &["p1"],
            "stock_bars",
            SchemaGroup::new("stock_bars").with(daily_bar()),
            None,
        )
        .await?;
    builder
        .register_schema(
            &["p2"],
            "stock_bars",
            SchemaGroup::new("stock_bars").with(daily_bar()),
            None,
        )
        .await?;
    assert_eq!(
        builder.registry().schema("StockDailyBar")?.providers,
        vec!["p1".to_string(), "p2".to_string()]
    );

    let err = builder
        .register_schema(
            &["p1"],
            "other_bars",
            SchemaGroup::new("other_bars").with(daily_bar()),
            None,
        )
        .await
        .expect_err("schema already bound");
    assert!(matches!(err, TidemarkError::Config { .. }));
    Ok(())
}
