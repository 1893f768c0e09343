use serde::{Deserialize, Serialize};

use crate::{
    AdjustType, IndexManifest, IntervalLevel, SchemaKey, TidemarkError, TidemarkResult, ValueType,
};

pub const ID_COLUMN: &str = "id";
pub const ENTITY_ID_COLUMN: &str = "entity_id";
pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const PROVIDER_COLUMN: &str = "provider";
pub const CODE_COLUMN: &str = "code";
pub const LEVEL_COLUMN: &str = "level";

/// Columns that get a single-column index when present.
pub const INDEXED_COLUMNS: [&str; 6] = [
    TIMESTAMP_COLUMN,
    ENTITY_ID_COLUMN,
    CODE_COLUMN,
    "report_period",
    "created_timestamp",
    "updated_timestamp",
];

/// Composite indexes created when both columns are present.
pub const COMPOSITE_INDEXES: [(&str, &str); 2] = [
    (TIMESTAMP_COLUMN, ENTITY_ID_COLUMN),
    (TIMESTAMP_COLUMN, CODE_COLUMN),
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub value_type: ValueType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            nullable: true,
            primary_key: false,
        }
    }

    pub fn primary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: ValueType::Str,
            nullable: false,
            primary_key: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A logical record type bound to one physical table.
///
/// `providers` and `database` are filled in by the registry; descriptors built
/// by hand start without them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub name: String,
    pub table: String,
    pub columns: Vec<ColumnSpec>,
    pub time_field: String,
    pub level: Option<IntervalLevel>,
    pub entity_type: Option<String>,
    pub key: Option<SchemaKey>,
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub database: Option<String>,
}

impl SchemaDescriptor {
    /// Schema carrying the record mixin columns: `id`, `entity_id`, `timestamp`
    /// and a nullable `provider`.
    pub fn record(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: vec![
                ColumnSpec::primary(ID_COLUMN),
                ColumnSpec::new(ENTITY_ID_COLUMN, ValueType::Str).not_null(),
                ColumnSpec::new(TIMESTAMP_COLUMN, ValueType::Time).not_null(),
                ColumnSpec::new(PROVIDER_COLUMN, ValueType::Str),
            ],
            time_field: TIMESTAMP_COLUMN.to_string(),
            level: None,
            entity_type: None,
            key: None,
            providers: Vec::new(),
            database: None,
        }
    }

    /// Adds a column, replacing any column with the same name.
    pub fn column(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        let spec = ColumnSpec::new(name, value_type);
        match self.columns.iter_mut().find(|col| col.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.columns.push(spec),
        }
        self
    }

    pub fn with_level(mut self, level: IntervalLevel) -> Self {
        self.level = Some(level);
        if !self.has_column(LEVEL_COLUMN) {
            self = self.column(LEVEL_COLUMN, ValueType::Str);
        }
        self
    }

    pub fn for_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_time_field(mut self, time_field: impl Into<String>) -> Self {
        self.time_field = time_field.into();
        self
    }

    /// Bar schema named by the kdata naming rule, e.g. `Stock1dHfqKdata`.
    pub fn kdata(entity_type: &str, level: IntervalLevel, adjust_type: Option<AdjustType>) -> Self {
        let key = SchemaKey::new(entity_type, level, adjust_type);
        let mut schema = Self::record(key.schema_name(), key.table_name())
            .column(CODE_COLUMN, ValueType::Str)
            .column("name", ValueType::Str)
            .with_level(level)
            .column("open", ValueType::F64)
            .column("close", ValueType::F64)
            .column("high", ValueType::F64)
            .column("low", ValueType::F64)
            .column("volume", ValueType::F64)
            .column("turnover", ValueType::F64)
            .column("change_pct", ValueType::F64)
            .column("turnover_rate", ValueType::F64)
            .for_entity_type(key.entity_type.clone());
        schema.key = Some(key);
        schema
    }

    /// Reference schema describing the entities themselves (`Stock`, `Index`, ...).
    pub fn entity(entity_type: &str) -> Self {
        let entity_type = entity_type.to_lowercase();
        let mut name = String::new();
        let mut chars = entity_type.chars();
        if let Some(first) = chars.next() {
            name.extend(first.to_uppercase());
            name.push_str(chars.as_str());
        }
        Self::record(name, entity_type.clone())
            .column("entity_type", ValueType::Str)
            .column("exchange", ValueType::Str)
            .column(CODE_COLUMN, ValueType::Str)
            .column("name", ValueType::Str)
            .column("list_date", ValueType::Time)
            .column("end_date", ValueType::Time)
            .for_entity_type(entity_type)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|col| col.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|col| col.name == name)
    }

    pub fn column_spec(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|col| col.name == name)
    }

    /// Registers a provider; already-present providers are ignored.
    pub fn add_provider(&mut self, provider: &str) {
        if !self.providers.iter().any(|existing| existing == provider) {
            self.providers.push(provider.to_string());
        }
    }

    /// Explicit provider if given, otherwise the first registered one.
    pub fn resolve_provider(&self, provider: Option<&str>) -> TidemarkResult<String> {
        if let Some(provider) = provider {
            return Ok(provider.to_string());
        }
        self.providers
            .first()
            .cloned()
            .ok_or_else(|| TidemarkError::not_found(format!("no provider registered for {}", self.name)))
    }

    pub fn validate(&self) -> TidemarkResult<()> {
        if self.name.is_empty() || self.table.is_empty() {
            return Err(TidemarkError::invalid("schema name and table are required"));
        }
        if !self.column_spec(ID_COLUMN).is_some_and(|col| col.primary_key) {
            return Err(TidemarkError::invalid(format!(
                "schema {} must declare '{ID_COLUMN}' as primary key",
                self.name
            )));
        }
        if !self.has_column(&self.time_field) {
            return Err(TidemarkError::invalid(format!(
                "schema {} time field '{}' is not a column",
                self.name, self.time_field
            )));
        }
        for (idx, col) in self.columns.iter().enumerate() {
            if self.columns[..idx].iter().any(|prev| prev.name == col.name) {
                return Err(TidemarkError::invalid(format!(
                    "schema {} declares column '{}' twice",
                    self.name, col.name
                )));
            }
        }
        Ok(())
    }

    /// Informational indexes the reconciliation pass maintains for this table.
    pub fn planned_indexes(&self) -> Vec<IndexManifest> {
        let mut indexes = Vec::new();
        for col in INDEXED_COLUMNS {
            if self.has_column(col) {
                indexes.push(IndexManifest {
                    name: format!("{}_{}_index", self.table, col),
                    columns: vec![col.to_string()],
                    unique: false,
                });
            }
        }
        for (first, second) in COMPOSITE_INDEXES {
            if self.has_column(first) && self.has_column(second) {
                indexes.push(IndexManifest {
                    name: format!("{}_{}_{}_index", self.table, first, second),
                    columns: vec![first.to_string(), second.to_string()],
                    unique: false,
                });
            }
        }
        indexes
    }
}

/// Schemas sharing DDL ownership inside one database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaGroup {
    pub name: String,
    pub schemas: Vec<SchemaDescriptor>,
}

impl SchemaGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schemas: Vec::new(),
        }
    }

    pub fn with(mut self, schema: SchemaDescriptor) -> Self {
        self.schemas.push(schema);
        self
    }

    /// One bar schema per level/adjust combination for an entity type.
    pub fn kdata(
        name: impl Into<String>,
        entity_type: &str,
        levels: &[IntervalLevel],
        adjust_types: &[Option<AdjustType>],
    ) -> Self {
        let mut group = Self::new(name);
        for level in levels {
            for adjust in adjust_types {
                group = group.with(SchemaDescriptor::kdata(entity_type, *level, *adjust));
            }
        }
        group
    }
}
