use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tidemark_core::{TidemarkError, TidemarkResult};

const DEFAULT_CONFIG_NAME: &str = "tidemark.json";
const DEFAULT_CHUNK_SIZE: usize = 5_000;
const WINDOWS_CHUNK_SIZE: usize = 900;

/// Physical backend of a logical database.
///
/// Paths and urls may contain `{provider}` and `{database}` placeholders, which
/// are filled in per engine. A sqlite descriptor without a path stores each
/// provider/database pair in `{provider}/{provider}_{database}.db` under the base
/// directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
}

impl DatabaseConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
            DatabaseConfig::Mysql { .. } => "mysql",
        }
    }

    /// Connection url for one provider/database pair. Creates the parent
    /// directory of sqlite files.
    pub fn connection_url(
        &self,
        base_dir: &Path,
        provider: &str,
        database: &str,
    ) -> TidemarkResult<String> {
        match self {
            DatabaseConfig::Sqlite { .. } => {
                let path = self.sqlite_path(base_dir, provider, database)?;
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|err| {
                        TidemarkError::config(format!("create sqlite dir {}: {err}", parent.display()))
                    })?;
                }
                Ok(format!("sqlite://{}?mode=rwc", path.display()))
            }
            DatabaseConfig::Postgres { url } | DatabaseConfig::Mysql { url } => {
                Ok(fill_placeholders(url, provider, database))
            }
        }
    }

    pub fn sqlite_path(
        &self,
        base_dir: &Path,
        provider: &str,
        database: &str,
    ) -> TidemarkResult<PathBuf> {
        match self {
            DatabaseConfig::Sqlite { path } => {
                let raw = match path {
                    Some(path) => fill_placeholders(path, provider, database),
                    None => format!("{provider}/{provider}_{database}.db"),
                };
                let candidate = PathBuf::from(raw);
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(TidemarkError::config("database is not a sqlite backend")),
        }
    }
}

fn fill_placeholders(template: &str, provider: &str, database: &str) -> String {
    template
        .replace("{provider}", provider)
        .replace("{database}", database)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

/// Write-durability trade-off applied during DDL reconciliation.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Durable,
    Fast,
}

/// Connection descriptor for one logical database name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDescriptor {
    pub name: String,
    #[serde(flatten)]
    pub backend: DatabaseConfig,
    pub pool: Option<PoolConfig>,
    pub write_mode: Option<WriteMode>,
}

impl DatabaseDescriptor {
    pub fn new(name: impl Into<String>, backend: DatabaseConfig) -> Self {
        Self {
            name: name.into(),
            backend,
            pool: None,
            write_mode: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub databases: Vec<DatabaseDescriptor>,
    /// Backend for database names without a descriptor of their own.
    #[serde(default)]
    pub default_backend: Option<DatabaseConfig>,
    #[serde(default)]
    pub pool: Option<PoolConfig>,
    #[serde(default)]
    pub write_mode: Option<WriteMode>,
    /// Reconcile columns, indexes and durability on every registration.
    #[serde(default)]
    pub reconcile_ddl: bool,
    #[serde(default)]
    pub chunk_size: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::default_sqlite()
    }
}

impl StoreConfig {
    /// Every database in its own sqlite file under the base directory.
    pub fn default_sqlite() -> Self {
        Self {
            databases: Vec::new(),
            default_backend: Some(DatabaseConfig::Sqlite { path: None }),
            pool: None,
            write_mode: None,
            reconcile_ddl: false,
            chunk_size: None,
        }
    }

    pub fn with_database(mut self, descriptor: DatabaseDescriptor) -> Self {
        self.databases.retain(|existing| existing.name != descriptor.name);
        self.databases.push(descriptor);
        self
    }

    pub fn reconcile_ddl(mut self, enabled: bool) -> Self {
        self.reconcile_ddl = enabled;
        self
    }

    pub fn load_or_init(base_dir: &Path) -> TidemarkResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| TidemarkError::config(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| TidemarkError::config(format!("read config: {err}")))?;
            let config: StoreConfig = serde_json::from_str(&raw)
                .map_err(|err| TidemarkError::config(format!("parse config: {err}")))?;
            return Ok(config);
        }
        let default = StoreConfig::default_sqlite();
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| TidemarkError::config(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| TidemarkError::config(format!("write config: {err}")))?;
        Ok(default)
    }

    /// Resolves the connection settings of a logical database. A name with no
    /// descriptor and no default backend is a configuration error.
    pub fn resolve(&self, database: &str) -> TidemarkResult<DatabaseDescriptor> {
        if let Some(descriptor) = self.databases.iter().find(|desc| desc.name == database) {
            let mut descriptor = descriptor.clone();
            if descriptor.pool.is_none() {
                descriptor.pool = self.pool.clone();
            }
            if descriptor.write_mode.is_none() {
                descriptor.write_mode = self.write_mode;
            }
            return Ok(descriptor);
        }
        match &self.default_backend {
            Some(backend) => Ok(DatabaseDescriptor {
                name: database.to_string(),
                backend: backend.clone(),
                pool: self.pool.clone(),
                write_mode: self.write_mode,
            }),
            None => Err(TidemarkError::config(format!(
                "no connection descriptor for database '{database}'"
            ))),
        }
    }

    /// Rows per write transaction; smaller on Windows where drivers cap bind
    /// parameters lower.
    pub fn effective_chunk_size(&self) -> usize {
        match self.chunk_size {
            Some(size) if size > 0 => size,
            _ if cfg!(windows) => WINDOWS_CHUNK_SIZE,
            _ => DEFAULT_CHUNK_SIZE,
        }
    }
}
