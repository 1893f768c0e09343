use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sea_orm::{
    ConnectOptions, Database, DatabaseBackend, DatabaseConnection, DatabaseTransaction,
    TransactionTrait,
};
use tokio::sync::{Mutex, OnceCell};

use tidemark_core::{TidemarkError, TidemarkResult};

use crate::dialect::{BackendDialect, dialect_for};
use crate::{PoolConfig, StoreConfig, WriteMode};

/// Connection pool serving one provider/database pair.
#[derive(Debug)]
pub struct Engine {
    provider: String,
    database: String,
    conn: DatabaseConnection,
    dialect: Arc<dyn BackendDialect>,
    write_mode: Option<WriteMode>,
}

impl Engine {
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn dialect(&self) -> &dyn BackendDialect {
        self.dialect.as_ref()
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.conn.get_database_backend()
    }

    pub fn write_mode(&self) -> Option<WriteMode> {
        self.write_mode
    }

    /// Starts a unit of work. Dropping the session without committing rolls it back.
    pub async fn session(&self) -> TidemarkResult<Session> {
        let txn = self.conn.begin().await?;
        Ok(Session { txn })
    }
}

/// Scoped write transaction.
pub struct Session {
    txn: DatabaseTransaction,
}

impl Session {
    pub fn transaction(&self) -> &DatabaseTransaction {
        &self.txn
    }

    pub async fn commit(self) -> TidemarkResult<()> {
        self.txn.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> TidemarkResult<()> {
        self.txn.rollback().await?;
        Ok(())
    }
}

type EngineKey = (String, String);

/// Lazily connects and caches one engine per provider/database pair.
#[derive(Clone)]
pub struct BackendManager {
    config: Arc<StoreConfig>,
    base_dir: PathBuf,
    engines: Arc<Mutex<HashMap<EngineKey, Arc<OnceCell<Arc<Engine>>>>>>,
}

impl BackendManager {
    pub fn new(config: Arc<StoreConfig>, base_dir: &Path) -> Self {
        Self {
            config,
            base_dir: base_dir.to_path_buf(),
            engines: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Cached engine for the pair; concurrent first callers share one connect.
    pub async fn engine(&self, provider: &str, database: &str) -> TidemarkResult<Arc<Engine>> {
        let cell = {
            let mut engines = self.engines.lock().await;
            engines
                .entry((provider.to_string(), database.to_string()))
                .or_default()
                .clone()
        };
        let engine = cell
            .get_or_try_init(|| self.connect(provider, database))
            .await?;
        Ok(engine.clone())
    }

    pub async fn session(&self, provider: &str, database: &str) -> TidemarkResult<Session> {
        self.engine(provider, database).await?.session().await
    }

    pub async fn connected(&self) -> Vec<(String, String)> {
        let engines = self.engines.lock().await;
        let mut keys: Vec<EngineKey> = engines
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    async fn connect(&self, provider: &str, database: &str) -> TidemarkResult<Arc<Engine>> {
        let descriptor = self.config.resolve(database)?;
        let url = descriptor
            .backend
            .connection_url(&self.base_dir, provider, database)?;
        let mut options = ConnectOptions::new(url);
        if let Some(pool) = &descriptor.pool {
            apply_pool(&mut options, pool);
        }
        let conn = Database::connect(options).await.map_err(|err| {
            TidemarkError::config(format!("connect {provider}/{database}: {err}"))
        })?;
        let dialect = dialect_for(conn.get_database_backend())?;
        log::info!(
            "connected {provider}/{database} ({})",
            descriptor.backend.backend_name()
        );
        Ok(Arc::new(Engine {
            provider: provider.to_string(),
            database: database.to_string(),
            conn,
            dialect,
            write_mode: descriptor.write_mode,
        }))
    }
}

fn apply_pool(options: &mut ConnectOptions, pool: &PoolConfig) {
    if let Some(max) = pool.max_connections {
        options.max_connections(max);
    }
    if let Some(min) = pool.min_connections {
        options.min_connections(min);
    }
    if let Some(timeout_ms) = pool.connect_timeout_ms {
        options.connect_timeout(Duration::from_millis(timeout_ms));
    }
    if let Some(timeout_ms) = pool.acquire_timeout_ms {
        options.acquire_timeout(Duration::from_millis(timeout_ms));
    }
    if let Some(timeout_ms) = pool.idle_timeout_ms {
        options.idle_timeout(Duration::from_millis(timeout_ms));
    }
}
