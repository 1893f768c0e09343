use std::path::Path;
use std::sync::Arc;

use tidemark_core::{SchemaDescriptor, SchemaGroup, TidemarkError, TidemarkResult};

use crate::backends::{BackendManager, Engine};
use crate::ddl::{self, ReconcileReport};
use crate::registry::Registry;
use crate::StoreConfig;

/// Registration phase of a store. Tables are created as schemas are
/// registered; [`StoreBuilder::build`] freezes the registry.
pub struct StoreBuilder {
    config: Arc<StoreConfig>,
    registry: Registry,
    backends: BackendManager,
    reports: Vec<ReconcileReport>,
}

impl StoreBuilder {
    pub fn new(config: StoreConfig, base_dir: &Path) -> Self {
        let config = Arc::new(config);
        let backends = BackendManager::new(config.clone(), base_dir);
        Self {
            config,
            registry: Registry::default(),
            backends,
            reports: Vec::new(),
        }
    }

    /// Binds a schema group to a logical database for the given providers and
    /// creates its tables in every provider's backend.
    pub async fn register_schema(
        &mut self,
        providers: &[&str],
        database: &str,
        group: SchemaGroup,
        entity_type: Option<&str>,
    ) -> TidemarkResult<()> {
        self.config.resolve(database)?;
        let names = self
            .registry
            .add_group(providers, database, &group, entity_type)?;
        for provider in providers {
            let engine = self.backends.engine(provider, database).await?;
            for name in &names {
                let schema = self.registry.schema(name)?;
                ddl::create_table(&engine, schema).await?;
                if self.config.reconcile_ddl {
                    let report = ddl::reconcile_table(&engine, schema).await;
                    self.reports.push(report);
                }
            }
        }
        log::debug!(
            "registered group {} ({} schemas) in {database} for {providers:?}",
            group.name,
            names.len()
        );
        Ok(())
    }

    /// Registers the reference schema of an entity type (`stock`, `index`, ...).
    pub async fn register_entity(
        &mut self,
        providers: &[&str],
        database: &str,
        entity_type: &str,
        schema: SchemaDescriptor,
    ) -> TidemarkResult<()> {
        let name = schema.name.clone();
        let group = SchemaGroup::new(format!("{}_entity", entity_type.to_lowercase())).with(schema);
        self.register_schema(providers, database, group, Some(entity_type))
            .await?;
        self.registry.add_entity(entity_type, &name)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Reconciliation reports collected while registering.
    pub fn reconcile_reports(&self) -> &[ReconcileReport] {
        &self.reports
    }

    pub fn build(self) -> TidemarkStore {
        TidemarkStore {
            chunk_size: self.config.effective_chunk_size(),
            registry: Arc::new(self.registry),
            backends: self.backends,
        }
    }
}

/// Query, persistence and reader entry point over a frozen registry.
#[derive(Clone)]
pub struct TidemarkStore {
    registry: Arc<Registry>,
    backends: BackendManager,
    chunk_size: usize,
}

impl TidemarkStore {
    pub fn builder(config: StoreConfig, base_dir: &Path) -> StoreBuilder {
        StoreBuilder::new(config, base_dir)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn backends(&self) -> &BackendManager {
        &self.backends
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Registered copy of a schema; descriptors built by hand carry neither
    /// providers nor a database.
    pub(crate) fn resolve_schema(&self, schema: &SchemaDescriptor) -> TidemarkResult<&SchemaDescriptor> {
        self.registry.schema(&schema.name)
    }

    /// Engine serving a registered schema for a provider, defaulting to the
    /// schema's first provider.
    pub async fn engine_for(
        &self,
        schema: &SchemaDescriptor,
        provider: Option<&str>,
    ) -> TidemarkResult<Arc<Engine>> {
        let schema = self.resolve_schema(schema)?;
        let provider = schema.resolve_provider(provider)?;
        if !schema.providers.iter().any(|known| known == &provider) {
            return Err(TidemarkError::invalid(format!(
                "provider {provider} is not registered for {}",
                schema.name
            )));
        }
        let database = self.registry.database_of(&schema.name)?;
        self.backends.engine(&provider, database).await
    }

    /// Runs column/index reconciliation for every registered schema and provider.
    pub async fn reconcile(&self) -> TidemarkResult<Vec<ReconcileReport>> {
        let mut reports = Vec::new();
        for schema in self.registry.schemas() {
            for provider in &schema.providers {
                let engine = self.engine_for(schema, Some(provider)).await?;
                reports.push(ddl::reconcile_table(&engine, schema).await);
            }
        }
        Ok(reports)
    }
}
