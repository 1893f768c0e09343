use std::collections::{BTreeMap, HashMap};

use tidemark_core::{
    AdjustType, IntervalLevel, MANIFEST_VERSION, SchemaDescriptor, SchemaGroup, SchemaKey,
    SchemaManifest, TableManifest, TidemarkError, TidemarkResult,
};

/// Schema catalog. Filled by [`crate::StoreBuilder`] and read-only once the store
/// is built.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    schemas: BTreeMap<String, SchemaDescriptor>,
    by_key: HashMap<SchemaKey, String>,
    schema_groups: HashMap<String, String>,
    providers: Vec<String>,
    provider_databases: BTreeMap<String, Vec<String>>,
    database_schemas: BTreeMap<String, Vec<String>>,
    database_groups: BTreeMap<String, Vec<String>>,
    entity_type_schemas: BTreeMap<String, Vec<String>>,
    entity_schemas: BTreeMap<String, String>,
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

impl Registry {
    /// Adds every schema in the group under `database` for `providers`.
    /// Registering the same group again only adds new providers.
    pub(crate) fn add_group(
        &mut self,
        providers: &[&str],
        database: &str,
        group: &SchemaGroup,
        entity_type: Option<&str>,
    ) -> TidemarkResult<Vec<String>> {
        if providers.is_empty() {
            return Err(TidemarkError::config(format!(
                "schema group {} registered without providers",
                group.name
            )));
        }
        let mut names = Vec::with_capacity(group.schemas.len());
        for schema in &group.schemas {
            schema.validate()?;
            if let Some(existing) = self.schemas.get(&schema.name) {
                if existing.database.as_deref() != Some(database) || existing.table != schema.table {
                    return Err(TidemarkError::config(format!(
                        "schema {} is already bound to {}.{}",
                        schema.name,
                        existing.database.as_deref().unwrap_or_default(),
                        existing.table
                    )));
                }
            }
            if let Some(clash) = self.schemas.values().find(|other| {
                other.name != schema.name
                    && other.table == schema.table
                    && other.database.as_deref() == Some(database)
            }) {
                return Err(TidemarkError::config(format!(
                    "schemas {} and {} both map to table {database}.{}",
                    clash.name, schema.name, schema.table
                )));
            }

            let entry = self
                .schemas
                .entry(schema.name.clone())
                .or_insert_with(|| {
                    let mut fresh = schema.clone();
                    fresh.providers.clear();
                    fresh.database = Some(database.to_string());
                    fresh
                });
            for provider in providers {
                entry.add_provider(provider);
            }
            if let Some(key) = &schema.key {
                self.by_key.insert(key.clone(), schema.name.clone());
            }
            self.schema_groups
                .insert(schema.name.clone(), group.name.clone());
            push_unique(
                self.database_schemas.entry(database.to_string()).or_default(),
                &schema.name,
            );
            if let Some(entity_type) = entity_type {
                push_unique(
                    self.entity_type_schemas
                        .entry(entity_type.to_lowercase())
                        .or_default(),
                    &schema.name,
                );
            }
            names.push(schema.name.clone());
        }
        push_unique(
            self.database_groups.entry(database.to_string()).or_default(),
            &group.name,
        );
        for provider in providers {
            push_unique(&mut self.providers, provider);
            push_unique(
                self.provider_databases
                    .entry(provider.to_string())
                    .or_default(),
                database,
            );
        }
        Ok(names)
    }

    /// Marks an already-registered schema as the reference table of an entity type.
    pub(crate) fn add_entity(&mut self, entity_type: &str, schema_name: &str) -> TidemarkResult<()> {
        if !self.schemas.contains_key(schema_name) {
            return Err(TidemarkError::config(format!(
                "entity schema {schema_name} must be registered before entity type {entity_type}"
            )));
        }
        self.entity_schemas
            .insert(entity_type.to_lowercase(), schema_name.to_string());
        Ok(())
    }

    pub fn schema(&self, name: &str) -> TidemarkResult<&SchemaDescriptor> {
        self.schemas
            .get(name)
            .ok_or_else(|| TidemarkError::not_found(format!("schema {name} is not registered")))
    }

    pub fn kdata_schema(
        &self,
        entity_type: &str,
        level: IntervalLevel,
        adjust_type: Option<AdjustType>,
    ) -> TidemarkResult<&SchemaDescriptor> {
        let key = SchemaKey::new(entity_type, level, adjust_type);
        let name = self.by_key.get(&key).ok_or_else(|| {
            TidemarkError::not_found(format!("no kdata schema {}", key.schema_name()))
        })?;
        self.schema(name)
    }

    pub fn entity_schema(&self, entity_type: &str) -> TidemarkResult<&SchemaDescriptor> {
        let name = self
            .entity_schemas
            .get(&entity_type.to_lowercase())
            .ok_or_else(|| {
                TidemarkError::not_found(format!("entity type {entity_type} is not registered"))
            })?;
        self.schema(name)
    }

    pub fn entity_types(&self) -> Vec<&str> {
        self.entity_schemas.keys().map(String::as_str).collect()
    }

    pub fn schemas(&self) -> impl Iterator<Item = &SchemaDescriptor> {
        self.schemas.values()
    }

    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    pub fn databases_for_provider(&self, provider: &str) -> &[String] {
        self.provider_databases
            .get(provider)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn schemas_in_database(&self, database: &str) -> Vec<&SchemaDescriptor> {
        self.database_schemas
            .get(database)
            .into_iter()
            .flatten()
            .filter_map(|name| self.schemas.get(name))
            .collect()
    }

    pub fn groups_in_database(&self, database: &str) -> &[String] {
        self.database_groups
            .get(database)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn schemas_for_provider(&self, provider: &str) -> Vec<&SchemaDescriptor> {
        self.schemas
            .values()
            .filter(|schema| schema.providers.iter().any(|p| p == provider))
            .collect()
    }

    pub fn schemas_for_entity_type(&self, entity_type: &str) -> Vec<&SchemaDescriptor> {
        self.entity_type_schemas
            .get(&entity_type.to_lowercase())
            .into_iter()
            .flatten()
            .filter_map(|name| self.schemas.get(name))
            .collect()
    }

    pub fn database_of(&self, schema_name: &str) -> TidemarkResult<&str> {
        self.schema(schema_name)?
            .database
            .as_deref()
            .ok_or_else(|| TidemarkError::not_found(format!("schema {schema_name} has no database")))
    }

    pub fn group_of(&self, schema_name: &str) -> Option<&str> {
        self.schema_groups.get(schema_name).map(String::as_str)
    }

    pub fn manifest(&self) -> SchemaManifest {
        SchemaManifest {
            manifest_version: MANIFEST_VERSION.to_string(),
            providers: self.providers.clone(),
            tables: self
                .schemas
                .values()
                .map(|schema| {
                    TableManifest::from_schema(schema, self.group_of(&schema.name).unwrap_or_default())
                })
                .collect(),
        }
    }
}
