use serde::{Deserialize, Serialize};

use crate::SchemaDescriptor;

pub const MANIFEST_VERSION: &str = "1";

/// Snapshot of everything the registry knows, as reported by the dev tooling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaManifest {
    pub manifest_version: String,
    pub providers: Vec<String>,
    pub tables: Vec<TableManifest>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableManifest {
    pub schema: String,
    pub name: String,
    pub database: Option<String>,
    pub group: String,
    pub providers: Vec<String>,
    pub columns: Vec<ColumnManifest>,
    pub indexes: Vec<IndexManifest>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnManifest {
    pub name: String,
    pub logical_type: String,
    pub nullable: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl TableManifest {
    pub fn from_schema(schema: &SchemaDescriptor, group: &str) -> Self {
        Self {
            schema: schema.name.clone(),
            name: schema.table.clone(),
            database: schema.database.clone(),
            group: group.to_string(),
            providers: schema.providers.clone(),
            columns: schema
                .columns
                .iter()
                .map(|col| ColumnManifest {
                    name: col.name.clone(),
                    logical_type: col.value_type.as_str().to_string(),
                    nullable: col.nullable,
                })
                .collect(),
            indexes: schema.planned_indexes(),
        }
    }
}
