//! Raw metadata documents as persisted in `_sys_entities` or shipped as JSON files.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeConfig {
    pub field: String,
    /// One of int, float, boolean, string, text, datetime, date, lookup, junction, collection.
    pub data_type: String,
    /// Lookup/Junction: target entity name. Collection: `<targetEntity>.<linkAttribute>`.
    #[serde(default)]
    pub options: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityConfig {
    pub name: String,
    pub table_name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub default_page_size: Option<u32>,
    #[serde(default)]
    pub attributes: Vec<AttributeConfig>,
}

fn default_primary_key() -> String {
    "id".to_string()
}

/// All entity documents in one struct for in-memory loading.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullConfig {
    pub entities: Vec<EntityConfig>,
}
