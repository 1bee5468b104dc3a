//! Load metadata from in-memory structs or from the `_sys_entities` table.

use crate::config::resolved::{
    Attribute, DataType, Entity, ResolvedModel, CREATED_AT_FIELD, DELETED_FIELD, PUBLICATION_STATUS_FIELD,
    UPDATED_AT_FIELD,
};
use crate::config::types::*;
use crate::config::validate;
use crate::error::ConfigError;
use crate::store::qualified_sys_table;
use sqlx::PgPool;

/// Build the resolved model from full config (validates first).
pub fn resolve(config: &FullConfig) -> Result<ResolvedModel, ConfigError> {
    validate(config)?;
    let mut entities = Vec::with_capacity(config.entities.len());
    for e in &config.entities {
        let mut attributes = Vec::with_capacity(e.attributes.len() + 5);
        for a in &e.attributes {
            let data_type = DataType::parse(&a.data_type).ok_or_else(|| ConfigError::UnknownDataType {
                entity: e.name.clone(),
                field: a.field.clone(),
                data_type: a.data_type.clone(),
            })?;
            attributes.push(Attribute {
                field: a.field.clone(),
                data_type,
                options: a.options.clone(),
            });
        }

        for (name, data_type) in [
            (e.primary_key.as_str(), DataType::Int),
            (CREATED_AT_FIELD, DataType::Datetime),
            (UPDATED_AT_FIELD, DataType::Datetime),
            (PUBLICATION_STATUS_FIELD, DataType::String),
            (DELETED_FIELD, DataType::Boolean),
        ] {
            if !attributes.iter().any(|a| a.field == name) {
                attributes.push(Attribute::new(name, data_type));
            }
        }

        entities.push(Entity {
            name: e.name.clone(),
            table_name: e.table_name.clone(),
            primary_key: e.primary_key.clone(),
            attributes,
            default_page_size: e.default_page_size,
        });
    }
    Ok(ResolvedModel::new(entities))
}

/// Parse metadata from a JSON document: either `{ "entities": [...] }` or a bare array.
pub fn parse_config(json: &str) -> Result<FullConfig, ConfigError> {
    let value: serde_json::Value = serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
    let config = match value {
        serde_json::Value::Array(_) => FullConfig {
            entities: serde_json::from_value(value).map_err(|e| ConfigError::Load(e.to_string()))?,
        },
        other => serde_json::from_value(other).map_err(|e| ConfigError::Load(e.to_string()))?,
    };
    Ok(config)
}

/// Load all entity documents from `<schema>._sys_entities`. Tables must already exist (ensure_sys_tables).
pub async fn load_from_pool(pool: &PgPool, schema: &str) -> Result<FullConfig, ConfigError> {
    let sql = format!("SELECT payload FROM {} ORDER BY id", qualified_sys_table(schema, "_sys_entities"));
    tracing::debug!(sql = %sql, "query");
    let rows = sqlx::query_scalar::<_, serde_json::Value>(&sql)
        .fetch_all(pool)
        .await
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let mut entities = Vec::with_capacity(rows.len());
    for row in rows {
        let value: EntityConfig = serde_json::from_value(row).map_err(|e| ConfigError::Load(e.to_string()))?;
        entities.push(value);
    }
    Ok(FullConfig { entities })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolved::fixtures::blog_config;

    #[test]
    fn adds_default_attributes() {
        let model = resolve(&blog_config()).unwrap();
        let tag = model.lookup("tag").unwrap();
        for field in ["id", DELETED_FIELD, PUBLICATION_STATUS_FIELD, CREATED_AT_FIELD, UPDATED_AT_FIELD] {
            assert!(tag.attribute(field).is_some(), "missing {}", field);
        }
        assert_eq!(tag.primary_key_attribute().data_type, DataType::Int);
    }

    #[test]
    fn parses_bare_array_and_wrapped_documents() {
        let bare = r#"[{"name":"tag","tableName":"tags","attributes":[{"field":"name","dataType":"string"}]}]"#;
        let wrapped = r#"{"entities":[{"name":"tag","tableName":"tags"}]}"#;
        assert_eq!(parse_config(bare).unwrap().entities[0].primary_key, "id");
        assert_eq!(parse_config(wrapped).unwrap().entities[0].table_name, "tags");
        assert!(parse_config("{").is_err());
    }
}
