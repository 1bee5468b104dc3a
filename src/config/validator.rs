//! Structural validation of entity metadata. Dangling relation targets are left to request-time resolution.

use crate::config::{DataType, FullConfig};
use crate::error::ConfigError;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn identifier_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").ok()).as_ref()
}

/// Entity names, table names and attribute fields end up as SQL identifiers and path segments.
pub fn is_identifier(s: &str) -> bool {
    identifier_re().is_some_and(|re| re.is_match(s))
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for e in &config.entities {
        for ident in [&e.name, &e.table_name, &e.primary_key] {
            if !is_identifier(ident) {
                return Err(ConfigError::InvalidIdentifier(ident.clone()));
            }
        }
        if !names.insert(e.name.as_str()) {
            return Err(ConfigError::DuplicateEntity(e.name.clone()));
        }

        let mut fields = HashSet::new();
        for a in &e.attributes {
            if !is_identifier(&a.field) {
                return Err(ConfigError::InvalidIdentifier(format!("{}.{}", e.name, a.field)));
            }
            if !fields.insert(a.field.as_str()) {
                return Err(ConfigError::DuplicateAttribute {
                    entity: e.name.clone(),
                    field: a.field.clone(),
                });
            }
            let data_type = DataType::parse(&a.data_type).ok_or_else(|| ConfigError::UnknownDataType {
                entity: e.name.clone(),
                field: a.field.clone(),
                data_type: a.data_type.clone(),
            })?;
            if data_type.is_relation() && a.options.as_deref().map(str::is_empty).unwrap_or(true) {
                return Err(ConfigError::MissingOptions {
                    entity: e.name.clone(),
                    field: a.field.clone(),
                });
            }
        }

        if e.primary_key != "id" {
            let pk_ok = e
                .attributes
                .iter()
                .find(|a| a.field == e.primary_key)
                .and_then(|a| DataType::parse(&a.data_type))
                .map(|t| !t.is_relation())
                .unwrap_or(false);
            if !pk_ok {
                return Err(ConfigError::InvalidPrimaryKey {
                    entity: e.name.clone(),
                    field: e.primary_key.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttributeConfig, EntityConfig};

    fn entity(name: &str, attributes: Vec<AttributeConfig>) -> EntityConfig {
        EntityConfig {
            name: name.into(),
            table_name: format!("{}s", name),
            primary_key: "id".into(),
            default_page_size: None,
            attributes,
        }
    }

    fn attr(field: &str, data_type: &str, options: Option<&str>) -> AttributeConfig {
        AttributeConfig {
            field: field.into(),
            data_type: data_type.into(),
            options: options.map(String::from),
        }
    }

    #[test]
    fn rejects_duplicate_entities() {
        let config = FullConfig {
            entities: vec![entity("post", vec![]), entity("post", vec![])],
        };
        assert!(matches!(validate(&config), Err(ConfigError::DuplicateEntity(_))));
    }

    #[test]
    fn rejects_path_unsafe_fields() {
        let config = FullConfig {
            entities: vec![entity("post", vec![attr("author.name", "string", None)])],
        };
        assert!(matches!(validate(&config), Err(ConfigError::InvalidIdentifier(_))));
    }

    #[test]
    fn relation_requires_options() {
        let config = FullConfig {
            entities: vec![entity("post", vec![attr("tags", "junction", None)])],
        };
        assert!(matches!(validate(&config), Err(ConfigError::MissingOptions { .. })));
    }

    #[test]
    fn dangling_target_is_not_a_load_error() {
        let config = FullConfig {
            entities: vec![entity("post", vec![attr("owner", "lookup", Some("ghost"))])],
        };
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn custom_primary_key_must_be_declared() {
        let mut e = entity("page", vec![attr("title", "string", None)]);
        e.primary_key = "slug".into();
        let config = FullConfig { entities: vec![e] };
        assert!(matches!(validate(&config), Err(ConfigError::InvalidPrimaryKey { .. })));
    }
}
