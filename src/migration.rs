//! DDL for entity and junction tables, derived from the resolved model. Idempotent.

use crate::config::{
    Attribute, DataType, Entity, Relation, ResolvedModel, CREATED_AT_FIELD, DELETED_FIELD, PUBLICATION_STATUS_FIELD,
    UPDATED_AT_FIELD,
};
use crate::error::AppError;
use crate::sql::quoted;
use sqlx::PgPool;
use std::collections::BTreeSet;

/// Column definition (without the name) for a non-key attribute.
fn column_type(attr: &Attribute) -> Option<String> {
    let base = attr.data_type.pg_type()?;
    Some(match attr.field.as_str() {
        CREATED_AT_FIELD | UPDATED_AT_FIELD => "timestamptz NOT NULL DEFAULT NOW()".to_string(),
        DELETED_FIELD => "boolean NOT NULL DEFAULT FALSE".to_string(),
        PUBLICATION_STATUS_FIELD => "text NOT NULL DEFAULT 'published'".to_string(),
        _ => base.to_string(),
    })
}

fn key_definition(entity: &Entity) -> String {
    let pk = entity.primary_key_attribute();
    let typ = match pk.data_type {
        DataType::Int => "bigserial",
        other => other.pg_type().unwrap_or("bigint"),
    };
    format!("{} {} PRIMARY KEY", quoted(&pk.field), typ)
}

fn entity_statements(entity: &Entity, out: &mut Vec<String>) {
    let table = quoted(&entity.table_name);
    let mut defs = vec![key_definition(entity)];
    let columns: Vec<(&Attribute, String)> = entity
        .column_attributes()
        .filter(|a| a.field != entity.primary_key)
        .filter_map(|a| column_type(a).map(|t| (a, t)))
        .collect();
    for (a, t) in &columns {
        defs.push(format!("{} {}", quoted(&a.field), t));
    }
    out.push(format!("CREATE TABLE IF NOT EXISTS {} ({})", table, defs.join(", ")));
    for (a, t) in &columns {
        out.push(format!("ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}", table, quoted(&a.field), t));
        if a.data_type == DataType::Lookup {
            out.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quoted(&format!("{}_{}_idx", entity.table_name, a.field)),
                table,
                quoted(&a.field)
            ));
        }
    }
}

/// Ordered DDL statements for every entity table, then every junction table.
pub fn migration_statements(model: &ResolvedModel) -> Vec<String> {
    let mut entities: Vec<_> = model.entities().collect();
    entities.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = Vec::new();
    for e in &entities {
        entity_statements(e, &mut out);
    }

    let mut junctions = BTreeSet::new();
    for e in &entities {
        for a in e.attributes.iter().filter(|a| a.data_type == DataType::Junction) {
            match model.resolve_relation(e, a) {
                Ok(Relation::Junction(j)) => {
                    if junctions.insert(j.junction_entity.table_name.clone()) {
                        entity_statements(&j.junction_entity, &mut out);
                    }
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(entity = %e.name, field = %a.field, error = %err, "junction table skipped"),
            }
        }
    }
    out
}

/// Create or extend all tables for `model`. Safe to run on every start.
pub async fn apply_migrations(pool: &PgPool, model: &ResolvedModel) -> Result<(), AppError> {
    let statements = migration_statements(model);
    for sql in &statements {
        tracing::debug!(sql = %sql, "migration");
        sqlx::query(sql).execute(pool).await?;
    }
    tracing::info!(statements = statements.len(), "migrations applied");
    Ok(())
}
