//! `_sys_*` table DDL and metadata persistence. The tables live in `Settings::sys_schema` (default `cms`).

use crate::config::EntityConfig;
use crate::error::AppError;
use crate::sql::quoted;
use sqlx::ConnectOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::str::FromStr;

const ENTITIES_TABLE: &str = "_sys_entities";

/// Schema-qualified name for a `_sys_*` table (e.g. `"cms"."_sys_entities"`).
pub fn qualified_sys_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

/// Create the metadata schema, `_sys_entities` and its history table.
pub async fn ensure_sys_tables(pool: &PgPool, schema: &str) -> Result<(), AppError> {
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema)))
        .execute(pool)
        .await?;

    let q_table = qualified_sys_table(schema, ENTITIES_TABLE);
    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            payload JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            version BIGINT NOT NULL DEFAULT 1
        )
        "#,
        q_table
    );
    sqlx::query(&ddl).execute(pool).await?;

    let history_table = qualified_sys_table(schema, &format!("{}_history", ENTITIES_TABLE));
    let history_ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id TEXT NOT NULL,
            payload JSONB NOT NULL,
            version BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (id, version)
        )
        "#,
        history_table
    );
    sqlx::query(&history_ddl).execute(pool).await?;
    Ok(())
}

/// Whether `records` hold exactly the payloads already stored (keyed by entity name).
fn payloads_unchanged(current: &HashMap<String, serde_json::Value>, records: &[serde_json::Value]) -> Result<bool, AppError> {
    if current.len() != records.len() {
        return Ok(false);
    }
    for rec in records {
        let id = record_id(rec)?;
        if current.get(&id) != Some(rec) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn record_id(rec: &serde_json::Value) -> Result<String, AppError> {
    rec.get("name")
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| AppError::BadRequest("entity record missing 'name'".into()))
}

/// Replace all entity documents in one transaction. The previous set is copied to history
/// under its version first. Returns `(rows written, version)`; unchanged input writes nothing.
pub async fn replace_entities(
    pool: &PgPool,
    schema: &str,
    entities: &[EntityConfig],
) -> Result<(u64, i64), AppError> {
    let records = entities
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let mut tx = pool.begin().await?;
    let q_table = qualified_sys_table(schema, ENTITIES_TABLE);

    let current_version: (Option<i64>,) = sqlx::query_as(&format!("SELECT MAX(version) FROM {}", q_table))
        .fetch_one(&mut *tx)
        .await?;
    let current_version = current_version.0.unwrap_or(0);

    let rows: Vec<(String, serde_json::Value)> = sqlx::query_as(&format!("SELECT id, payload FROM {}", q_table))
        .fetch_all(&mut *tx)
        .await?;
    let current: HashMap<String, serde_json::Value> = rows.into_iter().collect();
    if payloads_unchanged(&current, &records)? {
        tx.rollback().await?;
        return Ok((0, current_version));
    }

    let history_table = qualified_sys_table(schema, &format!("{}_history", ENTITIES_TABLE));
    sqlx::query(&format!(
        "INSERT INTO {} (id, payload, version, created_at) SELECT id, payload, version, updated_at FROM {}",
        history_table, q_table
    ))
    .execute(&mut *tx)
    .await?;
    sqlx::query(&format!("DELETE FROM {}", q_table)).execute(&mut *tx).await?;

    let new_version = current_version + 1;
    let mut count = 0u64;
    for rec in &records {
        let id = record_id(rec)?;
        sqlx::query(&format!(
            "INSERT INTO {} (id, payload, updated_at, version) VALUES ($1, $2, NOW(), $3)",
            q_table
        ))
        .bind(&id)
        .bind(rec)
        .bind(new_version)
        .execute(&mut *tx)
        .await?;
        count += 1;
    }
    tx.commit().await?;
    tracing::info!(entities = count, version = new_version, "entity metadata replaced");
    Ok((count, new_version))
}

/// Create the database named in `database_url` if it does not exist (connects to `postgres` to do so).
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), AppError> {
    let path_start = url.rfind('/').ok_or_else(|| AppError::BadRequest("DATABASE_URL: no path".into()))? + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sys_tables_are_qualified_by_the_given_schema() {
        assert_eq!(qualified_sys_table("cms", "_sys_entities"), r#""cms"."_sys_entities""#);
        assert_eq!(qualified_sys_table("tenant_a", "_sys_entities_history"), r#""tenant_a"."_sys_entities_history""#);
    }

    #[test]
    fn splits_admin_url_and_database() {
        let (admin, db) = parse_db_name_from_url("postgres://u:p@localhost:5432/cms?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres");
        assert_eq!(db, "cms");
    }

    #[test]
    fn detects_unchanged_payloads() {
        let rec = json!({"name": "post", "tableName": "posts"});
        let mut current = HashMap::new();
        current.insert("post".to_string(), rec.clone());
        assert!(payloads_unchanged(&current, &[rec]).unwrap());
        assert!(!payloads_unchanged(&current, &[json!({"name": "post", "tableName": "articles"})]).unwrap());
        assert!(payloads_unchanged(&current, &[json!({"tableName": "x"})]).is_err());
    }
}
