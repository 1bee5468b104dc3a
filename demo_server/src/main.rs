//! Demo server: loads entity metadata from `_sys_entities` (or seeds it from `CMS_METADATA_PATH`),
//! migrates entity tables and serves the query and metadata routes.

use cms_query::{
    api_router, apply_migrations, ensure_database_exists, ensure_sys_tables, init_tracing, load_from_pool, parse_config,
    replace_entities, resolve, AppState, ModelHandle, Settings,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing("cms_query=info,demo_server=info");

    let settings = Settings::from_env();
    settings.validate()?;
    ensure_database_exists(&settings.database_url).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.database_url)
        .await?;
    ensure_sys_tables(&pool, &settings.sys_schema).await?;

    if let Ok(path) = std::env::var("CMS_METADATA_PATH") {
        let config = parse_config(&tokio::fs::read_to_string(&path).await?)?;
        resolve(&config)?;
        let (written, version) = replace_entities(&pool, &settings.sys_schema, &config.entities).await?;
        tracing::info!(path = %path, written, version, "metadata seeded");
    }

    let config = load_from_pool(&pool, &settings.sys_schema).await?;
    let model = resolve(&config)?;
    apply_migrations(&pool, &model).await?;
    tracing::info!(entities = model.entities().count(), "model loaded");

    let state = AppState {
        pool,
        model: ModelHandle::new(model),
        settings: Arc::new(settings),
    };
    let app = api_router(state);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
