// order_service/src/main.rs

mod config;
mod db;
mod errors;
mod services;
mod state;
mod web;

use crate::config::{AppConfig, LogFormat, StoreBackend};
use crate::db::PgOrderStore;
use crate::services::seed::seed_vouchers;
use crate::services::LogNotifier;
use crate::state::AppState;

use actix_web::{web as actix_data, App, HttpServer};
use anyhow::Context;
use orderflow::{Engine, MemoryStore, OrderStore};
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

const DB_MAX_CONNECTIONS: u32 = 10;

fn init_tracing(format: LogFormat) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter) // RUST_LOG overrides
    .with_span_events(FmtSpan::CLOSE);
  match format {
    LogFormat::Json => builder.json().init(),
    LogFormat::Pretty => builder.init(),
  }
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn OrderStore>> {
  match config.store_backend {
    StoreBackend::Postgres => {
      let url = config.database_url.as_deref().context("DATABASE_URL is required for the postgres backend")?;
      let store = PgOrderStore::connect(url, DB_MAX_CONNECTIONS)
        .await
        .context("connecting to the database")?;
      store.migrate().await.context("running database migrations")?;
      tracing::info!("Connected to the database and applied migrations.");
      Ok(Arc::new(store))
    }
    StoreBackend::Memory => {
      tracing::warn!("Using the in-memory store; all data is lost on shutdown.");
      Ok(Arc::new(MemoryStore::new()))
    }
  }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
  let loaded = AppConfig::from_env();
  init_tracing(loaded.as_ref().map(|c| c.log_format).unwrap_or(LogFormat::Pretty));

  let app_config = match loaded {
    Ok(cfg) => Arc::new(cfg),
    Err(e) => {
      tracing::error!(error = %e, "Failed to load application configuration.");
      return Err(e).context("loading configuration");
    }
  };
  tracing::info!(backend = ?app_config.store_backend, "Starting order service...");

  let store = build_store(&app_config).await?;
  let notifier = Arc::new(LogNotifier::new(app_config.notify_sender.clone()));
  let engine = Arc::new(Engine::new(app_config.engine.clone(), store, notifier).context("building the order engine")?);

  if app_config.seed_db {
    if let Err(e) = seed_vouchers(&engine).await {
      tracing::error!(error = %e, "Failed to seed demo vouchers.");
    }
  }

  let app_state = AppState {
    engine,
    config: app_config.clone(),
  };

  let server_address = (app_config.server_host.clone(), app_config.server_port);
  tracing::info!(host = %server_address.0, port = server_address.1, "Binding HTTP server");

  HttpServer::new(move || {
    App::new()
      .app_data(actix_data::Data::new(app_state.clone()))
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(web::configure_app_routes)
  })
  .bind(server_address)?
  .run()
  .await?;
  Ok(())
}
