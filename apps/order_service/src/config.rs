// order_service/src/config.rs

use crate::errors::{AppError, Result};
use dotenvy::dotenv;
use orderflow::{EngineConfig, GatewayConfig};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
  Postgres,
  Memory,
}

impl FromStr for StoreBackend {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "postgres" | "pg" => Ok(StoreBackend::Postgres),
      "memory" => Ok(StoreBackend::Memory),
      other => Err(format!("unknown store backend '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
  Pretty,
  Json,
}

// Debug output of GatewayConfig redacts the hash secret.
#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  pub store_backend: StoreBackend,
  pub database_url: Option<String>,
  pub engine: EngineConfig,
  pub notify_sender: String,
  pub seed_db: bool,
  pub log_format: LogFormat,
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok(); // Load .env file if present
    Self::from_lookup(|name| env::var(name).ok())
  }

  /// Builds the configuration from any variable source; `from_env` passes the
  /// process environment.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let required = |name: &str| get(name).ok_or_else(|| AppError::Config(format!("missing environment variable '{}'", name)));
    fn parsed<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T>
    where
      T::Err: std::fmt::Display,
    {
      match raw {
        Some(raw) => raw
          .parse::<T>()
          .map_err(|e| AppError::Config(format!("invalid {} '{}': {}", name, raw, e))),
        None => Ok(default),
      }
    }

    let server_host = get("SERVER_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
    let server_port = parsed("SERVER_PORT", get("SERVER_PORT"), 8080u16)?;
    let store_backend = parsed("STORE_BACKEND", get("STORE_BACKEND"), StoreBackend::Postgres)?;
    let database_url = match store_backend {
      StoreBackend::Postgres => Some(required("DATABASE_URL")?),
      StoreBackend::Memory => get("DATABASE_URL"),
    };

    let mut gateway = GatewayConfig::new(
      get("GATEWAY_MERCHANT_CODE").unwrap_or_else(|| "DEMO0001".to_string()),
      required("GATEWAY_HASH_SECRET")?,
    );
    if let Some(url) = get("GATEWAY_PAYMENT_URL") {
      gateway.payment_url = url;
    }
    gateway.return_url = get("GATEWAY_RETURN_URL")
      .unwrap_or_else(|| format!("http://{}:{}/api/v1/payments/gateway/return", server_host, server_port));

    let mut engine = EngineConfig::new(gateway);
    if let Some(currency) = get("CURRENCY") {
      engine.currency = currency.to_ascii_uppercase();
    }
    engine.amount_tolerance_cents = parsed("AMOUNT_TOLERANCE_CENTS", get("AMOUNT_TOLERANCE_CENTS"), 0i64)?;
    if engine.amount_tolerance_cents < 0 {
      return Err(AppError::Config("AMOUNT_TOLERANCE_CENTS must not be negative".to_string()));
    }
    engine.transition_max_attempts = parsed("TRANSITION_MAX_ATTEMPTS", get("TRANSITION_MAX_ATTEMPTS"), 3u32)?;
    if engine.transition_max_attempts == 0 {
      return Err(AppError::Config("TRANSITION_MAX_ATTEMPTS must be at least 1".to_string()));
    }

    let notify_sender = get("NOTIFY_SENDER").unwrap_or_else(|| "noreply@example.com".to_string());
    let seed_db = parsed("SEED_DB", get("SEED_DB"), false)?;
    let log_format = match get("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase).as_deref() {
      None | Some("pretty") | Some("text") => LogFormat::Pretty,
      Some("json") => LogFormat::Json,
      Some(other) => return Err(AppError::Config(format!("invalid LOG_FORMAT '{}'", other))),
    };

    Ok(Self {
      server_host,
      server_port,
      store_backend,
      database_url,
      engine,
      notify_sender,
      seed_db,
      log_format,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
    let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    AppConfig::from_lookup(|name| vars.get(name).cloned())
  }

  #[test]
  fn memory_backend_needs_only_the_gateway_secret() {
    let config = load(&[("STORE_BACKEND", "memory"), ("GATEWAY_HASH_SECRET", "s3cret")]).unwrap();
    assert_eq!(config.store_backend, StoreBackend::Memory);
    assert_eq!(config.server_port, 8080);
    assert_eq!(config.engine.currency, "VND");
    assert_eq!(config.engine.transition_max_attempts, 3);
    assert_eq!(config.log_format, LogFormat::Pretty);
    assert!(config.engine.gateway.return_url.ends_with("/api/v1/payments/gateway/return"));
    assert!(!format!("{:?}", config).contains("s3cret"));
  }

  #[test]
  fn postgres_backend_requires_a_database_url() {
    let err = load(&[("GATEWAY_HASH_SECRET", "s3cret")]).unwrap_err();
    assert!(matches!(err, AppError::Config(ref m) if m.contains("DATABASE_URL")));
  }

  #[test]
  fn missing_secret_and_bad_numbers_are_reported() {
    let err = load(&[("STORE_BACKEND", "memory")]).unwrap_err();
    assert!(matches!(err, AppError::Config(ref m) if m.contains("GATEWAY_HASH_SECRET")));

    let err = load(&[
      ("STORE_BACKEND", "memory"),
      ("GATEWAY_HASH_SECRET", "s3cret"),
      ("SERVER_PORT", "eighty"),
    ])
    .unwrap_err();
    assert!(matches!(err, AppError::Config(ref m) if m.contains("SERVER_PORT")));
  }

  #[test]
  fn overrides_are_applied() {
    let config = load(&[
      ("STORE_BACKEND", "memory"),
      ("GATEWAY_HASH_SECRET", "s3cret"),
      ("CURRENCY", "usd"),
      ("AMOUNT_TOLERANCE_CENTS", "2"),
      ("LOG_FORMAT", "json"),
      ("SEED_DB", "true"),
    ])
    .unwrap();
    assert_eq!(config.engine.currency, "USD");
    assert_eq!(config.engine.amount_tolerance_cents, 2);
    assert_eq!(config.log_format, LogFormat::Json);
    assert!(config.seed_db);
  }
}
