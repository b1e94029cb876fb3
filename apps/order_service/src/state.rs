// order_service/src/state.rs
use crate::config::AppConfig;
use orderflow::Engine;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
  pub engine: Arc<Engine>,
  pub config: Arc<AppConfig>,
}
