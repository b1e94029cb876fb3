// order_service/src/web/handlers/mod.rs

pub mod checkout_handlers;
pub mod order_handlers;
pub mod payment_handlers;
pub mod voucher_handlers;

use orderflow::model::Order;
use orderflow::StatusCatalog;
use serde_json::{json, Value};

/// The order fields every order-returning endpoint shares.
pub(crate) fn order_summary(order: &Order) -> Value {
  json!({
    "orderId": order.id,
    "orderCode": order.code,
    "status": order.status,
    "statusLabel": StatusCatalog::global().label(order.status),
    "subtotalCents": order.totals.subtotal_cents(),
    "shippingFeeCents": order.totals.shipping_fee_cents(),
    "discountCents": order.totals.discount_cents(),
    "totalCents": order.totals.total_cents(),
    "deliveryMethod": order.delivery_method,
    "paymentMethod": order.payment_method,
  })
}

#[cfg(test)]
pub(crate) mod testing {
  use crate::config::AppConfig;
  use crate::state::AppState;
  use orderflow::{Engine, MemoryStore, SilentNotifier};
  use std::collections::HashMap;
  use std::sync::Arc;

  pub const SECRET: &str = "handler-test-secret";

  pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
  }

  pub fn test_state() -> TestApp {
    let vars: HashMap<&str, &str> = [("STORE_BACKEND", "memory"), ("GATEWAY_HASH_SECRET", SECRET)].into_iter().collect();
    let config = AppConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).expect("test config loads");
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(config.engine.clone(), store.clone(), Arc::new(SilentNotifier)).expect("secret is set");
    TestApp {
      state: AppState {
        engine: Arc::new(engine),
        config: Arc::new(config),
      },
      store,
    }
  }
}
