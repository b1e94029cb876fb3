// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use orderflow::gateway::fields;
use orderflow::model::{DeliveryMethod, Destination, Discount, Order, PaymentMethod, Voucher};
use orderflow::{
  CheckoutRequest, ContextData, Engine, EngineConfig, GatewayConfig, GatewaySigner, MemoryStore, Notifier,
  PipelineControl, PipelineError, PlacedOrder,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::Level;
use uuid::Uuid;

pub const SECRET: &str = "TESTSECRETKEY0123456789";
pub const MERCHANT: &str = "DEMO0001";

// --- Tracing ---
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

// --- Pipeline engine fixtures ---

/// What a toy callback run did: which steps ran and what they stamped.
#[derive(Clone, Debug, Default)]
pub struct CallbackTrace {
  pub steps_run: u32,
  pub stamps: String,
  pub visited: Vec<String>,
  pub halt_after: Option<String>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TraceError {
  #[error("engine: {0}")]
  Engine(String),

  #[error("step refused: {0}")]
  Refused(String),
}

impl From<PipelineError> for TraceError {
  fn from(err: PipelineError) -> Self {
    TraceError::Engine(format!("{:?}", err))
  }
}

pub fn stamping_step(name: &'static str, stamp: &'static str) -> orderflow::pipeline::Handler<CallbackTrace, TraceError> {
  Box::new(move |ctx: ContextData<CallbackTrace>| {
    Box::pin(async move {
      let mut trace = ctx.write();
      trace.steps_run += 1;
      trace.stamps.push_str(stamp);
      trace.visited.push(name.to_string());
      if trace.halt_after.as_deref() == Some(name) {
        return Ok(PipelineControl::Stop);
      }
      Ok(PipelineControl::Continue)
    })
  })
}

pub fn refusing_step(name: &'static str, reason: &'static str) -> orderflow::pipeline::Handler<CallbackTrace, TraceError> {
  Box::new(move |ctx: ContextData<CallbackTrace>| {
    Box::pin(async move {
      ctx.write().visited.push(name.to_string());
      Err(TraceError::Refused(reason.to_string()))
    })
  })
}

// --- Notifiers ---
#[derive(Default)]
pub struct RecordingNotifier {
  sent: Mutex<Vec<String>>,
  failing: AtomicBool,
}

impl RecordingNotifier {
  pub fn failing() -> Self {
    let notifier = Self::default();
    notifier.failing.store(true, Ordering::SeqCst);
    notifier
  }

  pub fn sent(&self) -> Vec<String> {
    self.sent.lock().clone()
  }
}

#[async_trait]
impl Notifier for RecordingNotifier {
  async fn send_order_confirmation(&self, order: &Order) -> bool {
    if self.failing.load(Ordering::SeqCst) {
      return false;
    }
    self.sent.lock().push(order.code.clone());
    true
  }
}

// --- Engine over the in-memory store ---
pub struct Harness {
  pub engine: Engine,
  pub store: Arc<MemoryStore>,
  pub notifier: Arc<RecordingNotifier>,
}

pub fn test_config() -> EngineConfig {
  EngineConfig::new(GatewayConfig::new(MERCHANT, SECRET))
}

pub fn harness() -> Harness {
  harness_with(test_config(), RecordingNotifier::default())
}

pub fn harness_with(config: EngineConfig, notifier: RecordingNotifier) -> Harness {
  setup_tracing();
  let store = Arc::new(MemoryStore::new());
  let notifier = Arc::new(notifier);
  let engine = Engine::new(config, store.clone(), notifier.clone()).expect("test gateway secret is set");
  Harness { engine, store, notifier }
}

pub fn voucher(code: &str, discount: Discount) -> Voucher {
  let now = Utc::now();
  Voucher {
    id: Uuid::new_v4(),
    code: code.to_string(),
    discount,
    starts_at: now - Duration::days(1),
    ends_at: now + Duration::days(30),
    min_order_cents: None,
    usage_cap: None,
    usage_count: 0,
    per_user_cap: None,
    active: true,
  }
}

impl Harness {
  pub async fn seed_voucher(&self, voucher: Voucher) -> Voucher {
    self.engine.promotions().register(voucher).await.expect("voucher registers")
  }

  pub fn request(&self, customer_id: Uuid, subtotal_cents: i64, payment_method: PaymentMethod) -> CheckoutRequest {
    CheckoutRequest {
      customer_id,
      subtotal_cents,
      shipping_fee_cents: 0,
      delivery_method: DeliveryMethod::HomeDelivery,
      destination: Destination::Address(Uuid::new_v4()),
      payment_method,
      voucher_code: None,
      voucher_previewed: false,
      client_ip: Some("203.0.113.7".to_string()),
    }
  }

  /// Places a gateway-paid home delivery order with no voucher.
  pub async fn gateway_order(&self, subtotal_cents: i64) -> PlacedOrder {
    let request = self.request(Uuid::new_v4(), subtotal_cents, PaymentMethod::Gateway);
    self.engine.checkout().place_order(request).await.expect("order placed")
  }

  pub async fn history_len(&self, order_id: Uuid) -> usize {
    self.engine.ledger().timeline(order_id).await.expect("history readable").len()
  }
}

/// Callback parameters signed the way the gateway signs them.
pub fn signed_callback(order_code: &str, amount_cents: i64, response_code: &str) -> HashMap<String, String> {
  let mut params: HashMap<String, String> = [
    (fields::MERCHANT_CODE, MERCHANT.to_string()),
    (fields::ORDER_CODE, order_code.to_string()),
    (fields::AMOUNT, amount_cents.to_string()),
    (fields::RESPONSE_CODE, response_code.to_string()),
    (fields::TRANSACTION_STATUS, response_code.to_string()),
    (fields::TRANSACTION_NO, "14512345".to_string()),
    (fields::BANK_CODE, "NCB".to_string()),
    (fields::PAY_DATE, "20241019103000".to_string()),
    (fields::ORDER_INFO, format!("Payment for order {}", order_code)),
  ]
  .into_iter()
  .map(|(k, v)| (k.to_string(), v))
  .collect();
  sign_params(&mut params);
  params
}

pub fn sign_params(params: &mut HashMap<String, String>) {
  params.remove(fields::SECURE_HASH);
  let signer = GatewaySigner::new(SECRET).expect("secret is set");
  let canonical = GatewaySigner::canonical_query(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
  params.insert(fields::SECURE_HASH.to_string(), signer.sign(&canonical));
}
