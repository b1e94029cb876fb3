// orderflow/src/lib.rs

//! Orderflow: order lifecycle, payment reconciliation and voucher redemption.
//!
//! The engine is built from a few cooperating parts over one persistence port:
//!  - `StatusCatalog`: statuses, their transition table and legacy codes.
//!  - `StatusHistoryLedger`: append-only status history and tracking timelines.
//!  - `PromotionLedger`: voucher validation and exactly-once redemption.
//!  - `OrderStateMachine`: validated, version-checked status changes.
//!  - `PaymentReconciler`: gateway callback verification and settlement.
//!  - `CheckoutService`: order placement in one unit of work.
//!
//! Reconciliation and checkout run as step pipelines (`pipeline`), with named
//! steps, skip conditions and early stop.

pub mod catalog;
pub mod checkout;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod machine;
pub mod model;
pub mod money;
pub mod notify;
pub mod pipeline;
pub mod promotion;
pub mod reconcile;
pub mod store;

pub use crate::catalog::{allowed_next_statuses, OrderStatus, StatusCatalog, StatusSet};
pub use crate::checkout::{CheckoutRequest, CheckoutService, PlacedOrder};
pub use crate::config::{EngineConfig, GatewayConfig};
pub use crate::error::{EngineError, EngineResult, ErrorKind, PipelineError, StoreError, VoucherError};
pub use crate::gateway::{EmptySecret, GatewayCallback, GatewaySigner, IpnAck, PaymentGateway};
pub use crate::ledger::StatusHistoryLedger;
pub use crate::machine::{OrderStateMachine, TransitionPlan, TransitionScope};
pub use crate::money::{OrderTotals, TotalsError};
pub use crate::notify::{Notifier, SilentNotifier};
pub use crate::pipeline::{ContextData, Pipeline, PipelineControl, PipelineResult, StepDef};
pub use crate::promotion::{PromotionLedger, VoucherQuote};
pub use crate::reconcile::{PaymentReconciler, ReconciliationOutcome};
pub use crate::store::{MemoryStore, OrderStore};

use std::sync::Arc;

/// All components wired over one store.
pub struct Engine {
  config: EngineConfig,
  store: Arc<dyn OrderStore>,
  gateway: Arc<PaymentGateway>,
  ledger: StatusHistoryLedger,
  promotions: Arc<PromotionLedger>,
  machine: Arc<OrderStateMachine>,
  reconciler: PaymentReconciler,
  checkout: CheckoutService,
}

impl Engine {
  pub fn new(config: EngineConfig, store: Arc<dyn OrderStore>, notifier: Arc<dyn Notifier>) -> Result<Self, EmptySecret> {
    let gateway = Arc::new(PaymentGateway::new(config.gateway.clone(), &config.currency)?);
    let promotions = Arc::new(PromotionLedger::new(store.clone()));
    let machine = Arc::new(OrderStateMachine::new(store.clone(), config.transition_max_attempts));
    let reconciler = PaymentReconciler::new(
      store.clone(),
      machine.clone(),
      gateway.clone(),
      notifier,
      &config.currency,
      config.amount_tolerance_cents,
      config.transition_max_attempts,
    );
    let checkout = CheckoutService::new(store.clone(), promotions.clone(), gateway.clone());
    tracing::info!(
      currency = %config.currency,
      amount_tolerance_cents = config.amount_tolerance_cents,
      transition_max_attempts = config.transition_max_attempts,
      gateway = %gateway.name(),
      "order engine ready"
    );

    Ok(Self {
      ledger: StatusHistoryLedger::new(store.clone()),
      config,
      store,
      gateway,
      promotions,
      machine,
      reconciler,
      checkout,
    })
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn store(&self) -> &Arc<dyn OrderStore> {
    &self.store
  }

  pub fn catalog(&self) -> &'static StatusCatalog {
    StatusCatalog::global()
  }

  pub fn gateway(&self) -> &PaymentGateway {
    &self.gateway
  }

  pub fn ledger(&self) -> &StatusHistoryLedger {
    &self.ledger
  }

  pub fn promotions(&self) -> &PromotionLedger {
    &self.promotions
  }

  pub fn machine(&self) -> &OrderStateMachine {
    &self.machine
  }

  pub fn reconciler(&self) -> &PaymentReconciler {
    &self.reconciler
  }

  pub fn checkout(&self) -> &CheckoutService {
    &self.checkout
  }
}
