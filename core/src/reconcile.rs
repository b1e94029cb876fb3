// orderflow/src/reconcile.rs

//! Payment gateway callback reconciliation.
//!
//! A callback runs through a fixed pipeline:
//!
//! | step                | on failure                         |
//! |---------------------|------------------------------------|
//! | `verify_signature`  | `InvalidSignature`, nothing read   |
//! | `resolve_order`     | `OrderNotFound` / `PaymentNotFound` |
//! | `verify_amount`     | `AmountMismatch` / `CurrencyMismatch` |
//! | `check_idempotency` | stops with `Duplicate`             |
//! | `commit_settlement` | store error, all writes rolled back |
//! | `notify_customer`   | logged, never fails the run; only for live orders past pending |

use crate::catalog::OrderStatus;
use crate::error::{EngineError, EngineResult, ErrorKind, PipelineError, StoreError};
use crate::gateway::{fields, response_message, GatewayCallback, IpnAck, PaymentGateway};
use crate::machine::{OrderStateMachine, TransitionPlan, TransitionScope};
use crate::model::{Actor, Order, Payment, PaymentStatus};
use crate::notify::Notifier;
use crate::pipeline::{ContextData, Pipeline, PipelineControl, PipelineResult, SkipCondition};
use crate::store::{OrderStore, SettlementWrite};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationOutcome {
  /// Successful payment recorded. The order is confirmed, or left alone if
  /// staff had already moved it further or it was cancelled.
  Settled { order: Order, payment: Payment, notified: bool },
  /// Failed payment recorded and the order cancelled.
  Rejected {
    order: Order,
    payment: Payment,
    response_code: String,
  },
  /// The payment was already settled; nothing was written.
  Duplicate {
    order_code: String,
    payment_status: PaymentStatus,
  },
}

impl ReconciliationOutcome {
  pub fn order_code(&self) -> &str {
    match self {
      ReconciliationOutcome::Settled { order, .. } | ReconciliationOutcome::Rejected { order, .. } => &order.code,
      ReconciliationOutcome::Duplicate { order_code, .. } => order_code,
    }
  }

  pub fn ack(&self) -> IpnAck {
    match self {
      ReconciliationOutcome::Duplicate { .. } => IpnAck::ALREADY_CONFIRMED,
      _ => IpnAck::CONFIRMED,
    }
  }
}

#[derive(Debug, Default)]
struct CallbackContext {
  params: HashMap<String, String>,
  callback: Option<GatewayCallback>,
  order: Option<Order>,
  payment: Option<Payment>,
  outcome: Option<ReconciliationOutcome>,
}

struct Shared {
  store: Arc<dyn OrderStore>,
  machine: Arc<OrderStateMachine>,
  gateway: Arc<PaymentGateway>,
  notifier: Arc<dyn Notifier>,
  currency: String,
  amount_tolerance_cents: i64,
  max_attempts: u32,
}

pub struct PaymentReconciler {
  pipeline: Pipeline<CallbackContext, EngineError>,
}

impl PaymentReconciler {
  pub fn new(
    store: Arc<dyn OrderStore>,
    machine: Arc<OrderStateMachine>,
    gateway: Arc<PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    currency: &str,
    amount_tolerance_cents: i64,
    max_attempts: u32,
  ) -> Self {
    let shared = Arc::new(Shared {
      store,
      machine,
      gateway,
      notifier,
      currency: currency.to_string(),
      amount_tolerance_cents: amount_tolerance_cents.max(0),
      max_attempts: max_attempts.max(1),
    });

    let not_live: SkipCondition<CallbackContext> = Arc::new(|ctx: ContextData<CallbackContext>| {
      !matches!(
        &ctx.read().outcome,
        Some(ReconciliationOutcome::Settled { order, .. })
          if !matches!(order.status, OrderStatus::PendingConfirmation | OrderStatus::Cancelled)
      )
    });
    let mut pipeline = Pipeline::new(&[
      ("verify_signature", false, None),
      ("resolve_order", false, None),
      ("verify_amount", false, None),
      ("check_idempotency", false, None),
      ("commit_settlement", false, None),
      ("notify_customer", true, Some(not_live)),
    ]);

    let s = shared.clone();
    pipeline.on_root("verify_signature", move |ctx| verify_signature(s.clone(), ctx));
    let s = shared.clone();
    pipeline.on_root("resolve_order", move |ctx| resolve_order(s.clone(), ctx));
    let s = shared.clone();
    pipeline.on_root("verify_amount", move |ctx| verify_amount(s.clone(), ctx));
    pipeline.on_root("check_idempotency", check_idempotency);
    let s = shared.clone();
    pipeline.on_root("commit_settlement", move |ctx| commit_settlement(s.clone(), ctx));
    let s = shared;
    pipeline.on_root("notify_customer", move |ctx| notify_customer(s.clone(), ctx));

    Self { pipeline }
  }

  pub fn step_names(&self) -> Vec<&str> {
    self.pipeline.step_names()
  }

  /// Applies one gateway callback. Replays of an already applied callback
  /// return `Duplicate` and write nothing.
  #[instrument(
    name = "PaymentReconciler::handle_callback",
    skip_all,
    fields(order_code = params.get(fields::ORDER_CODE).map(String::as_str).unwrap_or(""))
  )]
  pub async fn handle_callback(&self, params: HashMap<String, String>) -> EngineResult<ReconciliationOutcome> {
    let ctx = ContextData::new(CallbackContext {
      params,
      ..Default::default()
    });
    match self.pipeline.run(ctx.clone()).await {
      Ok(PipelineResult::Completed) | Ok(PipelineResult::Stopped) => {}
      Err(e) => {
        log_rejection(&e);
        return Err(e);
      }
    }
    let outcome = ctx.write().outcome.take();
    outcome.ok_or_else(|| PipelineError::Internal("callback pipeline finished without an outcome".to_string()).into())
  }
}

fn log_rejection(err: &EngineError) {
  match err.kind() {
    ErrorKind::Integrity => error!(error = %err, "gateway callback rejected"),
    ErrorKind::Infrastructure => error!(error = %err, "gateway callback failed"),
    _ => warn!(error = %err, "gateway callback not applied"),
  }
}

async fn verify_signature(shared: Arc<Shared>, ctx: ContextData<CallbackContext>) -> EngineResult<PipelineControl> {
  let callback = {
    let data = ctx.read();
    shared.gateway.verify_callback(&data.params)?
  };
  ctx.write().callback = Some(callback);
  Ok(PipelineControl::Continue)
}

fn callback_of(ctx: &ContextData<CallbackContext>) -> EngineResult<GatewayCallback> {
  ctx
    .read()
    .callback
    .clone()
    .ok_or_else(|| PipelineError::Internal("callback not parsed".to_string()).into())
}

fn records_of(ctx: &ContextData<CallbackContext>) -> EngineResult<(Order, Payment)> {
  let data = ctx.read();
  match (&data.order, &data.payment) {
    (Some(order), Some(payment)) => Ok((order.clone(), payment.clone())),
    _ => Err(PipelineError::Internal("order not resolved".to_string()).into()),
  }
}

async fn resolve_order(shared: Arc<Shared>, ctx: ContextData<CallbackContext>) -> EngineResult<PipelineControl> {
  let callback = callback_of(&ctx)?;
  let order = shared
    .store
    .order_by_code(&callback.order_code)
    .await?
    .ok_or_else(|| EngineError::OrderNotFound(callback.order_code.clone()))?;
  let payment = shared
    .store
    .payment_for_order(order.id)
    .await?
    .ok_or_else(|| EngineError::PaymentNotFound(callback.order_code.clone()))?;

  let mut data = ctx.write();
  data.order = Some(order);
  data.payment = Some(payment);
  Ok(PipelineControl::Continue)
}

async fn verify_amount(shared: Arc<Shared>, ctx: ContextData<CallbackContext>) -> EngineResult<PipelineControl> {
  let callback = callback_of(&ctx)?;
  let (order, payment) = records_of(&ctx)?;

  if let Some(currency) = &callback.currency {
    if !currency.eq_ignore_ascii_case(&shared.currency) {
      error!(order_code = %order.code, expected = %shared.currency, received = %currency, "callback currency mismatch");
      return Err(EngineError::CurrencyMismatch {
        order_code: order.code,
        expected: shared.currency.clone(),
        received: currency.clone(),
      });
    }
  }
  if payment.amount_cents != order.total_cents() {
    return Err(
      StoreError::Corrupt(format!(
        "payment {} amount {} differs from order total {}",
        payment.id,
        payment.amount_cents,
        order.total_cents()
      ))
      .into(),
    );
  }
  let difference = callback.amount_cents.abs_diff(order.total_cents());
  if difference > shared.amount_tolerance_cents.unsigned_abs() {
    error!(
      order_code = %order.code,
      expected_cents = order.total_cents(),
      received_cents = callback.amount_cents,
      transaction_no = callback.transaction_no.as_deref().unwrap_or(""),
      "callback amount mismatch, possible tampering"
    );
    return Err(EngineError::AmountMismatch {
      order_code: order.code.clone(),
      expected_cents: order.total_cents(),
      received_cents: callback.amount_cents,
    });
  }
  Ok(PipelineControl::Continue)
}

async fn check_idempotency(ctx: ContextData<CallbackContext>) -> EngineResult<PipelineControl> {
  let (order, payment) = records_of(&ctx)?;
  if payment.status.is_terminal() {
    info!(order_code = %order.code, payment_status = %payment.status, "duplicate callback, already processed");
    ctx.write().outcome = Some(ReconciliationOutcome::Duplicate {
      order_code: order.code,
      payment_status: payment.status,
    });
    return Ok(PipelineControl::Stop);
  }
  Ok(PipelineControl::Continue)
}

async fn commit_settlement(shared: Arc<Shared>, ctx: ContextData<CallbackContext>) -> EngineResult<PipelineControl> {
  let callback = callback_of(&ctx)?;
  let (mut order, mut payment) = records_of(&ctx)?;
  let actor = Actor::gateway(shared.gateway.name());
  let success = callback.is_success();
  let target = if success { OrderStatus::Confirmed } else { OrderStatus::Cancelled };

  for attempt in 1..=shared.max_attempts {
    if attempt > 1 {
      order = shared
        .store
        .order(order.id)
        .await?
        .ok_or_else(|| EngineError::OrderNotFound(order.code.clone()))?;
      payment = shared
        .store
        .payment_for_order(order.id)
        .await?
        .ok_or_else(|| EngineError::PaymentNotFound(order.code.clone()))?;
      if payment.status.is_terminal() {
        ctx.write().outcome = Some(ReconciliationOutcome::Duplicate {
          order_code: order.code,
          payment_status: payment.status,
        });
        return Ok(PipelineControl::Stop);
      }
    }

    let now = Utc::now();
    let mut notes: Vec<String> = Vec::new();
    if !success {
      let code = callback.failure_code();
      notes.push(format!("gateway response {}: {}", code, response_message(code)));
    }
    let entry_note = if success {
      format!("payment confirmed by {}", shared.gateway.name())
    } else {
      format!("payment failed at {}", shared.gateway.name())
    };

    let order_change = match shared
      .machine
      .plan(&order, target, &actor, Some(&entry_note), TransitionScope::Any, now)
    {
      Ok(TransitionPlan::Change(change)) => Some(change),
      Ok(TransitionPlan::Unchanged) => None,
      Err(EngineError::InvalidTransition { current, .. }) if success && current != OrderStatus::Cancelled => {
        info!(order_code = %order.code, order_status = %current, "payment arrived after staff advanced the order");
        None
      }
      Err(EngineError::InvalidTransition { current, .. }) => {
        warn!(
          order_code = %order.code,
          order_status = %current,
          paid = success,
          "payment settled on an order that can no longer follow it"
        );
        if success {
          notes.push(format!("order was already {} when payment arrived; refund required", current));
        }
        None
      }
      Err(other) => return Err(other),
    };

    let write = SettlementWrite {
      payment_id: payment.id,
      order_id: order.id,
      status: if success { PaymentStatus::Completed } else { PaymentStatus::Failed },
      transaction_ref: callback.transaction_no.clone(),
      settled_at: now,
      notes: if notes.is_empty() { None } else { Some(notes.join("; ")) },
      order_change,
    };

    match shared.store.settle_payment(write).await {
      Ok(settled) => {
        info!(
          order_code = %settled.order.code,
          payment_status = %settled.payment.status,
          order_status = %settled.order.status,
          "payment reconciled"
        );
        let outcome = if success {
          ReconciliationOutcome::Settled {
            order: settled.order,
            payment: settled.payment,
            notified: false,
          }
        } else {
          ReconciliationOutcome::Rejected {
            order: settled.order,
            payment: settled.payment,
            response_code: callback.failure_code().to_string(),
          }
        };
        ctx.write().outcome = Some(outcome);
        return Ok(PipelineControl::Continue);
      }
      Err(StoreError::PaymentAlreadySettled { status, .. }) => {
        info!(order_code = %order.code, payment_status = %status, "payment settled by a concurrent callback");
        ctx.write().outcome = Some(ReconciliationOutcome::Duplicate {
          order_code: order.code,
          payment_status: status,
        });
        return Ok(PipelineControl::Stop);
      }
      Err(StoreError::VersionConflict { .. }) => {
        warn!(order_code = %order.code, attempt, "order changed while settling payment, retrying");
      }
      Err(other) => return Err(other.into()),
    }
  }
  Err(EngineError::ConcurrentModification(order.code))
}

async fn notify_customer(shared: Arc<Shared>, ctx: ContextData<CallbackContext>) -> EngineResult<PipelineControl> {
  let order = match &ctx.read().outcome {
    Some(ReconciliationOutcome::Settled { order, .. }) => order.clone(),
    _ => return Ok(PipelineControl::Continue),
  };
  let delivered = shared.notifier.send_order_confirmation(&order).await;
  if delivered {
    info!(order_code = %order.code, "order confirmation sent");
  } else {
    warn!(order_code = %order.code, "order confirmation could not be sent");
  }
  if let Some(ReconciliationOutcome::Settled { notified, .. }) = &mut ctx.write().outcome {
    *notified = delivered;
  }
  Ok(PipelineControl::Continue)
}
