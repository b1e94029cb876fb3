// orderflow/src/checkout.rs

//! Order placement: voucher validation, pricing, the single write of order,
//! first history entry, payment and redemption, and the gateway redirect.

use crate::catalog::OrderStatus;
use crate::error::{EngineError, EngineResult, PipelineError, StoreError};
use crate::gateway::PaymentGateway;
use crate::model::{
  Actor, DeliveryMethod, Destination, NewHistoryEntry, NewRedemption, Order, Payment, PaymentMethod, Voucher,
  VoucherRedemption,
};
use crate::money::OrderTotals;
use crate::pipeline::{ContextData, Pipeline, PipelineControl, SkipCondition};
use crate::promotion::{claim_rejection, PromotionLedger, VoucherQuote};
use crate::store::{CheckoutDraft, CheckoutRecord, OrderStore, RedemptionClaim};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const ORDER_CODE_ATTEMPTS: u32 = 3;
const UNKNOWN_CLIENT_IP: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
  pub customer_id: Uuid,
  pub subtotal_cents: i64,
  pub shipping_fee_cents: i64,
  pub delivery_method: DeliveryMethod,
  pub destination: Destination,
  pub payment_method: PaymentMethod,
  pub voucher_code: Option<String>,
  /// The customer already saw this voucher accepted (cart review). A refusal
  /// now is reported as `VoucherNoLongerAvailable` instead of a plain
  /// validation error.
  pub voucher_previewed: bool,
  pub client_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedOrder {
  pub order: Order,
  pub payment: Option<Payment>,
  pub redemption: Option<VoucherRedemption>,
  /// Present for gateway payments.
  pub redirect_url: Option<String>,
}

#[derive(Debug)]
struct CheckoutContext {
  request: CheckoutRequest,
  now: DateTime<Utc>,
  quote: Option<VoucherQuote>,
  totals: Option<OrderTotals>,
  record: Option<CheckoutRecord>,
  redirect_url: Option<String>,
}

struct Shared {
  store: Arc<dyn OrderStore>,
  promotions: Arc<PromotionLedger>,
  gateway: Arc<PaymentGateway>,
}

pub struct CheckoutService {
  pipeline: Pipeline<CheckoutContext, EngineError>,
}

impl CheckoutService {
  pub fn new(store: Arc<dyn OrderStore>, promotions: Arc<PromotionLedger>, gateway: Arc<PaymentGateway>) -> Self {
    let shared = Arc::new(Shared {
      store,
      promotions,
      gateway,
    });

    let no_voucher: SkipCondition<CheckoutContext> =
      Arc::new(|ctx: ContextData<CheckoutContext>| ctx.read().request.voucher_code.is_none());
    let offline_payment: SkipCondition<CheckoutContext> =
      Arc::new(|ctx: ContextData<CheckoutContext>| !ctx.read().request.payment_method.requires_gateway());

    let mut pipeline = Pipeline::new(&[
      ("validate_voucher", false, Some(no_voucher)),
      ("price_order", false, None),
      ("persist_order", false, None),
      ("build_payment_redirect", false, Some(offline_payment)),
    ]);

    let s = shared.clone();
    pipeline.on_root("validate_voucher", move |ctx| validate_voucher(s.clone(), ctx));
    pipeline.on_root("price_order", price_order);
    let s = shared.clone();
    pipeline.on_root("persist_order", move |ctx| persist_order(s.clone(), ctx));
    let s = shared;
    pipeline.on_root("build_payment_redirect", move |ctx| build_payment_redirect(s.clone(), ctx));

    Self { pipeline }
  }

  pub fn step_names(&self) -> Vec<&str> {
    self.pipeline.step_names()
  }

  #[instrument(
    name = "CheckoutService::place_order",
    skip_all,
    fields(customer_id = %request.customer_id, payment_method = %request.payment_method),
    err(Display)
  )]
  pub async fn place_order(&self, request: CheckoutRequest) -> EngineResult<PlacedOrder> {
    let ctx = ContextData::new(CheckoutContext {
      request,
      now: Utc::now(),
      quote: None,
      totals: None,
      record: None,
      redirect_url: None,
    });
    self.pipeline.run(ctx.clone()).await?;

    let mut data = ctx.write();
    let record = data
      .record
      .take()
      .ok_or_else(|| PipelineError::Internal("checkout finished without a stored order".to_string()))?;
    Ok(PlacedOrder {
      order: record.order,
      payment: record.payment,
      redemption: record.redemption,
      redirect_url: data.redirect_url.take(),
    })
  }
}

/// `yyMMdd` followed by eight upper-case hex characters.
pub fn generate_order_code(now: DateTime<Utc>) -> String {
  let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
  format!("{}{}", now.format("%y%m%d"), suffix.to_uppercase())
}

async fn validate_voucher(shared: Arc<Shared>, ctx: ContextData<CheckoutContext>) -> EngineResult<PipelineControl> {
  let (customer_id, code, subtotal, previewed, now) = {
    let data = ctx.read();
    (
      data.request.customer_id,
      data.request.voucher_code.clone().unwrap_or_default(),
      data.request.subtotal_cents,
      data.request.voucher_previewed,
      data.now,
    )
  };

  match shared.promotions.validate_at(customer_id, &code, subtotal, now).await {
    Ok(quote) => {
      ctx.write().quote = Some(quote);
      Ok(PipelineControl::Continue)
    }
    Err(EngineError::Validation(reason)) if previewed => {
      warn!(voucher_code = %code, %reason, "previewed voucher no longer available");
      Err(EngineError::VoucherNoLongerAvailable {
        code: Voucher::normalize_code(&code),
        reason,
      })
    }
    Err(e) => Err(e),
  }
}

async fn price_order(ctx: ContextData<CheckoutContext>) -> EngineResult<PipelineControl> {
  let totals = {
    let data = ctx.read();
    let request = &data.request;
    if !request.destination.matches(request.delivery_method) {
      return Err(EngineError::InvalidOrder(format!(
        "destination does not fit delivery method {}",
        request.delivery_method.as_str()
      )));
    }
    if request.subtotal_cents <= 0 {
      return Err(EngineError::InvalidOrder("order is empty".to_string()));
    }
    let discount = data.quote.as_ref().map_or(0, |q| q.discount_cents);
    OrderTotals::new(request.subtotal_cents, request.shipping_fee_cents, discount)
      .map_err(|e| EngineError::InvalidOrder(e.to_string()))?
  };
  ctx.write().totals = Some(totals);
  Ok(PipelineControl::Continue)
}

async fn persist_order(shared: Arc<Shared>, ctx: ContextData<CheckoutContext>) -> EngineResult<PipelineControl> {
  let (request, now, quote, totals) = {
    let data = ctx.read();
    let totals = data
      .totals
      .ok_or_else(|| PipelineError::Internal("order not priced".to_string()))?;
    (data.request.clone(), data.now, data.quote.clone(), totals)
  };

  let mut attempt = 0;
  let record = loop {
    attempt += 1;
    let draft = build_draft(&request, now, quote.as_ref(), totals);
    let code = draft.order.code.clone();
    match shared.store.create_checkout(draft).await {
      Ok(record) => break record,
      Err(StoreError::DuplicateOrderCode(_)) if attempt < ORDER_CODE_ATTEMPTS => {
        warn!(order_code = %code, "order code collision, generating another");
      }
      Err(e @ (StoreError::AlreadyRedeemed { .. } | StoreError::UsageCapReached(_) | StoreError::VoucherNotFound(_))) => {
        let voucher_code = quote.as_ref().map(|q| q.voucher.code.clone()).unwrap_or_default();
        return Err(match claim_rejection(&voucher_code, e) {
          EngineError::Validation(reason) => EngineError::VoucherNoLongerAvailable {
            code: voucher_code,
            reason,
          },
          other => other,
        });
      }
      Err(e) => return Err(e.into()),
    }
  };

  info!(
    order_code = %record.order.code,
    total_cents = record.order.total_cents(),
    voucher = record.redemption.is_some(),
    "order placed"
  );
  ctx.write().record = Some(record);
  Ok(PipelineControl::Continue)
}

fn build_draft(
  request: &CheckoutRequest,
  now: DateTime<Utc>,
  quote: Option<&VoucherQuote>,
  totals: OrderTotals,
) -> CheckoutDraft {
  let order = Order {
    id: Uuid::new_v4(),
    code: generate_order_code(now),
    customer_id: request.customer_id,
    status: OrderStatus::PendingConfirmation,
    totals,
    delivery_method: request.delivery_method,
    destination: request.destination,
    payment_method: request.payment_method,
    voucher_id: quote.map(|q| q.voucher.id),
    version: 0,
    created_at: now,
    updated_at: now,
  };
  let initial_entry = NewHistoryEntry::transition(
    order.id,
    OrderStatus::PendingConfirmation,
    Actor::Customer(request.customer_id),
    Some("order placed".to_string()),
    now,
  );
  let payment = request
    .payment_method
    .requires_gateway()
    .then(|| Payment::pending(order.id, order.total_cents(), now));
  let redemption = quote.map(|q| RedemptionClaim {
    redemption: NewRedemption {
      user_id: request.customer_id,
      voucher_id: q.voucher.id,
      order_id: Some(order.id),
      discount_cents: q.discount_cents,
      redeemed_at: now,
    },
    per_user_cap: q.voucher.per_user_limit(),
  });

  CheckoutDraft {
    order,
    initial_entry,
    payment,
    redemption,
  }
}

async fn build_payment_redirect(
  shared: Arc<Shared>,
  ctx: ContextData<CheckoutContext>,
) -> EngineResult<PipelineControl> {
  let url = {
    let data = ctx.read();
    let record = data
      .record
      .as_ref()
      .ok_or_else(|| PipelineError::Internal("order not stored".to_string()))?;
    let client_ip = data.request.client_ip.as_deref().unwrap_or(UNKNOWN_CLIENT_IP);
    shared.gateway.payment_url(&record.order, client_ip, data.now)
  };
  ctx.write().redirect_url = Some(url);
  Ok(PipelineControl::Continue)
}
