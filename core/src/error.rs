// orderflow/src/error.rs

use crate::catalog::OrderStatus;
use crate::model::PaymentStatus;
use anyhow::Error as AnyhowError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Faults of the step pipeline itself, as opposed to failures of the domain
/// logic running inside it.
#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("handler missing for mandatory step: {step_name}")]
  HandlerMissing { step_name: String },

  #[error("pipeline configuration error in step '{step_name}': {message}")]
  Configuration { step_name: String, message: String },

  #[error("error in handler or external operation: {source}")]
  HandlerError {
    #[source]
    source: AnyhowError,
  },

  #[error("internal pipeline error: {0}")]
  Internal(String),
}

impl From<AnyhowError> for PipelineError {
  fn from(err: AnyhowError) -> Self {
    PipelineError::HandlerError { source: err }
  }
}

/// Errors raised by an `OrderStore` unit of work. Every variant means the unit
/// of work was rolled back.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("order {0} not found")]
  OrderNotFound(uuid::Uuid),

  #[error("payment {0} not found")]
  PaymentNotFound(uuid::Uuid),

  #[error("voucher {0} not found")]
  VoucherNotFound(uuid::Uuid),

  /// The order row changed since it was read (optimistic concurrency token).
  #[error("order {order_id} was modified concurrently (expected version {expected}, found {found})")]
  VersionConflict {
    order_id: uuid::Uuid,
    expected: i64,
    found: i64,
  },

  #[error("payment {payment_id} is already {status}")]
  PaymentAlreadySettled {
    payment_id: uuid::Uuid,
    status: PaymentStatus,
  },

  #[error("voucher {voucher_id} already redeemed by user {user_id}")]
  AlreadyRedeemed { user_id: uuid::Uuid, voucher_id: uuid::Uuid },

  #[error("voucher {0} reached its usage cap")]
  UsageCapReached(uuid::Uuid),

  #[error("order code {0} already exists")]
  DuplicateOrderCode(String),

  #[error("voucher code {0} already exists")]
  DuplicateVoucherCode(String),

  #[error("stored data is inconsistent: {0}")]
  Corrupt(String),

  #[error("store backend failure: {0}")]
  Backend(String),
}

/// Voucher rule violations. Expected and user-correctable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoucherError {
  #[error("voucher '{code}' does not exist or is inactive")]
  NotFound { code: String },

  #[error("voucher '{code}' is valid from {starts_at}")]
  NotYetValid { code: String, starts_at: DateTime<Utc> },

  #[error("voucher '{code}' expired at {ended_at}")]
  Expired { code: String, ended_at: DateTime<Utc> },

  #[error("order amount {order_cents} is below the voucher minimum {minimum_cents}")]
  BelowMinimum { minimum_cents: i64, order_cents: i64 },

  #[error("voucher '{code}' has no uses left")]
  Exhausted { code: String },

  #[error("voucher '{code}' was already used by this customer")]
  AlreadyUsed { code: String },

  #[error("invalid discount definition: {0}")]
  InvalidDefinition(String),
}

impl VoucherError {
  /// Customer-facing text. Each rule gets its own message.
  pub fn user_message(&self) -> &'static str {
    match self {
      VoucherError::NotFound { .. } => "This voucher code does not exist.",
      VoucherError::NotYetValid { .. } => "This voucher is not active yet.",
      VoucherError::Expired { .. } => "This voucher has expired.",
      VoucherError::BelowMinimum { .. } => "Your order does not reach the minimum amount for this voucher.",
      VoucherError::Exhausted { .. } => "This voucher has been fully redeemed.",
      VoucherError::AlreadyUsed { .. } => "You have already used this voucher.",
      VoucherError::InvalidDefinition(_) => "This voucher cannot be applied.",
    }
  }
}

/// Coarse classification used by outer layers to choose log severity and the
/// response shown to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Validation,
  Transition,
  Integrity,
  Transient,
  NotFound,
  Infrastructure,
}

#[derive(Debug, Error)]
pub enum EngineError {
  #[error(transparent)]
  Validation(#[from] VoucherError),

  /// The voucher passed validation earlier but lost the race at commit time.
  #[error("voucher '{code}' is no longer available: {reason}")]
  VoucherNoLongerAvailable { code: String, reason: VoucherError },

  #[error("invalid order: {0}")]
  InvalidOrder(String),

  #[error("cannot move order from {current} to {rejected}")]
  InvalidTransition { current: OrderStatus, rejected: OrderStatus },

  #[error("gateway signature verification failed")]
  InvalidSignature,

  #[error("malformed gateway callback: {0}")]
  MalformedCallback(String),

  #[error("amount mismatch for order {order_code}: expected {expected_cents}, received {received_cents}")]
  AmountMismatch {
    order_code: String,
    expected_cents: i64,
    received_cents: i64,
  },

  #[error("currency mismatch for order {order_code}: expected {expected}, received {received}")]
  CurrencyMismatch {
    order_code: String,
    expected: String,
    received: String,
  },

  #[error("order {0} was modified concurrently, retry the request")]
  ConcurrentModification(String),

  #[error("order {0} not found")]
  OrderNotFound(String),

  #[error("no payment recorded for order {0}")]
  PaymentNotFound(String),

  #[error("store failure: {0}")]
  Store(#[from] StoreError),

  #[error("pipeline failure: {0}")]
  Pipeline(#[from] PipelineError),
}

impl EngineError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      EngineError::Validation(_) | EngineError::VoucherNoLongerAvailable { .. } | EngineError::InvalidOrder(_) => {
        ErrorKind::Validation
      }
      EngineError::InvalidTransition { .. } => ErrorKind::Transition,
      EngineError::InvalidSignature
      | EngineError::MalformedCallback(_)
      | EngineError::AmountMismatch { .. }
      | EngineError::CurrencyMismatch { .. } => ErrorKind::Integrity,
      EngineError::ConcurrentModification(_) => ErrorKind::Transient,
      EngineError::OrderNotFound(_) | EngineError::PaymentNotFound(_) => ErrorKind::NotFound,
      EngineError::Store(_) | EngineError::Pipeline(_) => ErrorKind::Infrastructure,
    }
  }

  /// Message safe to show an end user. Integrity failures never reveal which
  /// check failed.
  pub fn public_message(&self) -> String {
    match self {
      EngineError::Validation(v) => v.user_message().to_string(),
      EngineError::VoucherNoLongerAvailable { .. } => {
        "The voucher you applied is no longer available. Please review your order.".to_string()
      }
      EngineError::InvalidOrder(m) => m.clone(),
      EngineError::InvalidTransition { current, .. } => {
        format!("This order can no longer be changed (current status: {}).", current)
      }
      EngineError::InvalidSignature
      | EngineError::MalformedCallback(_)
      | EngineError::AmountMismatch { .. }
      | EngineError::CurrencyMismatch { .. } => "We could not verify your payment.".to_string(),
      EngineError::ConcurrentModification(_) => "The order was updated by someone else. Please try again.".to_string(),
      EngineError::OrderNotFound(_) | EngineError::PaymentNotFound(_) => "Order not found.".to_string(),
      EngineError::Store(_) | EngineError::Pipeline(_) => "An internal error occurred.".to_string(),
    }
  }
}

pub type EngineResult<T, E = EngineError> = std::result::Result<T, E>;
