// orderflow/src/store/mod.rs

//! The persistence port.
//!
//! Every mutating method is one unit of work: it either applies all of its
//! writes or none of them. Order rows carry a `version` token; writes built
//! from a stale read fail with `StoreError::VersionConflict` instead of
//! overwriting.

pub mod memory;

use crate::catalog::OrderStatus;
use crate::error::StoreError;
use crate::model::{NewHistoryEntry, NewRedemption, Order, Payment, PaymentStatus, StatusHistoryEntry, Voucher, VoucherRedemption};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;

/// A validated status change of one order together with its ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
  pub order_id: Uuid,
  pub expected_version: i64,
  pub from: OrderStatus,
  pub to: OrderStatus,
  pub entry: NewHistoryEntry,
}

/// Terminal outcome of a gateway payment, plus the order change it drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementWrite {
  pub payment_id: Uuid,
  pub order_id: Uuid,
  pub status: PaymentStatus,
  pub transaction_ref: Option<String>,
  pub settled_at: DateTime<Utc>,
  pub notes: Option<String>,
  pub order_change: Option<StatusChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledPayment {
  pub payment: Payment,
  pub order: Order,
}

/// A voucher use to record, checked against the per-user cap inside the same
/// unit of work that inserts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionClaim {
  pub redemption: NewRedemption,
  pub per_user_cap: u32,
}

/// Everything checkout writes in one go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutDraft {
  pub order: Order,
  pub initial_entry: NewHistoryEntry,
  pub payment: Option<Payment>,
  pub redemption: Option<RedemptionClaim>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRecord {
  pub order: Order,
  pub payment: Option<Payment>,
  pub redemption: Option<VoucherRedemption>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
  Appended(StatusHistoryEntry),
  /// The entry repeated the latest one and was dropped; carries the existing entry.
  Suppressed(StatusHistoryEntry),
}

#[async_trait]
pub trait OrderStore: Send + Sync {
  async fn order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;

  async fn order_by_code(&self, code: &str) -> Result<Option<Order>, StoreError>;

  async fn payment_for_order(&self, order_id: Uuid) -> Result<Option<Payment>, StoreError>;

  /// Case-insensitive lookup.
  async fn voucher_by_code(&self, code: &str) -> Result<Option<Voucher>, StoreError>;

  async fn voucher(&self, voucher_id: Uuid) -> Result<Option<Voucher>, StoreError>;

  async fn insert_voucher(&self, voucher: Voucher) -> Result<Voucher, StoreError>;

  async fn redemption_count(&self, user_id: Uuid, voucher_id: Uuid) -> Result<u32, StoreError>;

  /// Checks the per-user cap, bumps the voucher usage counter only while it is
  /// below the global cap, and inserts the redemption, atomically.
  async fn redeem(&self, claim: RedemptionClaim) -> Result<VoucherRedemption, StoreError>;

  /// Inserts the order, its first ledger entry, the optional payment and the
  /// optional redemption (with the same checks as `redeem`), atomically.
  async fn create_checkout(&self, draft: CheckoutDraft) -> Result<CheckoutRecord, StoreError>;

  /// Updates the order status and appends the ledger entry, atomically.
  async fn apply_status_change(&self, change: StatusChange) -> Result<Order, StoreError>;

  /// Settles a still-pending payment and applies the optional order change
  /// with its ledger entry, atomically.
  async fn settle_payment(&self, write: SettlementWrite) -> Result<SettledPayment, StoreError>;

  /// Appends a ledger entry on its own. An ordinary entry that repeats the
  /// order's latest status is suppressed.
  async fn append_history(&self, entry: NewHistoryEntry) -> Result<AppendOutcome, StoreError>;

  /// Ledger entries of an order, oldest first.
  async fn history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, StoreError>;
}
