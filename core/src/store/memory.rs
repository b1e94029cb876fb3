// orderflow/src/store/memory.rs

//! In-process `OrderStore`. One mutex guards all tables, so each unit of work
//! is serialised; every precondition is checked before the first write, which
//! gives all-or-nothing behaviour without an undo log.

use crate::error::StoreError;
use crate::model::{
  EntryKind, NewHistoryEntry, Order, Payment, StatusHistoryEntry, Voucher, VoucherRedemption,
};
use crate::store::{
  AppendOutcome, CheckoutDraft, CheckoutRecord, OrderStore, RedemptionClaim, SettledPayment, SettlementWrite,
  StatusChange,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
  orders: HashMap<Uuid, Order>,
  order_codes: HashMap<String, Uuid>,
  // keyed by order id
  payments: HashMap<Uuid, Payment>,
  history: Vec<StatusHistoryEntry>,
  vouchers: HashMap<Uuid, Voucher>,
  voucher_codes: HashMap<String, Uuid>,
  redemptions: Vec<VoucherRedemption>,
}

impl Tables {
  fn redemptions_of(&self, user_id: Uuid, voucher_id: Uuid) -> u32 {
    self
      .redemptions
      .iter()
      .filter(|r| r.user_id == user_id && r.voucher_id == voucher_id)
      .count() as u32
  }

  /// Returns the use number the claim would get.
  fn check_claim(&self, claim: &RedemptionClaim) -> Result<u32, StoreError> {
    let r = &claim.redemption;
    let voucher = self
      .vouchers
      .get(&r.voucher_id)
      .ok_or(StoreError::VoucherNotFound(r.voucher_id))?;
    let used = self.redemptions_of(r.user_id, r.voucher_id);
    if used >= claim.per_user_cap.max(1) {
      return Err(StoreError::AlreadyRedeemed {
        user_id: r.user_id,
        voucher_id: r.voucher_id,
      });
    }
    if !voucher.has_uses_left() {
      return Err(StoreError::UsageCapReached(voucher.id));
    }
    Ok(used + 1)
  }

  fn apply_claim(&mut self, claim: RedemptionClaim, use_number: u32) -> VoucherRedemption {
    let r = claim.redemption;
    if let Some(voucher) = self.vouchers.get_mut(&r.voucher_id) {
      voucher.usage_count += 1;
    }
    let redemption = VoucherRedemption {
      id: Uuid::new_v4(),
      user_id: r.user_id,
      voucher_id: r.voucher_id,
      order_id: r.order_id,
      discount_cents: r.discount_cents,
      use_number,
      redeemed_at: r.redeemed_at,
    };
    self.redemptions.push(redemption.clone());
    redemption
  }

  fn check_change(&self, change: &StatusChange) -> Result<(), StoreError> {
    let order = self
      .orders
      .get(&change.order_id)
      .ok_or(StoreError::OrderNotFound(change.order_id))?;
    if order.version != change.expected_version || order.status != change.from {
      return Err(StoreError::VersionConflict {
        order_id: order.id,
        expected: change.expected_version,
        found: order.version,
      });
    }
    Ok(())
  }

  fn apply_change(&mut self, change: StatusChange) -> Result<Order, StoreError> {
    let order = self
      .orders
      .get_mut(&change.order_id)
      .ok_or(StoreError::OrderNotFound(change.order_id))?;
    order.status = change.to;
    order.version += 1;
    order.updated_at = change.entry.recorded_at;
    let updated = order.clone();
    self.history.push(change.entry.into_entry());
    Ok(updated)
  }

  fn latest_entry(&self, order_id: Uuid) -> Option<&StatusHistoryEntry> {
    self
      .history
      .iter()
      .filter(|e| e.order_id == order_id)
      .max_by_key(|e| e.recorded_at)
  }

  fn duplicate_of(&self, entry: &NewHistoryEntry) -> Option<StatusHistoryEntry> {
    match entry.kind {
      EntryKind::Transition => self
        .latest_entry(entry.order_id)
        .filter(|latest| latest.status == entry.status)
        .cloned(),
      EntryKind::Backfill => self
        .history
        .iter()
        .find(|e| e.order_id == entry.order_id && e.status == entry.status && e.recorded_at == entry.recorded_at)
        .cloned(),
    }
  }
}

#[derive(Default)]
pub struct MemoryStore {
  tables: Mutex<Tables>,
  unavailable: AtomicBool,
  read_only: AtomicBool,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Makes every call fail with `StoreError::Backend` until switched back.
  /// Used to exercise rollback and retry paths.
  pub fn set_unavailable(&self, unavailable: bool) {
    self.unavailable.store(unavailable, Ordering::SeqCst);
  }

  /// Makes every write fail with `StoreError::Backend` while reads keep
  /// working, which is how a commit failing mid-flight looks to callers.
  pub fn set_read_only(&self, read_only: bool) {
    self.read_only.store(read_only, Ordering::SeqCst);
  }

  fn ensure_available(&self) -> Result<(), StoreError> {
    if self.unavailable.load(Ordering::SeqCst) {
      return Err(StoreError::Backend("memory store marked unavailable".to_string()));
    }
    Ok(())
  }

  fn ensure_writable(&self) -> Result<(), StoreError> {
    self.ensure_available()?;
    if self.read_only.load(Ordering::SeqCst) {
      return Err(StoreError::Backend("memory store is read-only".to_string()));
    }
    Ok(())
  }

  /// Inserts an order as it existed before the status ledger was introduced:
  /// no history entries at all.
  pub fn insert_legacy_order(&self, order: Order) {
    let mut tables = self.tables.lock();
    tables.order_codes.insert(order.code.clone(), order.id);
    tables.orders.insert(order.id, order);
  }
}

#[async_trait]
impl OrderStore for MemoryStore {
  async fn order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
    self.ensure_available()?;
    Ok(self.tables.lock().orders.get(&order_id).cloned())
  }

  async fn order_by_code(&self, code: &str) -> Result<Option<Order>, StoreError> {
    self.ensure_available()?;
    let tables = self.tables.lock();
    Ok(tables.order_codes.get(code).and_then(|id| tables.orders.get(id)).cloned())
  }

  async fn payment_for_order(&self, order_id: Uuid) -> Result<Option<Payment>, StoreError> {
    self.ensure_available()?;
    Ok(self.tables.lock().payments.get(&order_id).cloned())
  }

  async fn voucher_by_code(&self, code: &str) -> Result<Option<Voucher>, StoreError> {
    self.ensure_available()?;
    let tables = self.tables.lock();
    let key = Voucher::normalize_code(code);
    Ok(tables.voucher_codes.get(&key).and_then(|id| tables.vouchers.get(id)).cloned())
  }

  async fn voucher(&self, voucher_id: Uuid) -> Result<Option<Voucher>, StoreError> {
    self.ensure_available()?;
    Ok(self.tables.lock().vouchers.get(&voucher_id).cloned())
  }

  async fn insert_voucher(&self, mut voucher: Voucher) -> Result<Voucher, StoreError> {
    self.ensure_writable()?;
    voucher.code = Voucher::normalize_code(&voucher.code);
    let mut tables = self.tables.lock();
    if tables.voucher_codes.contains_key(&voucher.code) {
      return Err(StoreError::DuplicateVoucherCode(voucher.code));
    }
    tables.voucher_codes.insert(voucher.code.clone(), voucher.id);
    tables.vouchers.insert(voucher.id, voucher.clone());
    Ok(voucher)
  }

  async fn redemption_count(&self, user_id: Uuid, voucher_id: Uuid) -> Result<u32, StoreError> {
    self.ensure_available()?;
    Ok(self.tables.lock().redemptions_of(user_id, voucher_id))
  }

  async fn redeem(&self, claim: RedemptionClaim) -> Result<VoucherRedemption, StoreError> {
    self.ensure_writable()?;
    let mut tables = self.tables.lock();
    let use_number = tables.check_claim(&claim)?;
    Ok(tables.apply_claim(claim, use_number))
  }

  async fn create_checkout(&self, draft: CheckoutDraft) -> Result<CheckoutRecord, StoreError> {
    self.ensure_writable()?;
    let mut tables = self.tables.lock();

    if tables.order_codes.contains_key(&draft.order.code) {
      return Err(StoreError::DuplicateOrderCode(draft.order.code));
    }
    let use_number = match &draft.redemption {
      Some(claim) => Some(tables.check_claim(claim)?),
      None => None,
    };

    let order = draft.order;
    tables.order_codes.insert(order.code.clone(), order.id);
    tables.orders.insert(order.id, order.clone());
    tables.history.push(draft.initial_entry.into_entry());
    if let Some(payment) = &draft.payment {
      tables.payments.insert(order.id, payment.clone());
    }
    let redemption = match (draft.redemption, use_number) {
      (Some(claim), Some(n)) => Some(tables.apply_claim(claim, n)),
      _ => None,
    };

    Ok(CheckoutRecord {
      order,
      payment: draft.payment,
      redemption,
    })
  }

  async fn apply_status_change(&self, change: StatusChange) -> Result<Order, StoreError> {
    self.ensure_writable()?;
    let mut tables = self.tables.lock();
    tables.check_change(&change)?;
    tables.apply_change(change)
  }

  async fn settle_payment(&self, write: SettlementWrite) -> Result<SettledPayment, StoreError> {
    self.ensure_writable()?;
    let mut tables = self.tables.lock();

    let payment = tables
      .payments
      .get(&write.order_id)
      .filter(|p| p.id == write.payment_id)
      .ok_or(StoreError::PaymentNotFound(write.payment_id))?;
    if payment.status.is_terminal() {
      return Err(StoreError::PaymentAlreadySettled {
        payment_id: payment.id,
        status: payment.status,
      });
    }
    if let Some(change) = &write.order_change {
      tables.check_change(change)?;
    }

    let order = match write.order_change {
      Some(change) => tables.apply_change(change)?,
      None => tables
        .orders
        .get(&write.order_id)
        .cloned()
        .ok_or(StoreError::OrderNotFound(write.order_id))?,
    };
    let payment = tables
      .payments
      .get_mut(&write.order_id)
      .ok_or(StoreError::PaymentNotFound(write.payment_id))?;
    payment.status = write.status;
    payment.transaction_ref = write.transaction_ref;
    payment.settled_at = Some(write.settled_at);
    payment.notes = write.notes;

    Ok(SettledPayment {
      payment: payment.clone(),
      order,
    })
  }

  async fn append_history(&self, entry: NewHistoryEntry) -> Result<AppendOutcome, StoreError> {
    self.ensure_writable()?;
    let mut tables = self.tables.lock();
    if !tables.orders.contains_key(&entry.order_id) {
      return Err(StoreError::OrderNotFound(entry.order_id));
    }
    if let Some(existing) = tables.duplicate_of(&entry) {
      return Ok(AppendOutcome::Suppressed(existing));
    }
    let stored = entry.into_entry();
    tables.history.push(stored.clone());
    Ok(AppendOutcome::Appended(stored))
  }

  async fn history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, StoreError> {
    self.ensure_available()?;
    let mut entries: Vec<StatusHistoryEntry> = self
      .tables
      .lock()
      .history
      .iter()
      .filter(|e| e.order_id == order_id)
      .cloned()
      .collect();
    // stable: equal timestamps keep insertion order
    entries.sort_by_key(|e| e.recorded_at);
    Ok(entries)
  }
}
