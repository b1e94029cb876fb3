// order_service/src/db/rows.rs

//! Table rows and their conversion into engine types. Conversions reject rows
//! the engine could not have written instead of guessing.

use chrono::{DateTime, Utc};
use orderflow::model::{
  Destination, Discount, Order, Payment, StatusHistoryEntry, Voucher, VoucherRedemption,
};
use orderflow::{OrderStatus, OrderTotals, StatusCatalog, StoreError};
use sqlx::FromRow;
use uuid::Uuid;

pub const ORDER_COLUMNS: &str = "id, code, customer_id, status_code, subtotal_cents, shipping_fee_cents, \
   discount_cents, total_cents, delivery_method, destination_kind, destination_id, payment_method, voucher_id, \
   version, created_at, updated_at";

pub const PAYMENT_COLUMNS: &str =
  "id, order_id, status, amount_cents, transaction_ref, settled_at, notes, created_at";

pub const HISTORY_COLUMNS: &str = "id, order_id, status_code, recorded_at, actor, note, kind";

pub const VOUCHER_COLUMNS: &str = "id, code, discount_type, discount_value, starts_at, ends_at, min_order_cents, \
   usage_cap, usage_count, per_user_cap, active";

pub const REDEMPTION_COLUMNS: &str = "id, user_id, voucher_id, order_id, discount_cents, use_number, redeemed_at";

fn corrupt(table: &str, id: Uuid, detail: impl std::fmt::Display) -> StoreError {
  StoreError::Corrupt(format!("{} row {}: {}", table, id, detail))
}

pub fn status_from_code(catalog: &StatusCatalog, table: &str, id: Uuid, code: i16) -> Result<OrderStatus, StoreError> {
  catalog
    .status_for_code(code)
    .ok_or_else(|| corrupt(table, id, format!("unknown status code {}", code)))
}

pub fn count_to_i32(value: u32) -> i32 {
  i32::try_from(value).unwrap_or(i32::MAX)
}

fn count_from_i32(table: &str, id: Uuid, column: &str, value: i32) -> Result<u32, StoreError> {
  u32::try_from(value).map_err(|_| corrupt(table, id, format!("negative {}", column)))
}

pub fn destination_columns(destination: &Destination) -> (&'static str, Uuid) {
  match *destination {
    Destination::Address(id) => ("address", id),
    Destination::Store(id) => ("store", id),
  }
}

#[derive(Debug, FromRow)]
pub struct OrderRow {
  pub id: Uuid,
  pub code: String,
  pub customer_id: Uuid,
  pub status_code: i16,
  pub subtotal_cents: i64,
  pub shipping_fee_cents: i64,
  pub discount_cents: i64,
  pub total_cents: i64,
  pub delivery_method: String,
  pub destination_kind: String,
  pub destination_id: Uuid,
  pub payment_method: String,
  pub voucher_id: Option<Uuid>,
  pub version: i64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl OrderRow {
  pub fn into_domain(self, catalog: &StatusCatalog) -> Result<Order, StoreError> {
    let id = self.id;
    let totals = OrderTotals::from_stored(
      self.subtotal_cents,
      self.shipping_fee_cents,
      self.discount_cents,
      self.total_cents,
    )
    .map_err(|e| corrupt("orders", id, e))?;
    let destination = match self.destination_kind.as_str() {
      "address" => Destination::Address(self.destination_id),
      "store" => Destination::Store(self.destination_id),
      other => return Err(corrupt("orders", id, format!("unknown destination kind '{}'", other))),
    };
    Ok(Order {
      id,
      code: self.code,
      customer_id: self.customer_id,
      status: status_from_code(catalog, "orders", id, self.status_code)?,
      totals,
      delivery_method: self.delivery_method.parse().map_err(|e| corrupt("orders", id, e))?,
      destination,
      payment_method: self.payment_method.parse().map_err(|e| corrupt("orders", id, e))?,
      voucher_id: self.voucher_id,
      version: self.version,
      created_at: self.created_at,
      updated_at: self.updated_at,
    })
  }
}

#[derive(Debug, FromRow)]
pub struct PaymentRow {
  pub id: Uuid,
  pub order_id: Uuid,
  pub status: String,
  pub amount_cents: i64,
  pub transaction_ref: Option<String>,
  pub settled_at: Option<DateTime<Utc>>,
  pub notes: Option<String>,
  pub created_at: DateTime<Utc>,
}

impl PaymentRow {
  pub fn into_domain(self) -> Result<Payment, StoreError> {
    Ok(Payment {
      id: self.id,
      order_id: self.order_id,
      status: self.status.parse().map_err(|e| corrupt("payments", self.id, e))?,
      amount_cents: self.amount_cents,
      transaction_ref: self.transaction_ref,
      settled_at: self.settled_at,
      notes: self.notes,
      created_at: self.created_at,
    })
  }
}

#[derive(Debug, FromRow)]
pub struct HistoryRow {
  pub id: Uuid,
  pub order_id: Uuid,
  pub status_code: i16,
  pub recorded_at: DateTime<Utc>,
  pub actor: String,
  pub note: Option<String>,
  pub kind: String,
}

impl HistoryRow {
  pub fn into_domain(self, catalog: &StatusCatalog) -> Result<StatusHistoryEntry, StoreError> {
    let id = self.id;
    Ok(StatusHistoryEntry {
      id,
      order_id: self.order_id,
      status: status_from_code(catalog, "order_status_history", id, self.status_code)?,
      recorded_at: self.recorded_at,
      actor: self.actor.parse().map_err(|e| corrupt("order_status_history", id, e))?,
      note: self.note,
      kind: self.kind.parse().map_err(|e| corrupt("order_status_history", id, e))?,
    })
  }
}

#[derive(Debug, FromRow)]
pub struct VoucherRow {
  pub id: Uuid,
  pub code: String,
  pub discount_type: String,
  pub discount_value: i64,
  pub starts_at: DateTime<Utc>,
  pub ends_at: DateTime<Utc>,
  pub min_order_cents: Option<i64>,
  pub usage_cap: Option<i32>,
  pub usage_count: i32,
  pub per_user_cap: Option<i32>,
  pub active: bool,
}

impl VoucherRow {
  pub fn into_domain(self) -> Result<Voucher, StoreError> {
    let id = self.id;
    let optional_count = |column: &str, value: Option<i32>| {
      value.map(|v| count_from_i32("vouchers", id, column, v)).transpose()
    };
    Ok(Voucher {
      id,
      code: self.code,
      discount: Discount::parse(&self.discount_type, self.discount_value).map_err(|e| corrupt("vouchers", id, e))?,
      starts_at: self.starts_at,
      ends_at: self.ends_at,
      min_order_cents: self.min_order_cents,
      usage_cap: optional_count("usage_cap", self.usage_cap)?,
      usage_count: count_from_i32("vouchers", id, "usage_count", self.usage_count)?,
      per_user_cap: optional_count("per_user_cap", self.per_user_cap)?,
      active: self.active,
    })
  }
}

#[derive(Debug, FromRow)]
pub struct RedemptionRow {
  pub id: Uuid,
  pub user_id: Uuid,
  pub voucher_id: Uuid,
  pub order_id: Option<Uuid>,
  pub discount_cents: i64,
  pub use_number: i32,
  pub redeemed_at: DateTime<Utc>,
}

impl RedemptionRow {
  pub fn into_domain(self) -> Result<VoucherRedemption, StoreError> {
    Ok(VoucherRedemption {
      id: self.id,
      user_id: self.user_id,
      voucher_id: self.voucher_id,
      order_id: self.order_id,
      discount_cents: self.discount_cents,
      use_number: count_from_i32("voucher_redemptions", self.id, "use_number", self.use_number)?,
      redeemed_at: self.redeemed_at,
    })
  }
}
