// orderflow/src/model/order.rs

use crate::catalog::OrderStatus;
use crate::money::OrderTotals;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
  HomeDelivery,
  StorePickup,
}

impl DeliveryMethod {
  pub fn as_str(self) -> &'static str {
    match self {
      DeliveryMethod::HomeDelivery => "home_delivery",
      DeliveryMethod::StorePickup => "store_pickup",
    }
  }
}

impl FromStr for DeliveryMethod {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "home_delivery" => Ok(DeliveryMethod::HomeDelivery),
      "store_pickup" => Ok(DeliveryMethod::StorePickup),
      other => Err(format!("unknown delivery method '{}'", other)),
    }
  }
}

/// Where the order goes: a customer address for home delivery, a store for pickup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Destination {
  Address(Uuid),
  Store(Uuid),
}

impl Destination {
  pub fn matches(&self, delivery: DeliveryMethod) -> bool {
    matches!(
      (self, delivery),
      (Destination::Address(_), DeliveryMethod::HomeDelivery) | (Destination::Store(_), DeliveryMethod::StorePickup)
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
  CashOnDelivery,
  PayAtStore,
  /// Online payment confirmed asynchronously by the gateway callback.
  Gateway,
}

impl PaymentMethod {
  pub fn requires_gateway(self) -> bool {
    matches!(self, PaymentMethod::Gateway)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      PaymentMethod::CashOnDelivery => "cash_on_delivery",
      PaymentMethod::PayAtStore => "pay_at_store",
      PaymentMethod::Gateway => "gateway",
    }
  }
}

impl FromStr for PaymentMethod {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "cash_on_delivery" => Ok(PaymentMethod::CashOnDelivery),
      "pay_at_store" => Ok(PaymentMethod::PayAtStore),
      "gateway" => Ok(PaymentMethod::Gateway),
      other => Err(format!("unknown payment method '{}'", other)),
    }
  }
}

impl fmt::Display for PaymentMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
  pub id: Uuid,
  /// Customer-facing identifier, echoed back by the payment gateway.
  pub code: String,
  pub customer_id: Uuid,
  pub status: OrderStatus,
  pub totals: OrderTotals,
  pub delivery_method: DeliveryMethod,
  pub destination: Destination,
  pub payment_method: PaymentMethod,
  pub voucher_id: Option<Uuid>,
  /// Optimistic concurrency token, bumped by every status change.
  pub version: i64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Order {
  pub fn total_cents(&self) -> i64 {
    self.totals.total_cents()
  }
}
