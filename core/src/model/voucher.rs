// orderflow/src/model/voucher.rs

use crate::error::VoucherError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a voucher reduces the order amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Discount {
  /// Whole percent of the order amount, 1..=100.
  Percentage(u32),
  FixedAmount(i64),
}

impl Discount {
  /// Reads a stored `(type, value)` pair. Unknown types and out-of-range values
  /// are rejected instead of silently granting nothing.
  pub fn parse(kind: &str, value: i64) -> Result<Self, VoucherError> {
    let discount = match kind.trim().to_ascii_lowercase().as_str() {
      "percentage" | "percent" => {
        let pct = u32::try_from(value)
          .map_err(|_| VoucherError::InvalidDefinition(format!("percentage {} out of range", value)))?;
        Discount::Percentage(pct)
      }
      "fixed" | "fixed_amount" | "amount" => Discount::FixedAmount(value),
      other => return Err(VoucherError::InvalidDefinition(format!("unknown discount type '{}'", other))),
    };
    discount.validate()?;
    Ok(discount)
  }

  pub fn validate(&self) -> Result<(), VoucherError> {
    match *self {
      Discount::Percentage(pct) if pct == 0 || pct > 100 => Err(VoucherError::InvalidDefinition(format!(
        "percentage must be within 1..=100, got {}",
        pct
      ))),
      Discount::FixedAmount(cents) if cents <= 0 => Err(VoucherError::InvalidDefinition(format!(
        "fixed amount must be positive, got {}",
        cents
      ))),
      _ => Ok(()),
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      Discount::Percentage(_) => "percentage",
      Discount::FixedAmount(_) => "fixed",
    }
  }

  pub fn value(&self) -> i64 {
    match *self {
      Discount::Percentage(pct) => i64::from(pct),
      Discount::FixedAmount(cents) => cents,
    }
  }

  /// Discount granted on `order_cents`, never more than the order amount.
  /// Percentages round down to the minor unit.
  pub fn amount_for(&self, order_cents: i64) -> i64 {
    if order_cents <= 0 {
      return 0;
    }
    let raw = match *self {
      Discount::Percentage(pct) => ((i128::from(order_cents) * i128::from(pct)) / 100) as i64,
      Discount::FixedAmount(cents) => cents,
    };
    raw.clamp(0, order_cents)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
  pub id: Uuid,
  /// Stored normalised (see `Voucher::normalize_code`); lookups are case-insensitive.
  pub code: String,
  pub discount: Discount,
  pub starts_at: DateTime<Utc>,
  pub ends_at: DateTime<Utc>,
  pub min_order_cents: Option<i64>,
  pub usage_cap: Option<u32>,
  pub usage_count: u32,
  pub per_user_cap: Option<u32>,
  pub active: bool,
}

impl Voucher {
  pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
  }

  /// Uses allowed per customer. One when unspecified.
  pub fn per_user_limit(&self) -> u32 {
    self.per_user_cap.unwrap_or(1).max(1)
  }

  pub fn has_uses_left(&self) -> bool {
    self.usage_cap.map_or(true, |cap| self.usage_count < cap)
  }
}

/// A consumed use of a voucher by one customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherRedemption {
  pub id: Uuid,
  pub user_id: Uuid,
  pub voucher_id: Uuid,
  /// Empty when the voucher was redeemed before the order existed.
  pub order_id: Option<Uuid>,
  pub discount_cents: i64,
  /// 1-based count of this user's uses of the voucher.
  pub use_number: u32,
  pub redeemed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRedemption {
  pub user_id: Uuid,
  pub voucher_id: Uuid,
  pub order_id: Option<Uuid>,
  pub discount_cents: i64,
  pub redeemed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn percentage_of_order_amount() {
    assert_eq!(Discount::Percentage(10).amount_for(250_000), 25_000);
    assert_eq!(Discount::Percentage(15).amount_for(999), 149);
  }

  #[test]
  fn fixed_discount_is_capped_at_the_order_amount() {
    assert_eq!(Discount::FixedAmount(50_000).amount_for(30_000), 30_000);
    assert_eq!(Discount::FixedAmount(5_000).amount_for(30_000), 5_000);
  }

  #[test]
  fn unknown_discount_types_are_rejected() {
    assert!(matches!(
      Discount::parse("bogof", 1),
      Err(VoucherError::InvalidDefinition(_))
    ));
    assert!(Discount::parse("percentage", 0).is_err());
    assert!(Discount::parse("percentage", 101).is_err());
    assert_eq!(Discount::parse("Amount", 20_000), Ok(Discount::FixedAmount(20_000)));
    assert_eq!(Discount::parse("percent", 10), Ok(Discount::Percentage(10)));
  }

  #[test]
  fn codes_are_normalised() {
    assert_eq!(Voucher::normalize_code("  save10 "), "SAVE10");
  }
}
