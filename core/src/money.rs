// orderflow/src/money.rs

//! Order amounts. All money is carried as integer minor units (`*_cents`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TotalsError {
  #[error("{field} must not be negative (got {value})")]
  Negative { field: &'static str, value: i64 },

  #[error("discount {discount_cents} exceeds subtotal {subtotal_cents}")]
  DiscountExceedsSubtotal { discount_cents: i64, subtotal_cents: i64 },

  #[error("stored total {stored} does not match computed total {computed}")]
  Inconsistent { stored: i64, computed: i64 },

  #[error("order amounts overflow")]
  Overflow,
}

/// Subtotal, shipping fee, discount and the total derived from them.
///
/// `total = subtotal + shipping - discount` holds for every value of this type:
/// the fields are private and the only constructors check it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTotals", into = "RawTotals")]
pub struct OrderTotals {
  subtotal_cents: i64,
  shipping_fee_cents: i64,
  discount_cents: i64,
  total_cents: i64,
}

impl OrderTotals {
  pub fn new(subtotal_cents: i64, shipping_fee_cents: i64, discount_cents: i64) -> Result<Self, TotalsError> {
    for (field, value) in [
      ("subtotal", subtotal_cents),
      ("shipping fee", shipping_fee_cents),
      ("discount", discount_cents),
    ] {
      if value < 0 {
        return Err(TotalsError::Negative { field, value });
      }
    }
    if discount_cents > subtotal_cents {
      return Err(TotalsError::DiscountExceedsSubtotal {
        discount_cents,
        subtotal_cents,
      });
    }
    let total_cents = subtotal_cents
      .checked_add(shipping_fee_cents)
      .and_then(|sum| sum.checked_sub(discount_cents))
      .ok_or(TotalsError::Overflow)?;
    Ok(Self {
      subtotal_cents,
      shipping_fee_cents,
      discount_cents,
      total_cents,
    })
  }

  /// Rebuilds totals read back from storage and rejects rows whose stored
  /// total disagrees with its parts.
  pub fn from_stored(
    subtotal_cents: i64,
    shipping_fee_cents: i64,
    discount_cents: i64,
    stored_total_cents: i64,
  ) -> Result<Self, TotalsError> {
    let totals = Self::new(subtotal_cents, shipping_fee_cents, discount_cents)?;
    if totals.total_cents != stored_total_cents {
      return Err(TotalsError::Inconsistent {
        stored: stored_total_cents,
        computed: totals.total_cents,
      });
    }
    Ok(totals)
  }

  pub fn subtotal_cents(&self) -> i64 {
    self.subtotal_cents
  }

  pub fn shipping_fee_cents(&self) -> i64 {
    self.shipping_fee_cents
  }

  pub fn discount_cents(&self) -> i64 {
    self.discount_cents
  }

  pub fn total_cents(&self) -> i64 {
    self.total_cents
  }
}

#[derive(Serialize, Deserialize)]
struct RawTotals {
  subtotal_cents: i64,
  shipping_fee_cents: i64,
  discount_cents: i64,
  total_cents: i64,
}

impl TryFrom<RawTotals> for OrderTotals {
  type Error = TotalsError;

  fn try_from(raw: RawTotals) -> Result<Self, Self::Error> {
    OrderTotals::from_stored(raw.subtotal_cents, raw.shipping_fee_cents, raw.discount_cents, raw.total_cents)
  }
}

impl From<OrderTotals> for RawTotals {
  fn from(t: OrderTotals) -> Self {
    RawTotals {
      subtotal_cents: t.subtotal_cents,
      shipping_fee_cents: t.shipping_fee_cents,
      discount_cents: t.discount_cents,
      total_cents: t.total_cents,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn total_is_derived_from_parts() {
    let totals = OrderTotals::new(250_000, 15_000, 25_000).unwrap();
    assert_eq!(totals.total_cents(), 240_000);
  }

  #[test]
  fn discount_cannot_exceed_subtotal() {
    assert_eq!(
      OrderTotals::new(30_000, 0, 50_000),
      Err(TotalsError::DiscountExceedsSubtotal {
        discount_cents: 50_000,
        subtotal_cents: 30_000
      })
    );
  }

  #[test]
  fn stored_rows_with_a_wrong_total_are_rejected() {
    assert!(OrderTotals::from_stored(100, 10, 0, 110).is_ok());
    assert_eq!(
      OrderTotals::from_stored(100, 10, 0, 100),
      Err(TotalsError::Inconsistent { stored: 100, computed: 110 })
    );
  }

  #[test]
  fn negative_amounts_are_rejected() {
    assert!(matches!(
      OrderTotals::new(-1, 0, 0),
      Err(TotalsError::Negative { field: "subtotal", .. })
    ));
  }
}
