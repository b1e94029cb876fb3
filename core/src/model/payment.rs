// orderflow/src/model/payment.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
  Pending,
  Completed,
  Failed,
}

impl PaymentStatus {
  pub fn is_terminal(self) -> bool {
    !matches!(self, PaymentStatus::Pending)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      PaymentStatus::Pending => "pending",
      PaymentStatus::Completed => "completed",
      PaymentStatus::Failed => "failed",
    }
  }
}

impl fmt::Display for PaymentStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for PaymentStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(PaymentStatus::Pending),
      "completed" => Ok(PaymentStatus::Completed),
      "failed" => Ok(PaymentStatus::Failed),
      other => Err(format!("unknown payment status '{}'", other)),
    }
  }
}

/// The gateway payment of an order. Settled exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
  pub id: Uuid,
  pub order_id: Uuid,
  pub status: PaymentStatus,
  pub amount_cents: i64,
  pub transaction_ref: Option<String>,
  pub settled_at: Option<DateTime<Utc>>,
  pub notes: Option<String>,
  pub created_at: DateTime<Utc>,
}

impl Payment {
  pub fn pending(order_id: Uuid, amount_cents: i64, created_at: DateTime<Utc>) -> Self {
    Self {
      id: Uuid::new_v4(),
      order_id,
      status: PaymentStatus::Pending,
      amount_cents,
      transaction_ref: None,
      settled_at: None,
      notes: None,
      created_at,
    }
  }
}
