// orderflow/src/model/history.rs

use crate::catalog::OrderStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Who caused a status change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Actor {
  Customer(Uuid),
  Staff(Uuid),
  /// Automated sources, e.g. `gateway:vnpay` or `system:migration`.
  System(String),
}

impl Actor {
  pub fn gateway(name: &str) -> Self {
    Actor::System(format!("gateway:{}", name))
  }
}

impl fmt::Display for Actor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Actor::Customer(id) => write!(f, "customer:{}", id),
      Actor::Staff(id) => write!(f, "staff:{}", id),
      Actor::System(name) => write!(f, "system:{}", name),
    }
  }
}

impl FromStr for Actor {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (kind, rest) = s.split_once(':').ok_or_else(|| format!("malformed actor '{}'", s))?;
    let parse_id = |raw: &str| Uuid::parse_str(raw).map_err(|e| format!("malformed actor id in '{}': {}", s, e));
    match kind {
      "customer" => Ok(Actor::Customer(parse_id(rest)?)),
      "staff" => Ok(Actor::Staff(parse_id(rest)?)),
      "system" if !rest.is_empty() => Ok(Actor::System(rest.to_string())),
      _ => Err(format!("malformed actor '{}'", s)),
    }
  }
}

impl From<Actor> for String {
  fn from(actor: Actor) -> Self {
    actor.to_string()
  }
}

impl TryFrom<String> for Actor {
  type Error = String;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
  /// Written together with the status change it records.
  Transition,
  /// Written after the fact to repair the history of older orders.
  Backfill,
}

impl EntryKind {
  pub fn as_str(self) -> &'static str {
    match self {
      EntryKind::Transition => "transition",
      EntryKind::Backfill => "backfill",
    }
  }
}

impl FromStr for EntryKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "transition" => Ok(EntryKind::Transition),
      "backfill" => Ok(EntryKind::Backfill),
      other => Err(format!("unknown history entry kind '{}'", other)),
    }
  }
}

/// One immutable line of an order's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
  pub id: Uuid,
  pub order_id: Uuid,
  pub status: OrderStatus,
  pub recorded_at: DateTime<Utc>,
  pub actor: Actor,
  pub note: Option<String>,
  pub kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
  pub order_id: Uuid,
  pub status: OrderStatus,
  pub recorded_at: DateTime<Utc>,
  pub actor: Actor,
  pub note: Option<String>,
  pub kind: EntryKind,
}

impl NewHistoryEntry {
  pub fn transition(order_id: Uuid, status: OrderStatus, actor: Actor, note: Option<String>, at: DateTime<Utc>) -> Self {
    Self {
      order_id,
      status,
      recorded_at: at,
      actor,
      note,
      kind: EntryKind::Transition,
    }
  }

  pub fn into_entry(self) -> StatusHistoryEntry {
    StatusHistoryEntry {
      id: Uuid::new_v4(),
      order_id: self.order_id,
      status: self.status,
      recorded_at: self.recorded_at,
      actor: self.actor,
      note: self.note,
      kind: self.kind,
    }
  }
}

/// A line of the customer-facing tracking view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEvent {
  pub status: OrderStatus,
  pub label: &'static str,
  pub at: DateTime<Utc>,
  pub actor: Option<Actor>,
  pub note: Option<String>,
  /// Reconstructed from the order itself because the ledger has no entry.
  pub inferred: bool,
}
