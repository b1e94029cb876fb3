// orderflow/src/catalog.rs

//! Order statuses and the transitions between them.
//!
//! `allowed_next_statuses` is the only place transition rules are written down.
//! Everything else (the state machine, role-restricted target sets, the
//! reconciler) asks the catalog.

use crate::model::DeliveryMethod;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
  PendingConfirmation,
  Confirmed,
  Preparing,
  OutForDelivery,
  ReadyForPickup,
  Completed,
  Cancelled,
}

impl OrderStatus {
  pub const ALL: [OrderStatus; 7] = [
    OrderStatus::PendingConfirmation,
    OrderStatus::Confirmed,
    OrderStatus::Preparing,
    OrderStatus::OutForDelivery,
    OrderStatus::ReadyForPickup,
    OrderStatus::Completed,
    OrderStatus::Cancelled,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      OrderStatus::PendingConfirmation => "pending_confirmation",
      OrderStatus::Confirmed => "confirmed",
      OrderStatus::Preparing => "preparing",
      OrderStatus::OutForDelivery => "out_for_delivery",
      OrderStatus::ReadyForPickup => "ready_for_pickup",
      OrderStatus::Completed => "completed",
      OrderStatus::Cancelled => "cancelled",
    }
  }

  pub fn is_terminal(self) -> bool {
    allowed_next_statuses(self).is_empty()
  }

  fn bit(self) -> u8 {
    1 << (self as u8)
  }
}

impl fmt::Display for OrderStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
  type Err = UnknownStatus;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    OrderStatus::ALL
      .into_iter()
      .find(|status| status.as_str() == s)
      .ok_or_else(|| UnknownStatus(s.to_string()))
  }
}

/// A set of statuses, one bit per variant.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct StatusSet(u8);

impl StatusSet {
  pub const EMPTY: StatusSet = StatusSet(0);

  pub fn of(statuses: &[OrderStatus]) -> Self {
    statuses.iter().copied().collect()
  }

  pub fn contains(self, status: OrderStatus) -> bool {
    self.0 & status.bit() != 0
  }

  pub fn insert(&mut self, status: OrderStatus) {
    self.0 |= status.bit();
  }

  pub fn without(self, status: OrderStatus) -> Self {
    StatusSet(self.0 & !status.bit())
  }

  pub fn intersect(self, other: StatusSet) -> Self {
    StatusSet(self.0 & other.0)
  }

  pub fn is_empty(self) -> bool {
    self.0 == 0
  }

  pub fn len(self) -> usize {
    self.0.count_ones() as usize
  }

  pub fn iter(self) -> impl Iterator<Item = OrderStatus> {
    OrderStatus::ALL.into_iter().filter(move |s| self.contains(*s))
  }
}

impl FromIterator<OrderStatus> for StatusSet {
  fn from_iter<I: IntoIterator<Item = OrderStatus>>(iter: I) -> Self {
    let mut set = StatusSet::EMPTY;
    for status in iter {
      set.insert(status);
    }
    set
  }
}

impl fmt::Debug for StatusSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_set().entries(self.iter()).finish()
  }
}

/// Transition table. `Cancelled` is reachable from every non-terminal status;
/// `Completed` and `Cancelled` have no way out.
pub fn allowed_next_statuses(current: OrderStatus) -> StatusSet {
  use OrderStatus::*;
  match current {
    PendingConfirmation => StatusSet::of(&[Confirmed, Cancelled]),
    Confirmed => StatusSet::of(&[Preparing, Cancelled]),
    Preparing => StatusSet::of(&[OutForDelivery, ReadyForPickup, Cancelled]),
    OutForDelivery => StatusSet::of(&[Completed, Cancelled]),
    ReadyForPickup => StatusSet::of(&[Completed, Cancelled]),
    Completed | Cancelled => StatusSet::EMPTY,
  }
}

#[derive(Debug, Clone, Copy)]
struct CatalogEntry {
  status: OrderStatus,
  code: i16,
  label: &'static str,
}

// Numeric codes are the ones persisted by the storefront since before the
// status history existed. They must never be renumbered.
const STATUS_TABLE: [CatalogEntry; 7] = [
  CatalogEntry { status: OrderStatus::PendingConfirmation, code: 1, label: "Awaiting confirmation" },
  CatalogEntry { status: OrderStatus::Confirmed, code: 2, label: "Confirmed" },
  CatalogEntry { status: OrderStatus::Preparing, code: 3, label: "Being prepared" },
  CatalogEntry { status: OrderStatus::OutForDelivery, code: 4, label: "Out for delivery" },
  CatalogEntry { status: OrderStatus::ReadyForPickup, code: 5, label: "Ready for pickup" },
  CatalogEntry { status: OrderStatus::Completed, code: 6, label: "Completed" },
  CatalogEntry { status: OrderStatus::Cancelled, code: 7, label: "Cancelled" },
];

static GLOBAL_CATALOG: Lazy<StatusCatalog> = Lazy::new(StatusCatalog::load);

/// The status enumeration plus its persisted code table and display labels.
#[derive(Debug)]
pub struct StatusCatalog {
  entries: Vec<CatalogEntry>,
}

impl StatusCatalog {
  /// The process-wide catalog, built on first use.
  pub fn global() -> &'static StatusCatalog {
    &GLOBAL_CATALOG
  }

  fn load() -> Self {
    let mut entries = STATUS_TABLE.to_vec();
    entries.sort_by_key(|e| e.status);
    for (entry, status) in entries.iter().zip(OrderStatus::ALL) {
      assert_eq!(entry.status, status, "status table must list every status exactly once");
    }
    tracing::debug!(statuses = entries.len(), "status catalog loaded");
    Self { entries }
  }

  fn entry(&self, status: OrderStatus) -> &CatalogEntry {
    // `load` sorted the table and checked it against `ALL`.
    &self.entries[status as usize]
  }

  pub fn allowed_next(&self, current: OrderStatus) -> StatusSet {
    allowed_next_statuses(current)
  }

  pub fn code_of(&self, status: OrderStatus) -> i16 {
    self.entry(status).code
  }

  pub fn status_for_code(&self, code: i16) -> Option<OrderStatus> {
    self.entries.iter().find(|e| e.code == code).map(|e| e.status)
  }

  pub fn label(&self, status: OrderStatus) -> &'static str {
    self.entry(status).label
  }

  /// What a customer may move their own order to: cancellation, and only
  /// before staff confirmed it.
  pub fn customer_targets(&self, current: OrderStatus) -> StatusSet {
    if current == OrderStatus::PendingConfirmation {
      self.allowed_next(current).intersect(StatusSet::of(&[OrderStatus::Cancelled]))
    } else {
      StatusSet::EMPTY
    }
  }

  /// What staff may move an order to. The delivery method picks the branch
  /// after `Preparing`.
  pub fn staff_targets(&self, current: OrderStatus, delivery: DeliveryMethod) -> StatusSet {
    let allowed = self.allowed_next(current);
    match delivery {
      DeliveryMethod::HomeDelivery => allowed.without(OrderStatus::ReadyForPickup),
      DeliveryMethod::StorePickup => allowed.without(OrderStatus::OutForDelivery),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use OrderStatus::*;

  #[test]
  fn terminal_statuses_have_no_successors() {
    assert!(allowed_next_statuses(Completed).is_empty());
    assert!(allowed_next_statuses(Cancelled).is_empty());
    assert!(Completed.is_terminal());
    assert!(!Preparing.is_terminal());
  }

  #[test]
  fn cancellation_is_reachable_from_every_open_status() {
    for status in OrderStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
      assert!(allowed_next_statuses(status).contains(Cancelled), "{status} cannot cancel");
    }
  }

  #[test]
  fn preparing_branches_by_delivery_method() {
    let catalog = StatusCatalog::global();
    let home = catalog.staff_targets(Preparing, DeliveryMethod::HomeDelivery);
    let pickup = catalog.staff_targets(Preparing, DeliveryMethod::StorePickup);
    assert_eq!(home, StatusSet::of(&[OutForDelivery, Cancelled]));
    assert_eq!(pickup, StatusSet::of(&[ReadyForPickup, Cancelled]));
  }

  #[test]
  fn customers_only_cancel_unconfirmed_orders() {
    let catalog = StatusCatalog::global();
    assert_eq!(catalog.customer_targets(PendingConfirmation), StatusSet::of(&[Cancelled]));
    assert!(catalog.customer_targets(Confirmed).is_empty());
    assert!(catalog.customer_targets(Cancelled).is_empty());
  }

  #[test]
  fn legacy_codes_round_trip_through_the_table() {
    let catalog = StatusCatalog::global();
    assert_eq!(catalog.code_of(Completed), 6);
    assert_eq!(catalog.status_for_code(7), Some(Cancelled));
    assert_eq!(catalog.status_for_code(42), None);
    for status in OrderStatus::ALL {
      assert_eq!(catalog.status_for_code(catalog.code_of(status)), Some(status));
    }
  }

  #[test]
  fn status_names_parse_back() {
    assert_eq!("ready_for_pickup".parse::<OrderStatus>(), Ok(ReadyForPickup));
    assert!("shipped".parse::<OrderStatus>().is_err());
  }
}
