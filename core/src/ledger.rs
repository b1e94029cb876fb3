// orderflow/src/ledger.rs

//! Append-only status history of orders and the customer-facing timeline
//! built from it.

use crate::catalog::{OrderStatus, StatusCatalog};
use crate::error::{EngineError, EngineResult, StoreError};
use crate::model::{Actor, EntryKind, NewHistoryEntry, Order, StatusHistoryEntry, TimelineEvent};
use crate::store::{AppendOutcome, OrderStore};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Actor recorded on entries written by `backfill_missing`.
pub const BACKFILL_ACTOR: &str = "history-backfill";

pub struct StatusHistoryLedger {
  store: Arc<dyn OrderStore>,
  catalog: &'static StatusCatalog,
}

impl StatusHistoryLedger {
  pub fn new(store: Arc<dyn OrderStore>) -> Self {
    Self {
      store,
      catalog: StatusCatalog::global(),
    }
  }

  /// Appends one entry. A transition entry that repeats the order's latest
  /// status is a duplicate write and is suppressed, not an error.
  #[instrument(name = "StatusHistoryLedger::append", skip_all, fields(order_id = %entry.order_id, status = %entry.status))]
  pub async fn append(&self, entry: NewHistoryEntry) -> EngineResult<AppendOutcome> {
    let order_id = entry.order_id;
    let outcome = self.store.append_history(entry).await.map_err(|e| match e {
      StoreError::OrderNotFound(id) => EngineError::OrderNotFound(id.to_string()),
      other => EngineError::Store(other),
    })?;
    match &outcome {
      AppendOutcome::Appended(stored) => debug!(%order_id, entry_id = %stored.id, "history entry appended"),
      AppendOutcome::Suppressed(existing) => {
        debug!(%order_id, existing_id = %existing.id, "duplicate history entry suppressed")
      }
    }
    Ok(outcome)
  }

  /// All entries of an order, oldest first.
  pub async fn timeline(&self, order_id: Uuid) -> EngineResult<Vec<StatusHistoryEntry>> {
    Ok(self.store.history(order_id).await?)
  }

  /// The tracking view of an order.
  ///
  /// Orders placed before the ledger existed have no entry for the status they
  /// were created in; that event is inferred from `created_at`. A current status
  /// with no entry of its own is inferred from `updated_at`.
  pub async fn tracking_timeline(&self, order: &Order) -> EngineResult<Vec<TimelineEvent>> {
    let entries = self.timeline(order.id).await?;
    Ok(self.compose_timeline(order, &entries))
  }

  pub async fn tracking_timeline_by_code(&self, code: &str) -> EngineResult<(Order, Vec<TimelineEvent>)> {
    let order = self
      .store
      .order_by_code(code)
      .await?
      .ok_or_else(|| EngineError::OrderNotFound(code.to_string()))?;
    let timeline = self.tracking_timeline(&order).await?;
    Ok((order, timeline))
  }

  fn compose_timeline(&self, order: &Order, entries: &[StatusHistoryEntry]) -> Vec<TimelineEvent> {
    let mut events: Vec<TimelineEvent> = Vec::with_capacity(entries.len() + 2);

    if !entries.iter().any(|e| e.status == OrderStatus::PendingConfirmation) {
      events.push(self.inferred(OrderStatus::PendingConfirmation, order.created_at));
    }
    if order.status != OrderStatus::PendingConfirmation && !entries.iter().any(|e| e.status == order.status) {
      events.push(self.inferred(order.status, order.updated_at));
    }
    events.extend(entries.iter().map(|e| TimelineEvent {
      status: e.status,
      label: self.catalog.label(e.status),
      at: e.recorded_at,
      actor: Some(e.actor.clone()),
      note: e.note.clone(),
      inferred: false,
    }));

    // stable: an inferred creation event stays ahead of entries sharing its timestamp
    events.sort_by_key(|e| e.at);
    events
  }

  fn inferred(&self, status: OrderStatus, at: chrono::DateTime<chrono::Utc>) -> TimelineEvent {
    TimelineEvent {
      status,
      label: self.catalog.label(status),
      at,
      actor: None,
      note: None,
      inferred: true,
    }
  }

  /// Persists the inferred creation event of a legacy order as a backfill
  /// entry. Running it twice writes nothing the second time.
  #[instrument(name = "StatusHistoryLedger::backfill_missing", skip_all, fields(order_code = %order.code))]
  pub async fn backfill_missing(&self, order: &Order) -> EngineResult<Option<StatusHistoryEntry>> {
    let entries = self.timeline(order.id).await?;
    if entries.iter().any(|e| e.status == OrderStatus::PendingConfirmation) {
      return Ok(None);
    }
    let entry = NewHistoryEntry {
      order_id: order.id,
      status: OrderStatus::PendingConfirmation,
      recorded_at: order.created_at,
      actor: Actor::System(BACKFILL_ACTOR.to_string()),
      note: Some("reconstructed from order creation time".to_string()),
      kind: EntryKind::Backfill,
    };
    match self.append(entry).await? {
      AppendOutcome::Appended(stored) => {
        info!(order_code = %order.code, "backfilled creation entry");
        Ok(Some(stored))
      }
      AppendOutcome::Suppressed(_) => Ok(None),
    }
  }
}
