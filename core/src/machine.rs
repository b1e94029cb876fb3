// orderflow/src/machine.rs

//! Order status transitions.
//!
//! Every change is read-validate-write against the order's version token. A
//! lost race re-reads and re-validates, so two mutually exclusive changes
//! (customer cancels, staff confirms) never both succeed.

use crate::catalog::{OrderStatus, StatusCatalog, StatusSet};
use crate::error::{EngineError, EngineResult, StoreError};
use crate::model::{Actor, NewHistoryEntry, Order};
use crate::store::{OrderStore, StatusChange};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Which subset of the allowed transitions a caller may pick from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionScope {
  /// The whole transition table. System callers such as reconciliation.
  Any,
  /// Self-service cancellation before confirmation.
  Customer,
  /// Back-office actions along the order's delivery branch.
  Staff,
}

/// What applying a target status to an order amounts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionPlan {
  /// The order already has the target status.
  Unchanged,
  Change(StatusChange),
}

pub struct OrderStateMachine {
  store: Arc<dyn OrderStore>,
  catalog: &'static StatusCatalog,
  max_attempts: u32,
}

impl OrderStateMachine {
  pub fn new(store: Arc<dyn OrderStore>, max_attempts: u32) -> Self {
    Self {
      store,
      catalog: StatusCatalog::global(),
      max_attempts: max_attempts.max(1),
    }
  }

  pub fn targets(&self, order: &Order, scope: TransitionScope) -> StatusSet {
    match scope {
      TransitionScope::Any => self.catalog.allowed_next(order.status),
      TransitionScope::Customer => self.catalog.customer_targets(order.status),
      TransitionScope::Staff => self.catalog.staff_targets(order.status, order.delivery_method),
    }
  }

  /// Validates a change without touching the store.
  pub fn plan(
    &self,
    order: &Order,
    target: OrderStatus,
    actor: &Actor,
    note: Option<&str>,
    scope: TransitionScope,
    at: DateTime<Utc>,
  ) -> EngineResult<TransitionPlan> {
    if order.status == target {
      return Ok(TransitionPlan::Unchanged);
    }
    if !self.targets(order, scope).contains(target) {
      return Err(EngineError::InvalidTransition {
        current: order.status,
        rejected: target,
      });
    }
    Ok(TransitionPlan::Change(StatusChange {
      order_id: order.id,
      expected_version: order.version,
      from: order.status,
      to: target,
      entry: NewHistoryEntry::transition(order.id, target, actor.clone(), note.map(str::to_string), at),
    }))
  }

  /// Moves an order to `target` with the full transition table.
  pub async fn transition(
    &self,
    order_id: Uuid,
    target: OrderStatus,
    actor: Actor,
    note: Option<String>,
  ) -> EngineResult<Order> {
    self.transition_within(order_id, target, actor, note, TransitionScope::Any).await
  }

  /// Customer self-service cancel. Orders of other customers look absent.
  pub async fn cancel_by_customer(&self, order_id: Uuid, customer_id: Uuid, note: Option<String>) -> EngineResult<Order> {
    let order = self.load(order_id).await?;
    if order.customer_id != customer_id {
      warn!(%order_id, %customer_id, "cancel requested for another customer's order");
      return Err(EngineError::OrderNotFound(order_id.to_string()));
    }
    self
      .transition_within(
        order_id,
        OrderStatus::Cancelled,
        Actor::Customer(customer_id),
        note,
        TransitionScope::Customer,
      )
      .await
  }

  pub async fn advance_by_staff(
    &self,
    order_id: Uuid,
    staff_id: Uuid,
    target: OrderStatus,
    note: Option<String>,
  ) -> EngineResult<Order> {
    self
      .transition_within(order_id, target, Actor::Staff(staff_id), note, TransitionScope::Staff)
      .await
  }

  #[instrument(
    name = "OrderStateMachine::transition",
    skip(self, note),
    fields(actor = %actor),
    err(Display)
  )]
  pub async fn transition_within(
    &self,
    order_id: Uuid,
    target: OrderStatus,
    actor: Actor,
    note: Option<String>,
    scope: TransitionScope,
  ) -> EngineResult<Order> {
    let mut last_code = order_id.to_string();
    for attempt in 1..=self.max_attempts {
      let order = self.load(order_id).await?;
      last_code = order.code.clone();

      let change = match self.plan(&order, target, &actor, note.as_deref(), scope, Utc::now())? {
        TransitionPlan::Unchanged => {
          debug!(order_code = %order.code, status = %target, "order already in target status");
          return Ok(order);
        }
        TransitionPlan::Change(change) => change,
      };

      match self.store.apply_status_change(change).await {
        Ok(updated) => {
          info!(order_code = %updated.code, from = %order.status, to = %updated.status, "order status changed");
          return Ok(updated);
        }
        Err(StoreError::VersionConflict { expected, found, .. }) => {
          debug!(order_code = %order.code, attempt, expected, found, "version conflict, re-reading order");
        }
        Err(StoreError::OrderNotFound(id)) => return Err(EngineError::OrderNotFound(id.to_string())),
        Err(other) => return Err(other.into()),
      }
    }
    warn!(order_code = %last_code, attempts = self.max_attempts, "giving up on contended order");
    Err(EngineError::ConcurrentModification(last_code))
  }

  async fn load(&self, order_id: Uuid) -> EngineResult<Order> {
    self
      .store
      .order(order_id)
      .await?
      .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))
  }
}
