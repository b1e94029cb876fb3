// tests/ledger_tests.rs
mod common;

use chrono::{Duration, Utc};
use common::*;
use orderflow::ledger::BACKFILL_ACTOR;
use orderflow::model::{
  Actor, DeliveryMethod, Destination, EntryKind, NewHistoryEntry, Order, PaymentMethod,
};
use orderflow::store::AppendOutcome;
use orderflow::{EngineError, OrderStatus, OrderTotals};
use uuid::Uuid;

fn legacy_order(status: OrderStatus) -> Order {
  let created_at = Utc::now() - Duration::hours(3);
  Order {
    id: Uuid::new_v4(),
    code: "230101ABCDEF01".to_string(),
    customer_id: Uuid::new_v4(),
    status,
    totals: OrderTotals::new(100_000, 0, 0).unwrap(),
    delivery_method: DeliveryMethod::HomeDelivery,
    destination: Destination::Address(Uuid::new_v4()),
    payment_method: PaymentMethod::CashOnDelivery,
    voucher_id: None,
    version: 1,
    created_at,
    updated_at: created_at + Duration::hours(1),
  }
}

#[tokio::test]
async fn repeated_transition_entries_are_suppressed() {
  let h = harness();
  let placed = h.gateway_order(50_000).await;
  let staff = Actor::Staff(Uuid::new_v4());

  let confirmed = NewHistoryEntry::transition(placed.order.id, OrderStatus::Confirmed, staff.clone(), None, Utc::now());
  let first = h.engine.ledger().append(confirmed.clone()).await.unwrap();
  let stored = match first {
    AppendOutcome::Appended(entry) => entry,
    other => panic!("expected Appended, got {:?}", other),
  };

  let mut replay = confirmed;
  replay.recorded_at = Utc::now() + Duration::seconds(1);
  let second = h.engine.ledger().append(replay).await.unwrap();
  assert_eq!(second, AppendOutcome::Suppressed(stored));
  assert_eq!(h.history_len(placed.order.id).await, 2);
}

#[tokio::test]
async fn appending_to_an_unknown_order_fails() {
  let h = harness();
  let entry = NewHistoryEntry::transition(
    Uuid::new_v4(),
    OrderStatus::Confirmed,
    Actor::System("test".to_string()),
    None,
    Utc::now(),
  );
  let err = h.engine.ledger().append(entry).await.unwrap_err();
  assert!(matches!(err, EngineError::OrderNotFound(_)));
}

#[tokio::test]
async fn legacy_orders_get_an_inferred_timeline() {
  let h = harness();
  let order = legacy_order(OrderStatus::Confirmed);
  h.store.insert_legacy_order(order.clone());

  let (found, events) = h.engine.ledger().tracking_timeline_by_code(&order.code).await.unwrap();
  assert_eq!(found.id, order.id);
  assert_eq!(events.len(), 2);
  assert_eq!(events[0].status, OrderStatus::PendingConfirmation);
  assert_eq!(events[0].at, order.created_at);
  assert_eq!(events[0].label, "Awaiting confirmation");
  assert!(events[0].inferred);
  assert_eq!(events[1].status, OrderStatus::Confirmed);
  assert_eq!(events[1].at, order.updated_at);
  assert!(events[1].inferred);
  assert_eq!(events[1].actor, None);
}

#[tokio::test]
async fn backfill_writes_the_creation_entry_once() {
  let h = harness();
  let order = legacy_order(OrderStatus::Confirmed);
  h.store.insert_legacy_order(order.clone());

  let written = h.engine.ledger().backfill_missing(&order).await.unwrap().expect("entry written");
  assert_eq!(written.kind, EntryKind::Backfill);
  assert_eq!(written.status, OrderStatus::PendingConfirmation);
  assert_eq!(written.recorded_at, order.created_at);
  assert_eq!(written.actor, Actor::System(BACKFILL_ACTOR.to_string()));

  assert_eq!(h.engine.ledger().backfill_missing(&order).await.unwrap(), None);
  assert_eq!(h.history_len(order.id).await, 1);

  let events = h.engine.ledger().tracking_timeline(&order).await.unwrap();
  let statuses: Vec<_> = events.iter().map(|e| (e.status, e.inferred)).collect();
  assert_eq!(
    statuses,
    vec![(OrderStatus::PendingConfirmation, false), (OrderStatus::Confirmed, true)]
  );
}

#[tokio::test]
async fn backfill_skips_orders_that_already_have_a_creation_entry() {
  let h = harness();
  let placed = h.gateway_order(50_000).await;
  assert_eq!(h.engine.ledger().backfill_missing(&placed.order).await.unwrap(), None);
  assert_eq!(h.history_len(placed.order.id).await, 1);
}

#[tokio::test]
async fn timeline_is_ordered_by_recording_time() {
  let h = harness();
  let customer = Uuid::new_v4();
  let placed = h
    .engine
    .checkout()
    .place_order(h.request(customer, 50_000, PaymentMethod::CashOnDelivery))
    .await
    .unwrap();
  h.engine
    .machine()
    .advance_by_staff(placed.order.id, Uuid::new_v4(), OrderStatus::Confirmed, None)
    .await
    .unwrap();

  // a late-arriving backfill for an earlier moment lands first
  let earlier = NewHistoryEntry {
    order_id: placed.order.id,
    status: OrderStatus::PendingConfirmation,
    recorded_at: placed.order.created_at - Duration::minutes(5),
    actor: Actor::System(BACKFILL_ACTOR.to_string()),
    note: None,
    kind: EntryKind::Backfill,
  };
  h.engine.ledger().append(earlier).await.unwrap();

  let history = h.engine.ledger().timeline(placed.order.id).await.unwrap();
  assert_eq!(history.len(), 3);
  assert!(history.windows(2).all(|w| w[0].recorded_at <= w[1].recorded_at));
  assert_eq!(history[0].kind, EntryKind::Backfill);
  assert_eq!(history[2].status, OrderStatus::Confirmed);

  let events = h.engine.ledger().tracking_timeline(&placed.order).await.unwrap();
  assert!(events.iter().all(|e| !e.inferred));
  assert_eq!(events.len(), 3);
}

#[tokio::test]
async fn tracking_an_unknown_code_is_not_found() {
  let h = harness();
  let err = h.engine.ledger().tracking_timeline_by_code("000000DEADBEEF").await.unwrap_err();
  assert!(matches!(err, EngineError::OrderNotFound(_)));
}
