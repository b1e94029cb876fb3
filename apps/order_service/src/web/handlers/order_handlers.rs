// order_service/src/web/handlers/order_handlers.rs

use actix_web::{web, HttpResponse};
use orderflow::{OrderStatus, TransitionScope};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use super::order_summary;
use crate::errors::AppError;
use crate::state::AppState;
use crate::web::extractors::{CustomerId, StaffId};

#[derive(Deserialize, Debug, Default)]
pub struct CancelPayload {
  #[serde(default)]
  pub note: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct StatusPayload {
  pub status: OrderStatus,
  #[serde(default)]
  pub note: Option<String>,
}

#[instrument(name = "handler::cancel_order", skip(app_state, payload, customer), fields(customer_id = %customer.0))]
pub async fn cancel_order_handler(
  app_state: web::Data<AppState>,
  path: web::Path<Uuid>,
  payload: Option<web::Json<CancelPayload>>,
  customer: CustomerId,
) -> Result<HttpResponse, AppError> {
  let order_id = path.into_inner();
  let note = payload.map(|p| p.into_inner()).unwrap_or_default().note;
  let order = app_state
    .engine
    .machine()
    .cancel_by_customer(order_id, customer.0, note)
    .await?;
  info!(order_code = %order.code, "order cancelled by customer");
  Ok(HttpResponse::Ok().json(order_summary(&order)))
}

#[instrument(
    name = "handler::advance_order",
    skip(app_state, payload, staff),
    fields(staff_id = %staff.0, target = %payload.status)
)]
pub async fn advance_order_handler(
  app_state: web::Data<AppState>,
  path: web::Path<Uuid>,
  payload: web::Json<StatusPayload>,
  staff: StaffId,
) -> Result<HttpResponse, AppError> {
  let order_id = path.into_inner();
  let StatusPayload { status, note } = payload.into_inner();
  let machine = app_state.engine.machine();
  let order = machine.advance_by_staff(order_id, staff.0, status, note).await?;
  info!(order_code = %order.code, status = %order.status, "order status changed by staff");

  let next: Vec<OrderStatus> = machine.targets(&order, TransitionScope::Staff).iter().collect();
  let mut body = order_summary(&order);
  body["nextStatuses"] = json!(next);
  Ok(HttpResponse::Ok().json(body))
}

/// Customer tracking view, looked up by the order code printed on the receipt.
#[instrument(name = "handler::order_timeline", skip(app_state))]
pub async fn order_timeline_handler(
  app_state: web::Data<AppState>,
  path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
  let code = path.into_inner();
  let (order, events) = app_state.engine.ledger().tracking_timeline_by_code(&code).await?;
  Ok(HttpResponse::Ok().json(json!({
    "orderCode": order.code,
    "status": order.status,
    "statusLabel": app_state.engine.catalog().label(order.status),
    "events": events,
  })))
}
