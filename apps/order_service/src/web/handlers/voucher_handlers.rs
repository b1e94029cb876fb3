// order_service/src/web/handlers/voucher_handlers.rs

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use crate::errors::AppError;
use crate::state::AppState;
use crate::web::extractors::CustomerId;

#[derive(Deserialize, Debug)]
pub struct ValidateVoucherPayload {
  pub code: String,
  pub order_cents: i64,
}

/// Cart preview: what the voucher would take off this order, without using it.
#[instrument(
    name = "handler::validate_voucher",
    skip(app_state, payload, customer),
    fields(customer_id = %customer.0, voucher_code = %payload.code)
)]
pub async fn validate_voucher_handler(
  app_state: web::Data<AppState>,
  payload: web::Json<ValidateVoucherPayload>,
  customer: CustomerId,
) -> Result<HttpResponse, AppError> {
  if payload.order_cents < 0 {
    return Err(AppError::BadRequest("order_cents must not be negative.".to_string()));
  }
  let quote = app_state
    .engine
    .promotions()
    .validate(customer.0, &payload.code, payload.order_cents)
    .await?;

  Ok(HttpResponse::Ok().json(json!({
    "voucherId": quote.voucher.id,
    "code": quote.voucher.code,
    "discountCents": quote.discount_cents,
    "orderCentsAfterDiscount": payload.order_cents - quote.discount_cents,
  })))
}
