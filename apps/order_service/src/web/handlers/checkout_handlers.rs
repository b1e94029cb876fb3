// order_service/src/web/handlers/checkout_handlers.rs

use actix_web::{web, HttpRequest, HttpResponse};
use orderflow::model::{DeliveryMethod, Destination, PaymentMethod};
use orderflow::CheckoutRequest;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use super::order_summary;
use crate::errors::AppError;
use crate::state::AppState;
use crate::web::extractors::CustomerId;

// --- Request DTO ---
#[derive(Deserialize, Debug)]
pub struct CheckoutPayload {
  pub subtotal_cents: i64,
  #[serde(default)]
  pub shipping_fee_cents: i64,
  pub delivery_method: DeliveryMethod,
  pub destination: Destination,
  pub payment_method: PaymentMethod,
  #[serde(default)]
  pub voucher_code: Option<String>,
  /// Set when the cart page already showed the voucher as accepted.
  #[serde(default)]
  pub voucher_previewed: bool,
}

// --- Handler Implementation ---

#[instrument(
    name = "handler::place_order",
    skip(app_state, req, payload, customer),
    fields(customer_id = %customer.0, payment_method = %payload.payment_method)
)]
pub async fn place_order_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  payload: web::Json<CheckoutPayload>,
  customer: CustomerId,
) -> Result<HttpResponse, AppError> {
  let payload = payload.into_inner();
  let client_ip = req.connection_info().realip_remote_addr().map(str::to_string);

  let placed = app_state
    .engine
    .checkout()
    .place_order(CheckoutRequest {
      customer_id: customer.0,
      subtotal_cents: payload.subtotal_cents,
      shipping_fee_cents: payload.shipping_fee_cents,
      delivery_method: payload.delivery_method,
      destination: payload.destination,
      payment_method: payload.payment_method,
      voucher_code: payload.voucher_code,
      voucher_previewed: payload.voucher_previewed,
      client_ip,
    })
    .await?;

  info!(
    order_code = %placed.order.code,
    total_cents = placed.order.total_cents(),
    "order placed"
  );

  let mut body = order_summary(&placed.order);
  body["paymentUrl"] = json!(placed.redirect_url);
  body["voucherApplied"] = json!(placed.redemption.is_some());
  Ok(HttpResponse::Created().json(body))
}

#[cfg(test)]
mod tests {
  use crate::web::configure_app_routes;
  use crate::web::extractors::CUSTOMER_HEADER;
  use crate::web::handlers::testing::test_state;
  use actix_web::http::StatusCode;
  use actix_web::{test, web, App};
  use serde_json::{json, Value};
  use uuid::Uuid;

  fn checkout_body(payment_method: &str) -> Value {
    json!({
      "subtotal_cents": 200_000,
      "shipping_fee_cents": 30_000,
      "delivery_method": "home_delivery",
      "destination": { "kind": "address", "id": Uuid::new_v4() },
      "payment_method": payment_method,
    })
  }

  #[actix_web::test]
  async fn gateway_checkout_returns_the_payment_redirect() {
    let t = test_state();
    let app = test::init_service(App::new().app_data(web::Data::new(t.state.clone())).configure(configure_app_routes)).await;

    let req = test::TestRequest::post()
      .uri("/api/v1/checkout")
      .insert_header((CUSTOMER_HEADER, Uuid::new_v4().to_string()))
      .set_json(checkout_body("gateway"))
      .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "pending_confirmation");
    assert_eq!(body["statusLabel"], "Awaiting confirmation");
    assert_eq!(body["totalCents"], 230_000);
    let url = body["paymentUrl"].as_str().expect("gateway orders get a redirect");
    assert!(url.starts_with(&t.state.config.engine.gateway.payment_url));
    assert!(url.contains("vnp_SecureHash="));
  }

  #[actix_web::test]
  async fn cash_on_delivery_has_no_redirect() {
    let t = test_state();
    let app = test::init_service(App::new().app_data(web::Data::new(t.state.clone())).configure(configure_app_routes)).await;

    let req = test::TestRequest::post()
      .uri("/api/v1/checkout")
      .insert_header((CUSTOMER_HEADER, Uuid::new_v4().to_string()))
      .set_json(checkout_body("cash_on_delivery"))
      .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert!(body["paymentUrl"].is_null());
    assert_eq!(body["voucherApplied"], false);
  }

  #[actix_web::test]
  async fn checkout_requires_a_customer() {
    let t = test_state();
    let app = test::init_service(App::new().app_data(web::Data::new(t.state.clone())).configure(configure_app_routes)).await;

    let req = test::TestRequest::post()
      .uri("/api/v1/checkout")
      .set_json(checkout_body("gateway"))
      .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  }

  #[actix_web::test]
  async fn unknown_voucher_is_a_validation_failure() {
    let t = test_state();
    let app = test::init_service(App::new().app_data(web::Data::new(t.state.clone())).configure(configure_app_routes)).await;

    let mut body = checkout_body("cash_on_delivery");
    body["voucher_code"] = json!("NOPE");
    let req = test::TestRequest::post()
      .uri("/api/v1/checkout")
      .insert_header((CUSTOMER_HEADER, Uuid::new_v4().to_string()))
      .set_json(body)
      .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "not_found");
  }
}
