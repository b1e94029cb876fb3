// order_service/src/web/handlers/payment_handlers.rs

//! Gateway entry points. The IPN endpoint is called server-to-server and
//! always answers 200 with an acknowledgement code; the return endpoint is
//! where the customer's browser lands after paying.

use actix_web::{web, HttpResponse};
use orderflow::gateway::response_message;
use orderflow::{EngineError, ErrorKind, IpnAck};
use serde_json::json;
use std::collections::HashMap;
use tracing::{error, info, instrument, warn};

use crate::errors::AppError;
use crate::state::AppState;

async fn reconcile_to_ack(app_state: &AppState, params: HashMap<String, String>) -> HttpResponse {
  let ack = match app_state.engine.reconciler().handle_callback(params).await {
    Ok(outcome) => {
      info!(order_code = %outcome.order_code(), "gateway callback reconciled");
      outcome.ack()
    }
    Err(err) => {
      match err.kind() {
        ErrorKind::Integrity | ErrorKind::Infrastructure => error!(error = %err, "gateway callback refused"),
        _ => warn!(error = %err, "gateway callback refused"),
      }
      IpnAck::for_error(&err)
    }
  };
  HttpResponse::Ok().json(ack)
}

#[instrument(name = "handler::gateway_ipn", skip_all)]
pub async fn gateway_ipn_handler(
  app_state: web::Data<AppState>,
  query: web::Query<HashMap<String, String>>,
) -> HttpResponse {
  reconcile_to_ack(&app_state, query.into_inner()).await
}

/// Same callback delivered as a form-encoded POST body.
#[instrument(name = "handler::gateway_ipn_form", skip_all)]
pub async fn gateway_ipn_form_handler(
  app_state: web::Data<AppState>,
  form: web::Form<HashMap<String, String>>,
) -> HttpResponse {
  reconcile_to_ack(&app_state, form.into_inner()).await
}

/// Reports the payment result to the customer. Only verifies the signature
/// and reads state; settlement belongs to the IPN.
#[instrument(name = "handler::gateway_return", skip_all)]
pub async fn gateway_return_handler(
  app_state: web::Data<AppState>,
  query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, AppError> {
  let engine = &app_state.engine;
  let callback = engine.gateway().verify_callback(&query)?;

  let store = engine.store();
  let order = store
    .order_by_code(&callback.order_code)
    .await?
    .ok_or_else(|| EngineError::OrderNotFound(callback.order_code.clone()))?;
  let payment = store.payment_for_order(order.id).await?;

  let message = if callback.is_success() {
    "Payment successful."
  } else {
    response_message(callback.failure_code())
  };
  Ok(HttpResponse::Ok().json(json!({
    "orderCode": order.code,
    "success": callback.is_success(),
    "message": message,
    "orderStatus": order.status,
    "statusLabel": engine.catalog().label(order.status),
    "paymentStatus": payment.map(|p| p.status),
  })))
}

#[cfg(test)]
mod tests {
  use super::super::testing::{test_state, SECRET};
  use crate::web::configure_app_routes;
  use actix_web::http::{header, StatusCode};
  use actix_web::{test, web, App};
  use orderflow::gateway::fields;
  use orderflow::model::{DeliveryMethod, Destination, PaymentMethod};
  use orderflow::{CheckoutRequest, Engine, GatewaySigner, PlacedOrder};
  use serde_json::Value;
  use uuid::Uuid;

  async fn gateway_order(engine: &Engine) -> PlacedOrder {
    engine
      .checkout()
      .place_order(CheckoutRequest {
        customer_id: Uuid::new_v4(),
        subtotal_cents: 150_000,
        shipping_fee_cents: 0,
        delivery_method: DeliveryMethod::HomeDelivery,
        destination: Destination::Address(Uuid::new_v4()),
        payment_method: PaymentMethod::Gateway,
        voucher_code: None,
        voucher_previewed: false,
        client_ip: None,
      })
      .await
      .expect("order placed")
  }

  // Values stay URL-safe so the query needs no escaping.
  fn signed_query(order_code: &str, amount_cents: i64, response_code: &str) -> String {
    let mut pairs = vec![
      (fields::ORDER_CODE.to_string(), order_code.to_string()),
      (fields::AMOUNT.to_string(), amount_cents.to_string()),
      (fields::RESPONSE_CODE.to_string(), response_code.to_string()),
      (fields::TRANSACTION_STATUS.to_string(), response_code.to_string()),
      (fields::TRANSACTION_NO.to_string(), "14512345".to_string()),
      (fields::BANK_CODE.to_string(), "NCB".to_string()),
    ];
    let signer = GatewaySigner::new(SECRET).unwrap();
    let canonical = GatewaySigner::canonical_query(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    pairs.push((fields::SECURE_HASH.to_string(), signer.sign(&canonical)));
    pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join("&")
  }

  #[actix_web::test]
  async fn ipn_confirms_once_then_reports_already_confirmed() {
    let t = test_state();
    let placed = gateway_order(&t.state.engine).await;
    let app = test::init_service(App::new().app_data(web::Data::new(t.state.clone())).configure(configure_app_routes)).await;
    let uri = format!("/api/v1/payments/gateway/ipn?{}", signed_query(&placed.order.code, 150_000, "00"));

    let body: Value = test::call_and_read_body_json(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    assert_eq!(body["RspCode"], "00");
    let body: Value = test::call_and_read_body_json(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    assert_eq!(body["RspCode"], "02");

    let order = t.state.engine.store().order(placed.order.id).await.unwrap().unwrap();
    assert_eq!(order.status, orderflow::OrderStatus::Confirmed);
  }

  #[actix_web::test]
  async fn ipn_accepts_a_form_encoded_post() {
    let t = test_state();
    let placed = gateway_order(&t.state.engine).await;
    let app = test::init_service(App::new().app_data(web::Data::new(t.state.clone())).configure(configure_app_routes)).await;
    let post = || {
      test::TestRequest::post()
        .uri("/api/v1/payments/gateway/ipn")
        .insert_header((header::CONTENT_TYPE, "application/x-www-form-urlencoded"))
        .set_payload(signed_query(&placed.order.code, 150_000, "00"))
        .to_request()
    };

    let body: Value = test::call_and_read_body_json(&app, post()).await;
    assert_eq!(body["RspCode"], "00");
    let body: Value = test::call_and_read_body_json(&app, post()).await;
    assert_eq!(body["RspCode"], "02");

    let order = t.state.engine.store().order(placed.order.id).await.unwrap().unwrap();
    assert_eq!(order.status, orderflow::OrderStatus::Confirmed);
  }

  #[actix_web::test]
  async fn ipn_answers_gateway_codes_for_refusals() {
    let t = test_state();
    let placed = gateway_order(&t.state.engine).await;
    let app = test::init_service(App::new().app_data(web::Data::new(t.state.clone())).configure(configure_app_routes)).await;

    let wrong_amount = format!("/api/v1/payments/gateway/ipn?{}", signed_query(&placed.order.code, 1, "00"));
    let body: Value = test::call_and_read_body_json(&app, test::TestRequest::get().uri(&wrong_amount).to_request()).await;
    assert_eq!(body["RspCode"], "04");

    let tampered = format!(
      "/api/v1/payments/gateway/ipn?{}",
      signed_query(&placed.order.code, 150_000, "00").replace("vnp_BankCode=NCB", "vnp_BankCode=VCB")
    );
    let body: Value = test::call_and_read_body_json(&app, test::TestRequest::get().uri(&tampered).to_request()).await;
    assert_eq!(body["RspCode"], "97");

    let unknown = format!("/api/v1/payments/gateway/ipn?{}", signed_query("NOSUCHORDER", 150_000, "00"));
    let body: Value = test::call_and_read_body_json(&app, test::TestRequest::get().uri(&unknown).to_request()).await;
    assert_eq!(body["RspCode"], "01");

    let order = t.state.engine.store().order(placed.order.id).await.unwrap().unwrap();
    assert_eq!(order.status, orderflow::OrderStatus::PendingConfirmation);
  }

  #[actix_web::test]
  async fn return_page_reports_without_settling() {
    let t = test_state();
    let placed = gateway_order(&t.state.engine).await;
    let app = test::init_service(App::new().app_data(web::Data::new(t.state.clone())).configure(configure_app_routes)).await;

    let uri = format!("/api/v1/payments/gateway/return?{}", signed_query(&placed.order.code, 150_000, "00"));
    let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["paymentStatus"], "pending");
    assert_eq!(body["orderStatus"], "pending_confirmation");
  }

  #[actix_web::test]
  async fn return_page_hides_signature_failures() {
    let t = test_state();
    let placed = gateway_order(&t.state.engine).await;
    let app = test::init_service(App::new().app_data(web::Data::new(t.state.clone())).configure(configure_app_routes)).await;

    let uri = format!(
      "/api/v1/payments/gateway/return?{}",
      signed_query(&placed.order.code, 150_000, "00").replace("vnp_Amount=150000", "vnp_Amount=1")
    );
    let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "We could not verify your payment.");
  }
}
