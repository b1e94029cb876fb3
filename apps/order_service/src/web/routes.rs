// order_service/src/web/routes.rs

use actix_web::web;

use crate::config::StoreBackend;
use crate::state::AppState;
use crate::web::handlers::{checkout_handlers, order_handlers, payment_handlers, voucher_handlers};

async fn health_check_handler(app_state: web::Data<AppState>) -> actix_web::HttpResponse {
  let store = match app_state.config.store_backend {
    StoreBackend::Postgres => "postgres",
    StoreBackend::Memory => "memory",
  };
  actix_web::HttpResponse::Ok().json(serde_json::json!({ "status": "ok", "store": store }))
}

pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg.service(
    web::scope("/api/v1")
      .route("/health", web::get().to(health_check_handler))
      .route("/checkout", web::post().to(checkout_handlers::place_order_handler))
      .route("/vouchers/validate", web::post().to(voucher_handlers::validate_voucher_handler))
      .service(
        web::scope("/orders")
          .route("/{order_id}/cancel", web::post().to(order_handlers::cancel_order_handler))
          .route("/{order_code}/timeline", web::get().to(order_handlers::order_timeline_handler)),
      )
      .service(
        web::scope("/admin").route(
          "/orders/{order_id}/status",
          web::post().to(order_handlers::advance_order_handler),
        ),
      )
      .service(
        web::scope("/payments/gateway")
          .route("/ipn", web::get().to(payment_handlers::gateway_ipn_handler))
          .route("/ipn", web::post().to(payment_handlers::gateway_ipn_form_handler))
          .route("/return", web::get().to(payment_handlers::gateway_return_handler)),
      ),
  );
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::web::handlers::testing::test_state;
  use actix_web::{test, App};

  #[actix_web::test]
  async fn health_answers_ok() {
    let t = test_state();
    let app = test::init_service(App::new().app_data(web::Data::new(t.state.clone())).configure(configure_app_routes)).await;
    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "memory");
  }
}
