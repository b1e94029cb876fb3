// order_service/src/web/extractors.rs

//! Caller identity. Authentication happens in front of this service; the
//! gateway forwards the resolved identity in a header.

use crate::errors::AppError;
use actix_web::{dev::Payload, FromRequest, HttpRequest};
use futures_util::future::{ready, Ready};
use tracing::warn;
use uuid::Uuid;

pub const CUSTOMER_HEADER: &str = "X-Customer-Id";
pub const STAFF_HEADER: &str = "X-Staff-Id";

fn identity_header(req: &HttpRequest, header: &'static str) -> Result<Uuid, AppError> {
  let parsed = req
    .headers()
    .get(header)
    .and_then(|value| value.to_str().ok())
    .and_then(|raw| Uuid::parse_str(raw.trim()).ok());
  parsed.ok_or_else(|| {
    warn!(header, "missing or invalid identity header");
    AppError::Auth(format!("Missing or invalid {} header.", header))
  })
}

/// The customer placing or managing an order.
#[derive(Debug, Clone, Copy)]
pub struct CustomerId(pub Uuid);

impl FromRequest for CustomerId {
  type Error = AppError;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
    ready(identity_header(req, CUSTOMER_HEADER).map(CustomerId))
  }
}

/// A back-office user.
#[derive(Debug, Clone, Copy)]
pub struct StaffId(pub Uuid);

impl FromRequest for StaffId {
  type Error = AppError;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
    ready(identity_header(req, STAFF_HEADER).map(StaffId))
  }
}
