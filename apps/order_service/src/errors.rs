// order_service/src/errors.rs

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use orderflow::{EngineError, ErrorKind, StoreError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Bad Request: {0}")]
  BadRequest(String),

  #[error("Authentication Failed: {0}")]
  Auth(String),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Order Engine Error: {source}")]
  Engine {
    #[from]
    source: EngineError,
  },
}

impl From<StoreError> for AppError {
  fn from(err: StoreError) -> Self {
    AppError::Engine { source: err.into() }
  }
}

fn engine_status(kind: ErrorKind) -> StatusCode {
  match kind {
    ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
    ErrorKind::Transition | ErrorKind::Transient => StatusCode::CONFLICT,
    ErrorKind::Integrity => StatusCode::BAD_REQUEST,
    ErrorKind::NotFound => StatusCode::NOT_FOUND,
    ErrorKind::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

impl ResponseError for AppError {
  fn status_code(&self) -> StatusCode {
    match self {
      AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
      AppError::Auth(_) => StatusCode::UNAUTHORIZED,
      AppError::Engine { source } => engine_status(source.kind()),
      AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn error_response(&self) -> HttpResponse {
    let status = self.status_code();
    match self {
      AppError::Engine { source } => {
        // integrity details stay in the server log
        match source.kind() {
          ErrorKind::Integrity | ErrorKind::Infrastructure => {
            tracing::error!(application_error = %self, "Responding with error")
          }
          _ => tracing::warn!(application_error = %self, "Request rejected"),
        }
        let mut body = json!({ "error": source.public_message() });
        if let EngineError::Validation(reason) | EngineError::VoucherNoLongerAvailable { reason, .. } = source {
          body["reason"] = json!(voucher_reason(reason));
        }
        HttpResponse::build(status).json(body)
      }
      AppError::BadRequest(m) | AppError::Auth(m) => {
        tracing::warn!(application_error = %self, "Request rejected");
        HttpResponse::build(status).json(json!({ "error": m }))
      }
      AppError::Config(_) => {
        tracing::error!(application_error = %self, "Responding with error");
        HttpResponse::build(status).json(json!({ "error": "An internal error occurred." }))
      }
    }
  }
}

/// Machine-readable voucher rule name for API clients.
fn voucher_reason(reason: &orderflow::VoucherError) -> &'static str {
  use orderflow::VoucherError::*;
  match reason {
    NotFound { .. } => "not_found",
    NotYetValid { .. } => "not_yet_valid",
    Expired { .. } => "expired",
    BelowMinimum { .. } => "below_minimum",
    Exhausted { .. } => "exhausted",
    AlreadyUsed { .. } => "already_used",
    InvalidDefinition(_) => "invalid_definition",
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
