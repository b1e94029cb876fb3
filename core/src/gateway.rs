// orderflow/src/gateway.rs

//! Hosted payment gateway protocol (VNPay-compatible).
//!
//! Redirect URLs and inbound callbacks share one canonical form:
//! 1. keep parameters whose key starts with `vnp_`, except the hash fields,
//! 2. drop empty values,
//! 3. sort by key (byte order),
//! 4. form-urlencode each key and value and join as `k=v&k=v`.
//!
//! The signature is the lowercase hex HMAC-SHA512 of that string under the
//! merchant's hash secret.

use crate::config::GatewayConfig;
use crate::error::{EngineError, EngineResult};
use crate::model::Order;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha512;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::error;

type HmacSha512 = Hmac<Sha512>;

/// Parameter names of the gateway protocol.
pub mod fields {
  pub const PREFIX: &str = "vnp_";
  pub const VERSION: &str = "vnp_Version";
  pub const COMMAND: &str = "vnp_Command";
  pub const MERCHANT_CODE: &str = "vnp_TmnCode";
  pub const AMOUNT: &str = "vnp_Amount";
  pub const CURRENCY: &str = "vnp_CurrCode";
  pub const ORDER_CODE: &str = "vnp_TxnRef";
  pub const ORDER_INFO: &str = "vnp_OrderInfo";
  pub const ORDER_TYPE: &str = "vnp_OrderType";
  pub const LOCALE: &str = "vnp_Locale";
  pub const RETURN_URL: &str = "vnp_ReturnUrl";
  pub const CLIENT_IP: &str = "vnp_IpAddr";
  pub const CREATE_DATE: &str = "vnp_CreateDate";
  pub const EXPIRE_DATE: &str = "vnp_ExpireDate";
  pub const RESPONSE_CODE: &str = "vnp_ResponseCode";
  pub const TRANSACTION_STATUS: &str = "vnp_TransactionStatus";
  pub const TRANSACTION_NO: &str = "vnp_TransactionNo";
  pub const BANK_CODE: &str = "vnp_BankCode";
  pub const PAY_DATE: &str = "vnp_PayDate";
  pub const SECURE_HASH: &str = "vnp_SecureHash";
  pub const SECURE_HASH_TYPE: &str = "vnp_SecureHashType";
}

pub const SUCCESS_CODE: &str = "00";

const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Text for the gateway's failure response codes, stored in payment notes.
pub fn response_message(code: &str) -> &'static str {
  match code {
    "00" => "Transaction successful",
    "07" => "Amount debited, transaction flagged as suspicious",
    "09" => "Card or account not registered for internet banking",
    "10" => "Card or account verification failed more than 3 times",
    "11" => "Payment window expired",
    "12" => "Card or account is locked",
    "13" => "Wrong one-time password",
    "24" => "Customer cancelled the transaction",
    "51" => "Insufficient balance",
    "65" => "Daily transaction limit exceeded",
    "75" => "Issuing bank under maintenance",
    "79" => "Wrong payment password entered too many times",
    _ => "Transaction failed",
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("gateway hash secret must not be empty")]
pub struct EmptySecret;

/// Builds and checks canonical signatures.
#[derive(Clone)]
pub struct GatewaySigner {
  mac: HmacSha512,
}

impl GatewaySigner {
  pub fn new(secret: &str) -> Result<Self, EmptySecret> {
    if secret.is_empty() {
      return Err(EmptySecret);
    }
    let mac = HmacSha512::new_from_slice(secret.as_bytes()).map_err(|_| EmptySecret)?;
    Ok(Self { mac })
  }

  /// The signed portion of `params`, in canonical order and encoding.
  pub fn canonical_query<'a, I>(params: I) -> String
  where
    I: IntoIterator<Item = (&'a str, &'a str)>,
  {
    let signed: BTreeMap<&str, &str> = params
      .into_iter()
      .filter(|(key, value)| {
        key.starts_with(fields::PREFIX)
          && *key != fields::SECURE_HASH
          && *key != fields::SECURE_HASH_TYPE
          && !value.is_empty()
      })
      .collect();
    form_urlencoded::Serializer::new(String::new())
      .extend_pairs(signed)
      .finish()
  }

  pub fn sign(&self, canonical: &str) -> String {
    let mut mac = self.mac.clone();
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
  }

  /// Checks `vnp_SecureHash` against the rest of `params` in constant time.
  pub fn verify(&self, params: &HashMap<String, String>) -> EngineResult<()> {
    let provided = params
      .get(fields::SECURE_HASH)
      .filter(|s| !s.is_empty())
      .ok_or(EngineError::InvalidSignature)?;
    let provided = hex::decode(provided.trim()).map_err(|_| EngineError::InvalidSignature)?;
    let canonical = Self::canonical_query(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    let mut mac = self.mac.clone();
    mac.update(canonical.as_bytes());
    mac.verify_slice(&provided).map_err(|_| EngineError::InvalidSignature)
  }
}

/// The fields of a verified callback the engine acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCallback {
  pub order_code: String,
  pub amount_cents: i64,
  pub currency: Option<String>,
  pub transaction_no: Option<String>,
  pub response_code: String,
  pub transaction_status: Option<String>,
  pub bank_code: Option<String>,
  pub pay_date: Option<String>,
}

impl GatewayCallback {
  pub fn parse(params: &HashMap<String, String>) -> EngineResult<Self> {
    let required = |key: &str| {
      params
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| EngineError::MalformedCallback(format!("missing {}", key)))
    };
    let optional = |key: &str| params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string);

    let raw_amount = required(fields::AMOUNT)?;
    let amount_cents: i64 = raw_amount
      .parse()
      .map_err(|_| EngineError::MalformedCallback(format!("{} is not an integer: '{}'", fields::AMOUNT, raw_amount)))?;
    if amount_cents < 0 {
      return Err(EngineError::MalformedCallback(format!("negative {}", fields::AMOUNT)));
    }

    Ok(Self {
      order_code: required(fields::ORDER_CODE)?,
      amount_cents,
      currency: optional(fields::CURRENCY),
      transaction_no: optional(fields::TRANSACTION_NO),
      response_code: required(fields::RESPONSE_CODE)?,
      transaction_status: optional(fields::TRANSACTION_STATUS),
      bank_code: optional(fields::BANK_CODE),
      pay_date: optional(fields::PAY_DATE),
    })
  }

  /// Success needs `00` in the response code and, when present, in the
  /// transaction status.
  pub fn is_success(&self) -> bool {
    self.response_code == SUCCESS_CODE && self.transaction_status.as_deref().map_or(true, |s| s == SUCCESS_CODE)
  }

  /// The code that explains a failure: the transaction status when the
  /// response code itself reads as success.
  pub fn failure_code(&self) -> &str {
    if self.response_code != SUCCESS_CODE {
      &self.response_code
    } else {
      self.transaction_status.as_deref().unwrap_or(&self.response_code)
    }
  }
}

/// Redirect construction and callback verification with one shared signer.
#[derive(Clone)]
pub struct PaymentGateway {
  config: GatewayConfig,
  currency: String,
  signer: GatewaySigner,
}

impl PaymentGateway {
  pub fn new(config: GatewayConfig, currency: &str) -> Result<Self, EmptySecret> {
    let signer = GatewaySigner::new(&config.hash_secret)?;
    Ok(Self {
      config,
      currency: currency.to_string(),
      signer,
    })
  }

  pub fn signer(&self) -> &GatewaySigner {
    &self.signer
  }

  pub fn name(&self) -> &str {
    &self.config.name
  }

  fn stamp(&self, at: DateTime<Utc>) -> String {
    match FixedOffset::east_opt(self.config.utc_offset_minutes * 60) {
      Some(offset) => at.with_timezone(&offset).format(STAMP_FORMAT).to_string(),
      None => at.format(STAMP_FORMAT).to_string(),
    }
  }

  /// Signed parameters of the redirect for `order`.
  pub fn payment_params(&self, order: &Order, client_ip: &str, now: DateTime<Utc>) -> Vec<(String, String)> {
    let expires = now + Duration::minutes(self.config.link_ttl_minutes);
    let mut params: Vec<(String, String)> = vec![
      (fields::VERSION, self.config.version.clone()),
      (fields::COMMAND, "pay".to_string()),
      (fields::MERCHANT_CODE, self.config.merchant_code.clone()),
      (fields::AMOUNT, order.total_cents().to_string()),
      (fields::CURRENCY, self.currency.clone()),
      (fields::ORDER_CODE, order.code.clone()),
      (fields::ORDER_INFO, format!("Payment for order {}", order.code)),
      (fields::ORDER_TYPE, self.config.order_type.clone()),
      (fields::LOCALE, self.config.locale.clone()),
      (fields::RETURN_URL, self.config.return_url.clone()),
      (fields::CLIENT_IP, client_ip.to_string()),
      (fields::CREATE_DATE, self.stamp(now)),
      (fields::EXPIRE_DATE, self.stamp(expires)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let canonical = GatewaySigner::canonical_query(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    params.push((fields::SECURE_HASH.to_string(), self.signer.sign(&canonical)));
    params
  }

  /// The URL the customer is redirected to. Its query is the canonical string
  /// plus the signature, so it verifies with the same code as callbacks.
  pub fn payment_url(&self, order: &Order, client_ip: &str, now: DateTime<Utc>) -> String {
    let params = self.payment_params(order, client_ip, now);
    let (signed, hash): (Vec<_>, Vec<_>) = params.iter().partition(|(k, _)| k != fields::SECURE_HASH);
    let mut query = GatewaySigner::canonical_query(signed.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    for (k, v) in hash {
      query.push('&');
      query.push_str(k);
      query.push('=');
      query.push_str(v);
    }
    format!("{}?{}", self.config.payment_url, query)
  }

  /// Signature first, then field parsing. Nothing is looked up before the
  /// signature holds.
  pub fn verify_callback(&self, params: &HashMap<String, String>) -> EngineResult<GatewayCallback> {
    if let Err(e) = self.signer.verify(params) {
      error!(
        order_code = params.get(fields::ORDER_CODE).map(String::as_str).unwrap_or(""),
        "gateway callback failed signature verification"
      );
      return Err(e);
    }
    GatewayCallback::parse(params)
  }
}

/// Acknowledgement body returned to the gateway's server-to-server callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IpnAck {
  #[serde(rename = "RspCode")]
  pub code: &'static str,
  #[serde(rename = "Message")]
  pub message: &'static str,
}

impl IpnAck {
  pub const CONFIRMED: IpnAck = IpnAck { code: "00", message: "Confirm Success" };
  pub const ALREADY_CONFIRMED: IpnAck = IpnAck { code: "02", message: "Order already confirmed" };
  pub const ORDER_NOT_FOUND: IpnAck = IpnAck { code: "01", message: "Order not found" };
  pub const INVALID_AMOUNT: IpnAck = IpnAck { code: "04", message: "Invalid amount" };
  pub const INVALID_SIGNATURE: IpnAck = IpnAck { code: "97", message: "Invalid signature" };
  pub const UNKNOWN_ERROR: IpnAck = IpnAck { code: "99", message: "Unknown error" };

  pub fn for_error(err: &EngineError) -> IpnAck {
    match err {
      EngineError::InvalidSignature => IpnAck::INVALID_SIGNATURE,
      EngineError::OrderNotFound(_) | EngineError::PaymentNotFound(_) => IpnAck::ORDER_NOT_FOUND,
      EngineError::AmountMismatch { .. } | EngineError::CurrencyMismatch { .. } => IpnAck::INVALID_AMOUNT,
      _ => IpnAck::UNKNOWN_ERROR,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
  }

  #[test]
  fn canonical_form_sorts_filters_and_encodes() {
    let canonical = GatewaySigner::canonical_query([
      ("vnp_TxnRef", "241019ABCD1234"),
      ("vnp_Amount", "100000"),
      ("vnp_OrderInfo", "Payment for order 1"),
      ("vnp_BankCode", ""),
      ("vnp_SecureHash", "deadbeef"),
      ("utm_source", "mail"),
    ]);
    assert_eq!(
      canonical,
      "vnp_Amount=100000&vnp_OrderInfo=Payment+for+order+1&vnp_TxnRef=241019ABCD1234"
    );
  }

  #[test]
  fn signed_params_verify_and_tampering_is_detected() {
    let signer = GatewaySigner::new("SECRET").unwrap();
    let mut p = params(&[
      ("vnp_TxnRef", "241019ABCD1234"),
      ("vnp_Amount", "100000"),
      ("vnp_ResponseCode", "00"),
    ]);
    let signature = signer.sign(&GatewaySigner::canonical_query(p.iter().map(|(k, v)| (k.as_str(), v.as_str()))));
    p.insert(fields::SECURE_HASH.to_string(), signature.to_uppercase());
    assert!(signer.verify(&p).is_ok());

    p.insert(fields::AMOUNT.to_string(), "99999".to_string());
    assert!(matches!(signer.verify(&p), Err(EngineError::InvalidSignature)));
  }

  #[test]
  fn missing_or_garbled_signature_is_rejected() {
    let signer = GatewaySigner::new("SECRET").unwrap();
    let p = params(&[("vnp_TxnRef", "X")]);
    assert!(matches!(signer.verify(&p), Err(EngineError::InvalidSignature)));
    let p = params(&[("vnp_TxnRef", "X"), ("vnp_SecureHash", "not-hex")]);
    assert!(matches!(signer.verify(&p), Err(EngineError::InvalidSignature)));
  }

  #[test]
  fn empty_secret_is_refused() {
    assert_eq!(GatewaySigner::new("").err(), Some(EmptySecret));
  }

  #[test]
  fn failure_is_read_from_either_code() {
    let mut cb = GatewayCallback::parse(&params(&[
      ("vnp_TxnRef", "A"),
      ("vnp_Amount", "10"),
      ("vnp_ResponseCode", "00"),
      ("vnp_TransactionStatus", "02"),
    ]))
    .unwrap();
    assert!(!cb.is_success());
    assert_eq!(cb.failure_code(), "02");
    cb.transaction_status = None;
    assert!(cb.is_success());
    cb.response_code = "24".to_string();
    assert_eq!(cb.failure_code(), "24");
    assert_eq!(response_message("24"), "Customer cancelled the transaction");
  }

  #[test]
  fn malformed_amount_is_reported() {
    let err = GatewayCallback::parse(&params(&[
      ("vnp_TxnRef", "A"),
      ("vnp_Amount", "12.5"),
      ("vnp_ResponseCode", "00"),
    ]))
    .unwrap_err();
    assert!(matches!(err, EngineError::MalformedCallback(_)));
  }
}
