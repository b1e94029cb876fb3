// orderflow/src/config.rs

use std::fmt;

pub const DEFAULT_CURRENCY: &str = "VND";
pub const DEFAULT_TRANSITION_MAX_ATTEMPTS: u32 = 3;

/// Settings of the hosted payment gateway.
#[derive(Clone)]
pub struct GatewayConfig {
  pub merchant_code: String,
  /// Shared HMAC secret. Never logged.
  pub hash_secret: String,
  pub payment_url: String,
  pub return_url: String,
  pub version: String,
  pub locale: String,
  pub order_type: String,
  /// Offset of the gateway's wall clock used for `vnp_CreateDate`.
  pub utc_offset_minutes: i32,
  /// How long a payment link stays usable.
  pub link_ttl_minutes: i64,
  /// Name recorded as the actor of gateway-driven status changes.
  pub name: String,
}

impl GatewayConfig {
  pub fn new(merchant_code: impl Into<String>, hash_secret: impl Into<String>) -> Self {
    Self {
      merchant_code: merchant_code.into(),
      hash_secret: hash_secret.into(),
      payment_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string(),
      return_url: "http://localhost:8080/api/v1/payments/gateway/return".to_string(),
      version: "2.1.0".to_string(),
      locale: "vn".to_string(),
      order_type: "other".to_string(),
      utc_offset_minutes: 7 * 60,
      link_ttl_minutes: 15,
      name: "vnpay".to_string(),
    }
  }
}

impl fmt::Debug for GatewayConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GatewayConfig")
      .field("merchant_code", &self.merchant_code)
      .field("hash_secret", &"<redacted>")
      .field("payment_url", &self.payment_url)
      .field("return_url", &self.return_url)
      .field("version", &self.version)
      .field("locale", &self.locale)
      .field("order_type", &self.order_type)
      .field("utc_offset_minutes", &self.utc_offset_minutes)
      .field("link_ttl_minutes", &self.link_ttl_minutes)
      .field("name", &self.name)
      .finish()
  }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// The single currency orders are priced in.
  pub currency: String,
  /// Largest accepted difference between a callback amount and the order
  /// total, in minor units. Amounts never pass through floating point, so
  /// the default is an exact match; `1` accepts a gap of one hundredth of a
  /// currency unit.
  pub amount_tolerance_cents: i64,
  /// Read-validate-write attempts before a status change gives up with
  /// `ConcurrentModification`.
  pub transition_max_attempts: u32,
  pub gateway: GatewayConfig,
}

impl EngineConfig {
  pub fn new(gateway: GatewayConfig) -> Self {
    Self {
      currency: DEFAULT_CURRENCY.to_string(),
      amount_tolerance_cents: 0,
      transition_max_attempts: DEFAULT_TRANSITION_MAX_ATTEMPTS,
      gateway,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn debug_output_hides_the_secret() {
    let config = GatewayConfig::new("DEMO0001", "top-secret");
    let rendered = format!("{:?}", config);
    assert!(!rendered.contains("top-secret"));
    assert!(rendered.contains("DEMO0001"));
  }

  #[test]
  fn engine_defaults_require_exact_amounts() {
    let config = EngineConfig::new(GatewayConfig::new("DEMO0001", "top-secret"));
    assert_eq!(config.amount_tolerance_cents, 0);
    assert_eq!(config.transition_max_attempts, DEFAULT_TRANSITION_MAX_ATTEMPTS);
  }
}
