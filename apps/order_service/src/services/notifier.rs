// order_service/src/services/notifier.rs

use async_trait::async_trait;
use orderflow::model::Order;
use orderflow::Notifier;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct SentEmailInfo {
  pub to: String,
  pub from: String,
  pub subject: String,
  pub body_preview: String,
  pub message_id: String,
}

/// Simulated mail delivery: writes the confirmation mail to the log.
#[derive(Debug, Clone)]
pub struct LogNotifier {
  sender: String,
  latency: Duration,
}

impl LogNotifier {
  pub fn new(sender: impl Into<String>) -> Self {
    Self {
      sender: sender.into(),
      latency: Duration::from_millis(20),
    }
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  pub async fn send_mail(&self, to: &str, subject: &str, body: &str) -> Result<SentEmailInfo, String> {
    info!(to, from = %self.sender, subject, "Simulating sending email");
    tokio::time::sleep(self.latency).await;

    if to.is_empty() {
      return Err("recipient is empty".to_string());
    }

    let body_preview = body.chars().take(50).collect::<String>() + "...";
    let message_id = format!("mock_email_{}", uuid::Uuid::new_v4());
    info!(%message_id, "Mock email sent");

    Ok(SentEmailInfo {
      to: to.to_string(),
      from: self.sender.clone(),
      subject: subject.to_string(),
      body_preview,
      message_id,
    })
  }
}

fn confirmation_body(order: &Order) -> String {
  format!(
    "Your order {} is confirmed. Total: {} (subtotal {}, shipping {}, discount {}).",
    order.code,
    order.total_cents(),
    order.totals.subtotal_cents(),
    order.totals.shipping_fee_cents(),
    order.totals.discount_cents()
  )
}

#[async_trait]
impl Notifier for LogNotifier {
  #[instrument(name = "LogNotifier::send_order_confirmation", skip_all, fields(order_code = %order.code))]
  async fn send_order_confirmation(&self, order: &Order) -> bool {
    // customer mailboxes live outside this service; the customer id stands in
    let to = format!("customer+{}@example.com", order.customer_id);
    let subject = format!("Order {} confirmed", order.code);
    match self.send_mail(&to, &subject, &confirmation_body(order)).await {
      Ok(sent) => {
        info!(message_id = %sent.message_id, to = %sent.to, subject = %sent.subject, "confirmation mail sent");
        true
      }
      Err(reason) => {
        warn!(%reason, "confirmation mail not sent");
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn mail_is_accepted_and_previewed() {
    let notifier = LogNotifier::new("shop@example.com").with_latency(Duration::ZERO);
    let sent = notifier
      .send_mail("a@example.com", "Hello", &"x".repeat(80))
      .await
      .unwrap();
    assert_eq!(sent.from, "shop@example.com");
    assert_eq!(sent.body_preview.len(), 53);
    assert!(sent.message_id.starts_with("mock_email_"));

    assert!(notifier.send_mail("", "Hello", "body").await.is_err());
  }
}
