// orderflow/src/notify.rs

use crate::model::Order;
use async_trait::async_trait;

/// Outbound customer notifications. Best effort: `false` means the message was
/// not delivered, and callers only log it.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn send_order_confirmation(&self, order: &Order) -> bool;
}

/// Drops every message. For deployments without a mail channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

#[async_trait]
impl Notifier for SilentNotifier {
  async fn send_order_confirmation(&self, order: &Order) -> bool {
    tracing::debug!(order_code = %order.code, "confirmation notification disabled");
    true
  }
}
