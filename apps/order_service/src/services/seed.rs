// order_service/src/services/seed.rs

use chrono::{Duration, Utc};
use orderflow::model::{Discount, Voucher};
use orderflow::{Engine, EngineError, StoreError};
use tracing::info;
use uuid::Uuid;

fn demo_vouchers() -> Vec<Voucher> {
  let now = Utc::now();
  let voucher = |code: &str, discount: Discount| Voucher {
    id: Uuid::new_v4(),
    code: code.to_string(),
    discount,
    starts_at: now - Duration::days(1),
    ends_at: now + Duration::days(90),
    min_order_cents: None,
    usage_cap: None,
    usage_count: 0,
    per_user_cap: None,
    active: true,
  };

  let mut big_spender = voucher("BIGSPEND", Discount::FixedAmount(50_000));
  big_spender.min_order_cents = Some(500_000);
  let mut first_hundred = voucher("FIRST100", Discount::Percentage(20));
  first_hundred.usage_cap = Some(100);

  vec![voucher("SAVE10", Discount::Percentage(10)), big_spender, first_hundred]
}

/// Registers the demo vouchers. Codes that already exist are left alone.
pub async fn seed_vouchers(engine: &Engine) -> Result<usize, EngineError> {
  let mut created = 0;
  for voucher in demo_vouchers() {
    let code = voucher.code.clone();
    match engine.promotions().register(voucher).await {
      Ok(_) => created += 1,
      Err(EngineError::Store(StoreError::DuplicateVoucherCode(_))) => {
        info!(voucher_code = %code, "Seed voucher already present")
      }
      Err(e) => return Err(e),
    }
  }
  info!(created, "Demo vouchers seeded");
  Ok(created)
}
