// orderflow/src/promotion.rs

//! Voucher validation and redemption.

use crate::error::{EngineError, EngineResult, StoreError, VoucherError};
use crate::model::{NewRedemption, Voucher, VoucherRedemption};
use crate::store::{OrderStore, RedemptionClaim};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A voucher that passed validation and the discount it grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoucherQuote {
  pub voucher: Voucher,
  pub discount_cents: i64,
}

pub struct PromotionLedger {
  store: Arc<dyn OrderStore>,
}

impl PromotionLedger {
  pub fn new(store: Arc<dyn OrderStore>) -> Self {
    Self { store }
  }

  pub async fn validate(&self, user_id: Uuid, code: &str, order_cents: i64) -> EngineResult<VoucherQuote> {
    self.validate_at(user_id, code, order_cents, Utc::now()).await
  }

  /// Checks, in order and stopping at the first failure: existence, validity
  /// window, minimum order amount, global usage cap, prior use by this user.
  #[instrument(name = "PromotionLedger::validate", skip(self))]
  pub async fn validate_at(
    &self,
    user_id: Uuid,
    code: &str,
    order_cents: i64,
    now: DateTime<Utc>,
  ) -> EngineResult<VoucherQuote> {
    if order_cents < 0 {
      return Err(EngineError::InvalidOrder(format!("order amount must not be negative, got {}", order_cents)));
    }
    let normalized = Voucher::normalize_code(code);

    let voucher = match self.store.voucher_by_code(&normalized).await? {
      Some(v) if v.active => v,
      _ => return Err(VoucherError::NotFound { code: normalized }.into()),
    };
    if now < voucher.starts_at {
      return Err(
        VoucherError::NotYetValid {
          code: voucher.code,
          starts_at: voucher.starts_at,
        }
        .into(),
      );
    }
    if now > voucher.ends_at {
      return Err(
        VoucherError::Expired {
          code: voucher.code,
          ended_at: voucher.ends_at,
        }
        .into(),
      );
    }
    if let Some(minimum_cents) = voucher.min_order_cents {
      if order_cents < minimum_cents {
        return Err(VoucherError::BelowMinimum {
          minimum_cents,
          order_cents,
        }
        .into());
      }
    }
    if !voucher.has_uses_left() {
      return Err(VoucherError::Exhausted { code: voucher.code }.into());
    }
    let used = self.store.redemption_count(user_id, voucher.id).await?;
    if used >= voucher.per_user_limit() {
      return Err(VoucherError::AlreadyUsed { code: voucher.code }.into());
    }

    voucher.discount.validate()?;
    let discount_cents = voucher.discount.amount_for(order_cents);
    Ok(VoucherQuote { voucher, discount_cents })
  }

  /// Records one use of the voucher by `user_id`. The per-user check, the
  /// usage counter bump and the insert are one unit of work in the store, so
  /// concurrent calls for the same user and voucher yield one success.
  #[instrument(name = "PromotionLedger::redeem", skip(self))]
  pub async fn redeem(
    &self,
    user_id: Uuid,
    voucher_id: Uuid,
    order_id: Option<Uuid>,
    discount_cents: i64,
  ) -> EngineResult<VoucherRedemption> {
    if discount_cents < 0 {
      return Err(EngineError::InvalidOrder(format!("discount must not be negative, got {}", discount_cents)));
    }
    let voucher = self
      .store
      .voucher(voucher_id)
      .await?
      .ok_or_else(|| VoucherError::NotFound {
        code: voucher_id.to_string(),
      })?;

    let claim = RedemptionClaim {
      redemption: NewRedemption {
        user_id,
        voucher_id,
        order_id,
        discount_cents,
        redeemed_at: Utc::now(),
      },
      per_user_cap: voucher.per_user_limit(),
    };
    match self.store.redeem(claim).await {
      Ok(redemption) => {
        info!(voucher_code = %voucher.code, %user_id, use_number = redemption.use_number, "voucher redeemed");
        Ok(redemption)
      }
      Err(e) => Err(claim_rejection(&voucher.code, e)),
    }
  }

  /// Adds a voucher after checking its definition.
  pub async fn register(&self, voucher: Voucher) -> EngineResult<Voucher> {
    voucher.discount.validate()?;
    if voucher.ends_at < voucher.starts_at {
      return Err(VoucherError::InvalidDefinition(format!("voucher '{}' ends before it starts", voucher.code)).into());
    }
    Ok(self.store.insert_voucher(voucher).await?)
  }
}

/// Maps a store refusal of a redemption onto the voucher rule it violates.
pub(crate) fn claim_rejection(code: &str, err: StoreError) -> EngineError {
  let code = code.to_string();
  match err {
    StoreError::AlreadyRedeemed { .. } => {
      warn!(voucher_code = %code, "redemption refused: already used by this customer");
      VoucherError::AlreadyUsed { code }.into()
    }
    StoreError::UsageCapReached(_) => {
      warn!(voucher_code = %code, "redemption refused: usage cap reached");
      VoucherError::Exhausted { code }.into()
    }
    StoreError::VoucherNotFound(_) => VoucherError::NotFound { code }.into(),
    other => EngineError::Store(other),
  }
}
