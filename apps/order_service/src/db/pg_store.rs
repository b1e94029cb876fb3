// order_service/src/db/pg_store.rs

//! `OrderStore` over PostgreSQL. Each unit of work is one transaction; the
//! order row (and the voucher row for redemptions) is locked with
//! `FOR UPDATE` before it is checked, so checks and writes see the same state.
//! Returning early drops the transaction, which rolls it back.

use crate::db::rows::{
  count_to_i32, destination_columns, HistoryRow, OrderRow, PaymentRow, RedemptionRow, VoucherRow, HISTORY_COLUMNS,
  ORDER_COLUMNS, PAYMENT_COLUMNS, REDEMPTION_COLUMNS, VOUCHER_COLUMNS,
};
use async_trait::async_trait;
use orderflow::model::{
  EntryKind, NewHistoryEntry, Order, Payment, StatusHistoryEntry, Voucher, VoucherRedemption,
};
use orderflow::store::{
  AppendOutcome, CheckoutDraft, CheckoutRecord, RedemptionClaim, SettledPayment, SettlementWrite, StatusChange,
};
use orderflow::{OrderStore, StatusCatalog, StoreError};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

type Tx<'c> = Transaction<'c, Postgres>;

const ORDER_CODE_KEY: &str = "orders_code_key";
const VOUCHER_CODE_KEY: &str = "vouchers_code_key";
const REDEMPTION_USE_KEY: &str = "voucher_redemptions_user_use_key";

fn backend(err: sqlx::Error) -> StoreError {
  StoreError::Backend(err.to_string())
}

/// Name of the unique constraint `err` violated, if that is what it is.
fn unique_violation(err: &sqlx::Error) -> Option<String> {
  err
    .as_database_error()
    .filter(|db| db.is_unique_violation())
    .and_then(|db| db.constraint().map(str::to_string))
}

pub struct PgOrderStore {
  pool: PgPool,
  catalog: &'static StatusCatalog,
}

impl PgOrderStore {
  pub fn new(pool: PgPool) -> Self {
    Self {
      pool,
      catalog: StatusCatalog::global(),
    }
  }

  pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
    let pool = PgPoolOptions::new()
      .max_connections(max_connections)
      .connect(database_url)
      .await?;
    Ok(Self::new(pool))
  }

  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(&self.pool).await
  }

  pub fn pool(&self) -> &PgPool {
    &self.pool
  }

  async fn begin(&self) -> Result<Tx<'static>, StoreError> {
    self.pool.begin().await.map_err(backend)
  }

  async fn lock_order(&self, tx: &mut Tx<'_>, order_id: Uuid) -> Result<Order, StoreError> {
    let sql = format!("SELECT {} FROM orders WHERE id = $1 FOR UPDATE", ORDER_COLUMNS);
    sqlx::query_as::<_, OrderRow>(&sql)
      .bind(order_id)
      .fetch_optional(&mut **tx)
      .await
      .map_err(backend)?
      .ok_or(StoreError::OrderNotFound(order_id))?
      .into_domain(self.catalog)
  }

  async fn insert_entry(&self, tx: &mut Tx<'_>, entry: NewHistoryEntry) -> Result<StatusHistoryEntry, StoreError> {
    let stored = entry.into_entry();
    sqlx::query(
      "INSERT INTO order_status_history (id, order_id, status_code, recorded_at, actor, note, kind) \
       VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(stored.id)
    .bind(stored.order_id)
    .bind(self.catalog.code_of(stored.status))
    .bind(stored.recorded_at)
    .bind(stored.actor.to_string())
    .bind(stored.note.as_deref())
    .bind(stored.kind.as_str())
    .execute(&mut **tx)
    .await
    .map_err(backend)?;
    Ok(stored)
  }

  async fn apply_change_in(&self, tx: &mut Tx<'_>, change: StatusChange) -> Result<Order, StoreError> {
    let current = self.lock_order(tx, change.order_id).await?;
    if current.version != change.expected_version || current.status != change.from {
      return Err(StoreError::VersionConflict {
        order_id: current.id,
        expected: change.expected_version,
        found: current.version,
      });
    }

    let sql = format!(
      "UPDATE orders SET status_code = $2, version = version + 1, updated_at = $3 WHERE id = $1 RETURNING {}",
      ORDER_COLUMNS
    );
    let order = sqlx::query_as::<_, OrderRow>(&sql)
      .bind(change.order_id)
      .bind(self.catalog.code_of(change.to))
      .bind(change.entry.recorded_at)
      .fetch_one(&mut **tx)
      .await
      .map_err(backend)?
      .into_domain(self.catalog)?;
    self.insert_entry(tx, change.entry).await?;
    Ok(order)
  }

  /// Per-user cap, then the conditional usage bump, then the insert.
  async fn claim_in(&self, tx: &mut Tx<'_>, claim: RedemptionClaim) -> Result<VoucherRedemption, StoreError> {
    let r = claim.redemption;
    let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM vouchers WHERE id = $1 FOR UPDATE")
      .bind(r.voucher_id)
      .fetch_optional(&mut **tx)
      .await
      .map_err(backend)?;
    if locked.is_none() {
      return Err(StoreError::VoucherNotFound(r.voucher_id));
    }

    let used: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM voucher_redemptions WHERE user_id = $1 AND voucher_id = $2")
      .bind(r.user_id)
      .bind(r.voucher_id)
      .fetch_one(&mut **tx)
      .await
      .map_err(backend)?;
    if used >= i64::from(claim.per_user_cap.max(1)) {
      return Err(StoreError::AlreadyRedeemed {
        user_id: r.user_id,
        voucher_id: r.voucher_id,
      });
    }

    let bumped = sqlx::query(
      "UPDATE vouchers SET usage_count = usage_count + 1 \
       WHERE id = $1 AND (usage_cap IS NULL OR usage_count < usage_cap)",
    )
    .bind(r.voucher_id)
    .execute(&mut **tx)
    .await
    .map_err(backend)?
    .rows_affected();
    if bumped == 0 {
      return Err(StoreError::UsageCapReached(r.voucher_id));
    }

    let sql = format!(
      "INSERT INTO voucher_redemptions ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {cols}",
      cols = REDEMPTION_COLUMNS
    );
    sqlx::query_as::<_, RedemptionRow>(&sql)
      .bind(Uuid::new_v4())
      .bind(r.user_id)
      .bind(r.voucher_id)
      .bind(r.order_id)
      .bind(r.discount_cents)
      .bind(i32::try_from(used + 1).unwrap_or(i32::MAX))
      .bind(r.redeemed_at)
      .fetch_one(&mut **tx)
      .await
      .map_err(|e| match unique_violation(&e).as_deref() {
        Some(REDEMPTION_USE_KEY) => StoreError::AlreadyRedeemed {
          user_id: r.user_id,
          voucher_id: r.voucher_id,
        },
        _ => backend(e),
      })?
      .into_domain()
  }

  async fn latest_entry(&self, tx: &mut Tx<'_>, order_id: Uuid) -> Result<Option<StatusHistoryEntry>, StoreError> {
    let sql = format!(
      "SELECT {} FROM order_status_history WHERE order_id = $1 ORDER BY recorded_at DESC, seq DESC LIMIT 1",
      HISTORY_COLUMNS
    );
    sqlx::query_as::<_, HistoryRow>(&sql)
      .bind(order_id)
      .fetch_optional(&mut **tx)
      .await
      .map_err(backend)?
      .map(|row| row.into_domain(self.catalog))
      .transpose()
  }

  async fn identical_entry(
    &self,
    tx: &mut Tx<'_>,
    entry: &NewHistoryEntry,
  ) -> Result<Option<StatusHistoryEntry>, StoreError> {
    let sql = format!(
      "SELECT {} FROM order_status_history WHERE order_id = $1 AND status_code = $2 AND recorded_at = $3 LIMIT 1",
      HISTORY_COLUMNS
    );
    sqlx::query_as::<_, HistoryRow>(&sql)
      .bind(entry.order_id)
      .bind(self.catalog.code_of(entry.status))
      .bind(entry.recorded_at)
      .fetch_optional(&mut **tx)
      .await
      .map_err(backend)?
      .map(|row| row.into_domain(self.catalog))
      .transpose()
  }
}

#[async_trait]
impl OrderStore for PgOrderStore {
  async fn order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
    let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
    sqlx::query_as::<_, OrderRow>(&sql)
      .bind(order_id)
      .fetch_optional(&self.pool)
      .await
      .map_err(backend)?
      .map(|row| row.into_domain(self.catalog))
      .transpose()
  }

  async fn order_by_code(&self, code: &str) -> Result<Option<Order>, StoreError> {
    let sql = format!("SELECT {} FROM orders WHERE code = $1", ORDER_COLUMNS);
    sqlx::query_as::<_, OrderRow>(&sql)
      .bind(code)
      .fetch_optional(&self.pool)
      .await
      .map_err(backend)?
      .map(|row| row.into_domain(self.catalog))
      .transpose()
  }

  async fn payment_for_order(&self, order_id: Uuid) -> Result<Option<Payment>, StoreError> {
    let sql = format!("SELECT {} FROM payments WHERE order_id = $1", PAYMENT_COLUMNS);
    sqlx::query_as::<_, PaymentRow>(&sql)
      .bind(order_id)
      .fetch_optional(&self.pool)
      .await
      .map_err(backend)?
      .map(PaymentRow::into_domain)
      .transpose()
  }

  async fn voucher_by_code(&self, code: &str) -> Result<Option<Voucher>, StoreError> {
    let sql = format!("SELECT {} FROM vouchers WHERE code = $1", VOUCHER_COLUMNS);
    sqlx::query_as::<_, VoucherRow>(&sql)
      .bind(Voucher::normalize_code(code))
      .fetch_optional(&self.pool)
      .await
      .map_err(backend)?
      .map(VoucherRow::into_domain)
      .transpose()
  }

  async fn voucher(&self, voucher_id: Uuid) -> Result<Option<Voucher>, StoreError> {
    let sql = format!("SELECT {} FROM vouchers WHERE id = $1", VOUCHER_COLUMNS);
    sqlx::query_as::<_, VoucherRow>(&sql)
      .bind(voucher_id)
      .fetch_optional(&self.pool)
      .await
      .map_err(backend)?
      .map(VoucherRow::into_domain)
      .transpose()
  }

  #[instrument(name = "PgOrderStore::insert_voucher", level = "debug", skip_all, fields(voucher_code = %voucher.code))]
  async fn insert_voucher(&self, voucher: Voucher) -> Result<Voucher, StoreError> {
    let code = Voucher::normalize_code(&voucher.code);
    let sql = format!(
      "INSERT INTO vouchers ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {cols}",
      cols = VOUCHER_COLUMNS
    );
    sqlx::query_as::<_, VoucherRow>(&sql)
      .bind(voucher.id)
      .bind(&code)
      .bind(voucher.discount.kind())
      .bind(voucher.discount.value())
      .bind(voucher.starts_at)
      .bind(voucher.ends_at)
      .bind(voucher.min_order_cents)
      .bind(voucher.usage_cap.map(count_to_i32))
      .bind(count_to_i32(voucher.usage_count))
      .bind(voucher.per_user_cap.map(count_to_i32))
      .bind(voucher.active)
      .fetch_one(&self.pool)
      .await
      .map_err(|e| match unique_violation(&e).as_deref() {
        Some(VOUCHER_CODE_KEY) => StoreError::DuplicateVoucherCode(code.clone()),
        _ => backend(e),
      })?
      .into_domain()
  }

  async fn redemption_count(&self, user_id: Uuid, voucher_id: Uuid) -> Result<u32, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM voucher_redemptions WHERE user_id = $1 AND voucher_id = $2")
      .bind(user_id)
      .bind(voucher_id)
      .fetch_one(&self.pool)
      .await
      .map_err(backend)?;
    u32::try_from(count).map_err(|_| StoreError::Corrupt(format!("redemption count {} out of range", count)))
  }

  #[instrument(name = "PgOrderStore::redeem", level = "debug", skip_all, fields(voucher_id = %claim.redemption.voucher_id))]
  async fn redeem(&self, claim: RedemptionClaim) -> Result<VoucherRedemption, StoreError> {
    let mut tx = self.begin().await?;
    let redemption = self.claim_in(&mut tx, claim).await?;
    tx.commit().await.map_err(backend)?;
    debug!(redemption_id = %redemption.id, use_number = redemption.use_number, "redemption committed");
    Ok(redemption)
  }

  #[instrument(name = "PgOrderStore::create_checkout", level = "debug", skip_all, fields(order_code = %draft.order.code))]
  async fn create_checkout(&self, draft: CheckoutDraft) -> Result<CheckoutRecord, StoreError> {
    let mut tx = self.begin().await?;
    let order = draft.order;
    let (destination_kind, destination_id) = destination_columns(&order.destination);

    let sql = format!(
      "INSERT INTO orders ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
       RETURNING {cols}",
      cols = ORDER_COLUMNS
    );
    let stored = sqlx::query_as::<_, OrderRow>(&sql)
      .bind(order.id)
      .bind(&order.code)
      .bind(order.customer_id)
      .bind(self.catalog.code_of(order.status))
      .bind(order.totals.subtotal_cents())
      .bind(order.totals.shipping_fee_cents())
      .bind(order.totals.discount_cents())
      .bind(order.totals.total_cents())
      .bind(order.delivery_method.as_str())
      .bind(destination_kind)
      .bind(destination_id)
      .bind(order.payment_method.as_str())
      .bind(order.voucher_id)
      .bind(order.version)
      .bind(order.created_at)
      .bind(order.updated_at)
      .fetch_one(&mut *tx)
      .await
      .map_err(|e| match unique_violation(&e).as_deref() {
        Some(ORDER_CODE_KEY) => StoreError::DuplicateOrderCode(order.code.clone()),
        _ => backend(e),
      })?
      .into_domain(self.catalog)?;

    self.insert_entry(&mut tx, draft.initial_entry).await?;

    if let Some(payment) = &draft.payment {
      sqlx::query(
        "INSERT INTO payments (id, order_id, status, amount_cents, transaction_ref, settled_at, notes, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
      )
      .bind(payment.id)
      .bind(payment.order_id)
      .bind(payment.status.as_str())
      .bind(payment.amount_cents)
      .bind(payment.transaction_ref.as_deref())
      .bind(payment.settled_at)
      .bind(payment.notes.as_deref())
      .bind(payment.created_at)
      .execute(&mut *tx)
      .await
      .map_err(backend)?;
    }

    let redemption = match draft.redemption {
      Some(claim) => Some(self.claim_in(&mut tx, claim).await?),
      None => None,
    };

    tx.commit().await.map_err(backend)?;
    Ok(CheckoutRecord {
      order: stored,
      payment: draft.payment,
      redemption,
    })
  }

  #[instrument(name = "PgOrderStore::apply_status_change", level = "debug", skip_all, fields(order_id = %change.order_id, to = %change.to))]
  async fn apply_status_change(&self, change: StatusChange) -> Result<Order, StoreError> {
    let mut tx = self.begin().await?;
    let order = self.apply_change_in(&mut tx, change).await?;
    tx.commit().await.map_err(backend)?;
    Ok(order)
  }

  #[instrument(name = "PgOrderStore::settle_payment", level = "debug", skip_all, fields(payment_id = %write.payment_id))]
  async fn settle_payment(&self, write: SettlementWrite) -> Result<SettledPayment, StoreError> {
    let mut tx = self.begin().await?;

    let sql = format!(
      "SELECT {} FROM payments WHERE id = $1 AND order_id = $2 FOR UPDATE",
      PAYMENT_COLUMNS
    );
    let payment = sqlx::query_as::<_, PaymentRow>(&sql)
      .bind(write.payment_id)
      .bind(write.order_id)
      .fetch_optional(&mut *tx)
      .await
      .map_err(backend)?
      .ok_or(StoreError::PaymentNotFound(write.payment_id))?
      .into_domain()?;
    if payment.status.is_terminal() {
      return Err(StoreError::PaymentAlreadySettled {
        payment_id: payment.id,
        status: payment.status,
      });
    }

    let order = match write.order_change {
      Some(change) => self.apply_change_in(&mut tx, change).await?,
      None => self.lock_order(&mut tx, write.order_id).await?,
    };

    let sql = format!(
      "UPDATE payments SET status = $2, transaction_ref = $3, settled_at = $4, notes = $5 WHERE id = $1 RETURNING {}",
      PAYMENT_COLUMNS
    );
    let payment = sqlx::query_as::<_, PaymentRow>(&sql)
      .bind(write.payment_id)
      .bind(write.status.as_str())
      .bind(write.transaction_ref.as_deref())
      .bind(write.settled_at)
      .bind(write.notes.as_deref())
      .fetch_one(&mut *tx)
      .await
      .map_err(backend)?
      .into_domain()?;

    tx.commit().await.map_err(backend)?;
    Ok(SettledPayment { payment, order })
  }

  #[instrument(name = "PgOrderStore::append_history", level = "debug", skip_all, fields(order_id = %entry.order_id))]
  async fn append_history(&self, entry: NewHistoryEntry) -> Result<AppendOutcome, StoreError> {
    let mut tx = self.begin().await?;
    // serialises appends per order
    self.lock_order(&mut tx, entry.order_id).await?;

    let duplicate = match entry.kind {
      EntryKind::Transition => self
        .latest_entry(&mut tx, entry.order_id)
        .await?
        .filter(|latest| latest.status == entry.status),
      EntryKind::Backfill => self.identical_entry(&mut tx, &entry).await?,
    };
    if let Some(existing) = duplicate {
      return Ok(AppendOutcome::Suppressed(existing));
    }

    let stored = self.insert_entry(&mut tx, entry).await?;
    tx.commit().await.map_err(backend)?;
    Ok(AppendOutcome::Appended(stored))
  }

  async fn history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, StoreError> {
    let sql = format!(
      "SELECT {} FROM order_status_history WHERE order_id = $1 ORDER BY recorded_at, seq",
      HISTORY_COLUMNS
    );
    sqlx::query_as::<_, HistoryRow>(&sql)
      .bind(order_id)
      .fetch_all(&self.pool)
      .await
      .map_err(backend)?
      .into_iter()
      .map(|row| row.into_domain(self.catalog))
      .collect()
  }
}
