//! Purchase orchestrator (component P): the state machine coordinating a
//! marketplace purchase across the ledger, fee calculator, treasury-adjacent
//! fee-split, and royalty cascade.
//!
//! Transitions are validated against the fixed adjacency table in
//! spec.md §4.7 before they're written; nothing writes a `Purchase` row
//! through any other path.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::config::FeeConfig;
use crate::error::{CoreError, CoreResult, InsufficientFundsScope};
use crate::fee_split::{FeeSplitEngine, PLATFORM_ACCOUNT};
use crate::fees::calculate_fee;
use crate::ledger::{LedgerEntryKind, LedgerService, NewLedgerEntry};
use crate::metadata::Metadata;
use crate::royalty::RoyaltyEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum PurchaseStatus {
    Created,
    Paid,
    Settled,
    Fulfilled,
    Failed,
    Refunded,
}

impl PurchaseStatus {
    /// The fixed adjacency table from spec.md §4.7. `Failed` is reachable
    /// from `Created` or `Paid`; `Refunded` only from `Fulfilled`.
    fn can_transition_to(self, to: PurchaseStatus) -> bool {
        use PurchaseStatus::*;
        matches!(
            (self, to),
            (Created, Paid)
                | (Paid, Settled)
                | (Settled, Fulfilled)
                | (Created, Failed)
                | (Paid, Failed)
                | (Fulfilled, Refunded)
        )
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Purchase {
    pub id: Uuid,
    pub buyer: String,
    pub seller: String,
    pub listing_content_hash: String,
    pub amount_cents: i64,
    pub status: PurchaseStatus,
    pub settlement_batch_id: Option<String>,
    pub license_id: Option<Uuid>,
    pub fee_cents: i64,
    pub seller_net_cents: i64,
    pub total_royalties_cents: i64,
    pub royalty_details: Value,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PurchaseStatusHistoryRow {
    pub id: Uuid,
    pub purchase_id: Uuid,
    pub from_status: Option<PurchaseStatus>,
    pub to_status: PurchaseStatus,
    pub reason: Option<String>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ListingRow {
    content_hash: String,
    seller: String,
    price_cents: i64,
    license_type: String,
    status: String,
}

pub struct PurchaseOrchestrator {
    pool: PgPool,
    fees: FeeConfig,
    royalty: RoyaltyEngine,
    fee_split: FeeSplitEngine,
}

impl PurchaseOrchestrator {
    pub fn new(
        pool: PgPool,
        fees: FeeConfig,
        royalty: RoyaltyEngine,
        fee_split: FeeSplitEngine,
    ) -> Self {
        PurchaseOrchestrator {
            pool,
            fees,
            royalty,
            fee_split,
        }
    }

    /// Runs the full marketplace-purchase sequence (spec.md §4.7). Any
    /// failure rolls back the outer transaction (nothing committed) and then
    /// writes a standalone `Failed` purchase row with the captured reason —
    /// the Created/Paid rows that would have preceded it never existed, so
    /// there's nothing to roll forward from.
    pub async fn purchase(&self, buyer: &str, content_hash: &str) -> CoreResult<Purchase> {
        match self.try_purchase(buyer, content_hash).await {
            Ok(purchase) => Ok(purchase),
            Err(err) => {
                self.record_failure(buyer, content_hash, &err.to_string())
                    .await?;
                Err(err)
            }
        }
    }

    async fn try_purchase(&self, buyer: &str, content_hash: &str) -> CoreResult<Purchase> {
        let mut tx = crate::db::begin_serializable(&self.pool).await?;

        let listing = fetch_listing_locked(&mut tx, content_hash).await?;
        if listing.status != "active" {
            return Err(CoreError::Validation("listing is not active".into()));
        }
        if listing.seller == buyer {
            return Err(CoreError::CannotBuyOwnListing);
        }
        if listing.license_type == "exclusive" {
            ensure_no_existing_license(&mut tx, buyer, content_hash).await?;
        }

        let buyer_balance = account_balance_in_tx(&mut tx, buyer).await?;
        if buyer_balance < listing.price_cents {
            return Err(CoreError::InsufficientFunds {
                scope: InsufficientFundsScope::Account,
                available: buyer_balance,
                required: listing.price_cents,
            });
        }

        let breakdown = calculate_fee(&self.fees, LedgerEntryKind::MarketplacePurchase, listing.price_cents);
        let remaining_after_fee = listing.price_cents - breakdown.fee_cents;

        let payouts = self
            .royalty
            .compute_payouts(content_hash, remaining_after_fee, buyer, &listing.seller)
            .await?;
        let total_royalties: i64 = payouts.iter().map(|(_, _, amount)| amount).sum();
        let seller_net = remaining_after_fee - total_royalties;
        if seller_net < 0 {
            return Err(CoreError::InvariantViolation(
                "royalty total exceeds amount remaining after fee".into(),
            ));
        }

        let purchase_id = Uuid::new_v4();
        let royalty_details = serde_json::to_value(
            payouts
                .iter()
                .map(|(creator, gen, amount)| {
                    serde_json::json!({ "creator_id": creator, "generation": gen, "amount_cents": amount })
                })
                .collect::<Vec<_>>(),
        )
        .unwrap_or(Value::Null);

        insert_purchase(
            &mut tx,
            purchase_id,
            buyer,
            &listing.seller,
            content_hash,
            listing.price_cents,
            breakdown.fee_cents,
            seller_net,
            total_royalties,
            &royalty_details,
        )
        .await?;
        append_history(&mut tx, purchase_id, None, PurchaseStatus::Created, "purchase intent accepted", "system").await?;

        let ref_id = format!("purchase:{purchase_id}");
        let mut entries = vec![NewLedgerEntry::new(
            LedgerEntryKind::MarketplacePurchase,
            Some(buyer.to_string()),
            Some(PLATFORM_ACCOUNT.to_string()),
            listing.price_cents,
            breakdown.fee_cents,
        )
        .with_ref_id(ref_id.clone())
        .with_metadata(Metadata::new().role("marketplace_purchase").with("purchase_id", purchase_id.to_string()))];

        if seller_net > 0 {
            entries.push(
                NewLedgerEntry::new(
                    LedgerEntryKind::MarketplacePurchase,
                    Some(PLATFORM_ACCOUNT.to_string()),
                    Some(listing.seller.clone()),
                    seller_net,
                    0,
                )
                .with_metadata(Metadata::new().role("seller_settlement").with("purchase_id", purchase_id.to_string())),
            );
        }

        let ledger_ids = LedgerService::record_batch_in_tx(&mut tx, entries).await?;
        let batch_id = ledger_ids
            .first()
            .map(|id| id.to_string())
            .unwrap_or_default();

        transition(&mut tx, purchase_id, PurchaseStatus::Created, PurchaseStatus::Paid, "buyer debited", "system").await?;

        if !payouts.is_empty() {
            RoyaltyEngine::emit_payouts(&mut tx, &ref_id, PLATFORM_ACCOUNT, &payouts).await?;
        }
        transition(&mut tx, purchase_id, PurchaseStatus::Paid, PurchaseStatus::Settled, "royalties and seller settlement applied", "system").await?;

        let license_id = Uuid::new_v4();
        insert_license(&mut tx, license_id, buyer, content_hash).await?;
        bump_listing_counters(&mut tx, content_hash, listing.price_cents).await?;
        set_purchase_license(&mut tx, purchase_id, license_id, &batch_id).await?;
        transition(&mut tx, purchase_id, PurchaseStatus::Settled, PurchaseStatus::Fulfilled, "license granted", "system").await?;

        // Still inside the outer transaction, per §4.7 step 4: the fee-split
        // transfers are synthesized from the platform account but don't
        // touch any external system, so they're safe to run here.
        self.fee_split.split(&ref_id, breakdown.fee_cents).await.ok();

        let purchase = fetch_purchase(&mut tx, purchase_id).await?;
        tx.commit().await?;
        Ok(purchase)
    }

    async fn record_failure(&self, buyer: &str, content_hash: &str, reason: &str) -> CoreResult<()> {
        let mut tx = crate::db::begin_serializable(&self.pool).await?;
        let purchase_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO purchases
                (id, buyer, seller, listing_content_hash, amount_cents, status,
                 fee_cents, seller_net_cents, total_royalties_cents, royalty_details,
                 retry_count, created_at, updated_at)
            VALUES ($1, $2, '', $3, 0, 'failed', 0, 0, 0, '[]'::jsonb, 0, now(), now())
            "#,
        )
        .bind(purchase_id)
        .bind(buyer)
        .bind(content_hash)
        .execute(&mut *tx)
        .await?;
        append_history(&mut tx, purchase_id, None, PurchaseStatus::Failed, reason, "system").await?;
        tx.commit().await?;
        Ok(())
    }

    /// Admin-initiated reversal, only reachable from `Fulfilled`. Writes new
    /// `Reversal` ledger entries rather than mutating the original rows.
    pub async fn refund(&self, purchase_id: Uuid, actor: &str, reason: &str) -> CoreResult<Purchase> {
        let mut tx = crate::db::begin_serializable(&self.pool).await?;
        let purchase = fetch_purchase(&mut tx, purchase_id).await?;
        if purchase.status != PurchaseStatus::Fulfilled {
            return Err(CoreError::Conflict("only fulfilled purchases can be refunded".into()));
        }

        let entries = vec![NewLedgerEntry::new(
            LedgerEntryKind::Reversal,
            Some(purchase.seller.clone()),
            Some(purchase.buyer.clone()),
            purchase.amount_cents,
            0,
        )
        .with_metadata(Metadata::new().role("refund").with("purchase_id", purchase_id.to_string()))];
        LedgerService::record_batch_in_tx(&mut tx, entries).await?;

        transition(&mut tx, purchase_id, PurchaseStatus::Fulfilled, PurchaseStatus::Refunded, reason, actor).await?;
        let updated = fetch_purchase(&mut tx, purchase_id).await?;
        tx.commit().await?;
        Ok(updated)
    }
}

async fn fetch_listing_locked(tx: &mut Transaction<'_, Postgres>, content_hash: &str) -> CoreResult<ListingRow> {
    sqlx::query_as::<_, ListingRow>(
        "SELECT content_hash, seller, price_cents, license_type, status FROM listings WHERE content_hash = $1 FOR UPDATE",
    )
    .bind(content_hash)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::RowNotFound => CoreError::Validation("listing not found".into()),
        other => CoreError::from(other),
    })
}

async fn ensure_no_existing_license(tx: &mut Transaction<'_, Postgres>, buyer: &str, content_hash: &str) -> CoreResult<()> {
    let count: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM licenses WHERE buyer = $1 AND content_hash = $2",
    )
    .bind(buyer)
    .bind(content_hash)
    .fetch_one(&mut **tx)
    .await?;
    if count > 0 {
        return Err(CoreError::Conflict("buyer already holds a license for this content".into()));
    }
    Ok(())
}

async fn account_balance_in_tx(tx: &mut Transaction<'_, Postgres>, account: &str) -> CoreResult<i64> {
    let row: (Option<i64>, Option<i64>) = sqlx::query_as(
        r#"
        SELECT
            (SELECT COALESCE(SUM(net_cents), 0) FROM ledger_entries WHERE to_account = $1 AND status = 'complete'),
            (SELECT COALESCE(SUM(amount_cents), 0) FROM ledger_entries WHERE from_account = $1 AND status = 'complete')
        "#,
    )
    .bind(account)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.0.unwrap_or(0) - row.1.unwrap_or(0))
}

#[allow(clippy::too_many_arguments)]
async fn insert_purchase(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    buyer: &str,
    seller: &str,
    content_hash: &str,
    amount_cents: i64,
    fee_cents: i64,
    seller_net_cents: i64,
    total_royalties_cents: i64,
    royalty_details: &Value,
) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO purchases
            (id, buyer, seller, listing_content_hash, amount_cents, status,
             fee_cents, seller_net_cents, total_royalties_cents, royalty_details,
             retry_count, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, 'created', $6, $7, $8, $9, 0, now(), now())
        "#,
    )
    .bind(id)
    .bind(buyer)
    .bind(seller)
    .bind(content_hash)
    .bind(amount_cents)
    .bind(fee_cents)
    .bind(seller_net_cents)
    .bind(total_royalties_cents)
    .bind(royalty_details)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn fetch_purchase(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> CoreResult<Purchase> {
    sqlx::query_as::<_, Purchase>("SELECT * FROM purchases WHERE id = $1")
        .bind(id)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::from)
}

async fn append_history(
    tx: &mut Transaction<'_, Postgres>,
    purchase_id: Uuid,
    from_status: Option<PurchaseStatus>,
    to_status: PurchaseStatus,
    reason: &str,
    actor: &str,
) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO purchase_status_history (id, purchase_id, from_status, to_status, reason, actor, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, now())
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(purchase_id)
    .bind(from_status)
    .bind(to_status)
    .bind(reason)
    .bind(actor)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn transition(
    tx: &mut Transaction<'_, Postgres>,
    purchase_id: Uuid,
    from: PurchaseStatus,
    to: PurchaseStatus,
    reason: &str,
    actor: &str,
) -> CoreResult<()> {
    if !from.can_transition_to(to) {
        return Err(CoreError::InvariantViolation(format!(
            "illegal purchase transition {from:?} -> {to:?}"
        )));
    }
    sqlx::query("UPDATE purchases SET status = $1, updated_at = now() WHERE id = $2")
        .bind(to)
        .bind(purchase_id)
        .execute(&mut **tx)
        .await?;
    append_history(tx, purchase_id, Some(from), to, reason, actor).await
}

async fn insert_license(tx: &mut Transaction<'_, Postgres>, id: Uuid, buyer: &str, content_hash: &str) -> CoreResult<()> {
    sqlx::query("INSERT INTO licenses (id, buyer, content_hash, granted_at) VALUES ($1, $2, $3, now())")
        .bind(id)
        .bind(buyer)
        .bind(content_hash)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint().is_some() {
                    return CoreError::Conflict("license already granted".into());
                }
            }
            CoreError::from(e)
        })?;
    Ok(())
}

async fn bump_listing_counters(tx: &mut Transaction<'_, Postgres>, content_hash: &str, price_cents: i64) -> CoreResult<()> {
    sqlx::query(
        "UPDATE listings SET purchase_count = purchase_count + 1, total_revenue_cents = total_revenue_cents + $1 WHERE content_hash = $2",
    )
    .bind(price_cents)
    .bind(content_hash)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn set_purchase_license(
    tx: &mut Transaction<'_, Postgres>,
    purchase_id: Uuid,
    license_id: Uuid,
    settlement_batch_id: &str,
) -> CoreResult<()> {
    sqlx::query("UPDATE purchases SET license_id = $1, settlement_batch_id = $2 WHERE id = $3")
        .bind(license_id)
        .bind(settlement_batch_id)
        .bind(purchase_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_can_only_advance_to_paid_or_failed() {
        assert!(PurchaseStatus::Created.can_transition_to(PurchaseStatus::Paid));
        assert!(PurchaseStatus::Created.can_transition_to(PurchaseStatus::Failed));
        assert!(!PurchaseStatus::Created.can_transition_to(PurchaseStatus::Settled));
        assert!(!PurchaseStatus::Created.can_transition_to(PurchaseStatus::Fulfilled));
    }

    #[test]
    fn refund_is_only_reachable_from_fulfilled() {
        assert!(PurchaseStatus::Fulfilled.can_transition_to(PurchaseStatus::Refunded));
        assert!(!PurchaseStatus::Settled.can_transition_to(PurchaseStatus::Refunded));
        assert!(!PurchaseStatus::Paid.can_transition_to(PurchaseStatus::Refunded));
    }

    #[test]
    fn there_is_no_path_back_from_a_terminal_state() {
        assert!(!PurchaseStatus::Failed.can_transition_to(PurchaseStatus::Created));
        assert!(!PurchaseStatus::Refunded.can_transition_to(PurchaseStatus::Fulfilled));
    }
}
