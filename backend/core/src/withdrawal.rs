//! Withdrawal flow (component W) and its mandated ordering rule
//! (spec.md §4.9). This is the only flow where a ledger entry is briefly
//! `Pending`; the step order below exists specifically so a crash between
//! steps 1 and 2 can never pay out fiat without a matching ledger debit.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use serde_json::json;

use crate::audit::{self, AuditEventKind};
use crate::config::FeeConfig;
use crate::emergent::is_emergent_account;
use crate::error::{CoreError, CoreResult, InsufficientFundsScope};
use crate::fee_split::PLATFORM_ACCOUNT;
use crate::fees::calculate_fee;
use crate::ledger::{LedgerEntryKind, LedgerEntryStatus, LedgerService, NewLedgerEntry};
use crate::metadata::Metadata;
use crate::treasury::TreasuryService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Approved,
    Processing,
    Complete,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Withdrawal {
    pub id: Uuid,
    pub account: String,
    pub amount_cents: i64,
    pub status: WithdrawalStatus,
    pub ledger_entry_id: Option<Uuid>,
    pub fee_entry_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller provides the gateway call as a closure so this module stays free
/// of a hard dependency on `concord-gateway`'s concrete transport.
#[async_trait::async_trait]
pub trait PayoutSink: Send + Sync {
    async fn pay_out(&self, account: &str, amount_cents: i64) -> Result<(), String>;
}

pub struct WithdrawalFlow {
    pool: PgPool,
    fees: FeeConfig,
    treasury: TreasuryService,
}

impl WithdrawalFlow {
    pub fn new(pool: PgPool, fees: FeeConfig, treasury: TreasuryService) -> Self {
        WithdrawalFlow { pool, fees, treasury }
    }

    pub async fn withdraw(&self, account: &str, amount_cents: i64, sink: &dyn PayoutSink) -> CoreResult<Withdrawal> {
        if amount_cents <= 0 {
            return Err(CoreError::Validation("amount_cents must be > 0".into()));
        }
        // Non-exit enforcement, re-checked here defensively even though
        // `can_withdraw_to_fiat` would already refuse any emergent caller.
        if is_emergent_account(account) {
            audit::record(
                &self.pool,
                AuditEventKind::EmergentFiatExitAttempt,
                account,
                json!({ "amount_cents": amount_cents }),
            )
            .await?;
            return Err(CoreError::EmergentCannotWithdrawToFiat);
        }

        let withdrawal_id = Uuid::new_v4();
        let breakdown = calculate_fee(&self.fees, LedgerEntryKind::Withdrawal, amount_cents);

        // Step 1: stage Pending ledger entries and mark the withdrawal
        // Processing, all before the external call.
        let (ledger_entry_id, fee_entry_id) = {
            let mut tx = crate::db::begin_serializable(&self.pool).await?;

            let balance = account_balance_in_tx(&mut tx, account).await?;
            if balance < amount_cents {
                return Err(CoreError::InsufficientFunds {
                    scope: InsufficientFundsScope::Account,
                    available: balance,
                    required: amount_cents,
                });
            }

            let mut entries = vec![NewLedgerEntry::new(
                LedgerEntryKind::Withdrawal,
                Some(account.to_string()),
                None,
                amount_cents,
                breakdown.fee_cents,
            )
            .pending()
            .with_metadata(Metadata::new().role("withdrawal").with("withdrawal_id", withdrawal_id.to_string()))];

            if breakdown.fee_cents > 0 {
                entries.push(
                    NewLedgerEntry::new(
                        LedgerEntryKind::Fee,
                        Some(account.to_string()),
                        Some(PLATFORM_ACCOUNT.to_string()),
                        breakdown.fee_cents,
                        0,
                    )
                    .pending()
                    .with_metadata(Metadata::new().role("withdrawal_fee").with("withdrawal_id", withdrawal_id.to_string())),
                );
            }

            let ids = LedgerService::record_batch_in_tx(&mut tx, entries).await?;
            let ledger_entry_id = ids[0];
            let fee_entry_id = ids.get(1).copied();

            insert_withdrawal(
                &mut tx,
                withdrawal_id,
                account,
                amount_cents,
                WithdrawalStatus::Processing,
                ledger_entry_id,
                fee_entry_id,
            )
            .await?;

            tx.commit().await?;
            (ledger_entry_id, fee_entry_id)
        };

        // Step 2: call the external payouts gateway, outside any open
        // transaction — it must never hold a lock across the network call.
        let gateway_result = sink.pay_out(account, breakdown.net_cents).await;

        let mut tx = crate::db::begin_serializable(&self.pool).await?;
        match gateway_result {
            Ok(()) => {
                // Step 3: gateway succeeded — complete the entries and burn
                // coins from the treasury by the net amount.
                flip_status(&mut tx, ledger_entry_id, LedgerEntryStatus::Complete).await?;
                if let Some(fee_id) = fee_entry_id {
                    flip_status(&mut tx, fee_id, LedgerEntryStatus::Complete).await?;
                }
                set_withdrawal_status(&mut tx, withdrawal_id, WithdrawalStatus::Complete).await?;
                tx.commit().await?;

                let circulating = self.treasury.circulating_coins().await?;
                self.treasury.burn(breakdown.net_cents, circulating).await?;
            }
            Err(reason) => {
                // Step 4: gateway failed — reverse the Pending entries and
                // revert the withdrawal to Approved. No burn occurs.
                flip_status(&mut tx, ledger_entry_id, LedgerEntryStatus::Reversed).await?;
                if let Some(fee_id) = fee_entry_id {
                    flip_status(&mut tx, fee_id, LedgerEntryStatus::Reversed).await?;
                }
                set_withdrawal_status(&mut tx, withdrawal_id, WithdrawalStatus::Approved).await?;
                tx.commit().await?;
                return Err(CoreError::ExternalFailure(reason));
            }
        }

        fetch_withdrawal(&self.pool, withdrawal_id).await
    }

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
async fn insert_withdrawal(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    account: &str,
    amount_cents: i64,
    status: WithdrawalStatus,
    ledger_entry_id: Uuid,
    fee_entry_id: Option<Uuid>,
) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO withdrawals
            (id, account, amount_cents, status, ledger_entry_id, fee_entry_id, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, now(), now())
        "#,
    )
    .bind(id)
    .bind(account)
    .bind(amount_cents)
    .bind(status)
    .bind(ledger_entry_id)
    .bind(fee_entry_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn set_withdrawal_status(tx: &mut Transaction<'_, Postgres>, id: Uuid, status: WithdrawalStatus) -> CoreResult<()> {
    sqlx::query("UPDATE withdrawals SET status = $1, updated_at = now() WHERE id = $2")
        .bind(status)
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn flip_status(tx: &mut Transaction<'_, Postgres>, entry_id: Uuid, status: LedgerEntryStatus) -> CoreResult<()> {
    sqlx::query("UPDATE ledger_entries SET status = $1 WHERE id = $2")
        .bind(status)
        .bind(entry_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn fetch_withdrawal(pool: &PgPool, id: Uuid) -> CoreResult<Withdrawal> {
    sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(CoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emergent_accounts_are_rejected_before_any_io() {
        assert!(is_emergent_account("emergent_op:a"));
        assert!(is_emergent_account("emergent_res:a"));
    }
}
