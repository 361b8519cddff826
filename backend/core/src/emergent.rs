//! Emergent-entity dual-wallet sub-ledger (component E).
//!
//! Each emergent entity owns two logical accounts, `emergent_op:<id>` and
//! `emergent_res:<id>`. Funds in either are ring-fenced from fiat exit: the
//! check is defensive (re-checked at the withdrawal gate in `withdrawal.rs`)
//! and constitutional (`can_withdraw_to_fiat` always returns `false` here,
//! independent of caller behaviour).

use sqlx::{PgPool, Postgres, Transaction};

use crate::config::FeeConfig;
use crate::error::{CoreError, CoreResult, InsufficientFundsScope};
use crate::fees::calculate_fee;
use crate::ledger::{LedgerEntryKind, LedgerService, NewLedgerEntry};
use crate::metadata::Metadata;

pub const OPERATING_PREFIX: &str = "emergent_op:";
pub const RESERVE_PREFIX: &str = "emergent_res:";

pub fn operating_account(emergent_id: &str) -> String {
    format!("{OPERATING_PREFIX}{emergent_id}")
}

pub fn reserve_account(emergent_id: &str) -> String {
    format!("{RESERVE_PREFIX}{emergent_id}")
}

/// True for any account beginning with either emergent prefix.
pub fn is_emergent_account(account: &str) -> bool {
    account.starts_with(OPERATING_PREFIX) || account.starts_with(RESERVE_PREFIX)
}

/// Constitutional check: emergent funds can never settle to fiat, regardless
/// of balance, status, or caller. Always `false`.
pub fn can_withdraw_to_fiat(_account: &str) -> bool {
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum EmergentAccountStatus {
    Active,
    Suspended,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmergentAccount {
    pub emergent_id: String,
    pub display_name: String,
    pub operating_balance_cents: i64,
    pub reserve_balance_cents: i64,
    pub seed_amount_cents: i64,
    pub total_earned_cents: i64,
    pub total_spent_cents: i64,
    pub status: EmergentAccountStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub operating_drift_cents: i64,
    pub reserve_drift_cents: i64,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.operating_drift_cents == 0 && self.reserve_drift_cents == 0
    }
}

pub struct EmergentLedger {
    pool: PgPool,
    fees: FeeConfig,
}

impl EmergentLedger {
    pub fn new(pool: PgPool, fees: FeeConfig) -> Self {
        EmergentLedger { pool, fees }
    }

    pub async fn create(&self, emergent_id: &str, display_name: &str, seed_amount_cents: i64) -> CoreResult<EmergentAccount> {
        if seed_amount_cents < 0 {
            return Err(CoreError::Validation("seed_amount_cents must be >= 0".into()));
        }
        let mut tx = crate::db::begin_serializable(&self.pool).await?;

        if seed_amount_cents > 0 {
            let entries = vec![NewLedgerEntry::new(
                LedgerEntryKind::EmergentTransfer,
                None,
                Some(operating_account(emergent_id)),
                seed_amount_cents,
                0,
            )
            .with_metadata(Metadata::new().role("emergent_seed"))];
            LedgerService::record_batch_in_tx(&mut tx, entries).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO emergent_accounts
                (emergent_id, display_name, operating_balance_cents, reserve_balance_cents,
                 seed_amount_cents, total_earned_cents, total_spent_cents, status)
            VALUES ($1, $2, $3, 0, $3, 0, 0, 'active')
            "#,
        )
        .bind(emergent_id)
        .bind(display_name)
        .bind(seed_amount_cents)
        .execute(&mut *tx)
        .await?;

        let account = fetch_account(&mut tx, emergent_id).await?;
        tx.commit().await?;
        Ok(account)
    }

    /// Operating -> reserve transfer, subject to the universal fee: operating
    /// is debited `amount`, reserve is credited `net`, the fee flows to the
    /// platform account for later fee-split.
    pub async fn move_to_reserve(&self, emergent_id: &str, amount_cents: i64) -> CoreResult<EmergentAccount> {
        if amount_cents <= 0 {
            return Err(CoreError::Validation("amount_cents must be > 0".into()));
        }
        let mut tx = crate::db::begin_serializable(&self.pool).await?;

        let operating = operating_account(emergent_id);
        let reserve = reserve_account(emergent_id);
        let balance = account_balance_in_tx(&mut tx, &operating).await?;
        if balance < amount_cents {
            return Err(CoreError::InsufficientFunds {
                scope: InsufficientFundsScope::Operating,
                available: balance,
                required: amount_cents,
            });
        }

        let breakdown = calculate_fee(&self.fees, LedgerEntryKind::EmergentTransfer, amount_cents);
        let entries = vec![NewLedgerEntry::new(
            LedgerEntryKind::EmergentTransfer,
            Some(operating.clone()),
            Some(reserve.clone()),
            amount_cents,
            breakdown.fee_cents,
        )
        .with_metadata(Metadata::new().role("operating_to_reserve"))];
        LedgerService::record_batch_in_tx(&mut tx, entries).await?;

        if breakdown.fee_cents > 0 {
            let fee_entry = vec![NewLedgerEntry::new(
                LedgerEntryKind::Fee,
                Some(operating.clone()),
                Some(crate::fee_split::PLATFORM_ACCOUNT.to_string()),
                breakdown.fee_cents,
                0,
            )
            .with_metadata(Metadata::new().role("emergent_transfer_fee"))];
            LedgerService::record_batch_in_tx(&mut tx, fee_entry).await?;
        }

        refresh_cached_balances(&mut tx, emergent_id).await?;
        let account = fetch_account(&mut tx, emergent_id).await?;
        tx.commit().await?;
        Ok(account)
    }

    /// Re-derives `operating_balance_cents`/`reserve_balance_cents` from the
    /// ledger projection and compares them against the cached row. Required
    /// periodically per spec.md §4.8.
    pub async fn check_consistency(&self, emergent_id: &str) -> CoreResult<ConsistencyReport> {
        let cached = sqlx::query_as::<_, EmergentAccount>("SELECT * FROM emergent_accounts WHERE emergent_id = $1")
            .bind(emergent_id)
            .fetch_one(&self.pool)
            .await?;
        let operating_actual = self.balance_of(&operating_account(emergent_id)).await?;
        let reserve_actual = self.balance_of(&reserve_account(emergent_id)).await?;
        Ok(ConsistencyReport {
            operating_drift_cents: operating_actual - cached.operating_balance_cents,
            reserve_drift_cents: reserve_actual - cached.reserve_balance_cents,
        })
    }

    async fn balance_of(&self, account: &str) -> CoreResult<i64> {
        let row: (Option<i64>, Option<i64>) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COALESCE(SUM(net_cents), 0) FROM ledger_entries WHERE to_account = $1 AND status = 'complete'),
                (SELECT COALESCE(SUM(amount_cents), 0) FROM ledger_entries WHERE from_account = $1 AND status = 'complete')
            "#,
        )
        .bind(account)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.unwrap_or(0) - row.1.unwrap_or(0))
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

async fn refresh_cached_balances(tx: &mut Transaction<'_, Postgres>, emergent_id: &str) -> CoreResult<()> {
    let operating = account_balance_in_tx(tx, &operating_account(emergent_id)).await?;
    let reserve = account_balance_in_tx(tx, &reserve_account(emergent_id)).await?;
    sqlx::query(
        "UPDATE emergent_accounts SET operating_balance_cents = $1, reserve_balance_cents = $2 WHERE emergent_id = $3",
    )
    .bind(operating)
    .bind(reserve)
    .bind(emergent_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn fetch_account(tx: &mut Transaction<'_, Postgres>, emergent_id: &str) -> CoreResult<EmergentAccount> {
    sqlx::query_as::<_, EmergentAccount>("SELECT * FROM emergent_accounts WHERE emergent_id = $1")
        .bind(emergent_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_round_trip() {
        assert_eq!(operating_account("agent-1"), "emergent_op:agent-1");
        assert_eq!(reserve_account("agent-1"), "emergent_res:agent-1");
        assert!(is_emergent_account("emergent_op:agent-1"));
        assert!(is_emergent_account("emergent_res:agent-1"));
        assert!(!is_emergent_account("user:42"));
    }

    #[test]
    fn fiat_exit_is_always_refused() {
        assert!(!can_withdraw_to_fiat("emergent_op:agent-1"));
        assert!(!can_withdraw_to_fiat("emergent_res:agent-1"));
        assert!(!can_withdraw_to_fiat("user:42"));
    }

    #[test]
    fn report_is_consistent_only_when_both_drifts_are_zero() {
        let report = ConsistencyReport {
            operating_drift_cents: 0,
            reserve_drift_cents: 0,
        };
        assert!(report.is_consistent());
        let drifted = ConsistencyReport {
            operating_drift_cents: 1,
            reserve_drift_cents: 0,
        };
        assert!(!drifted.is_consistent());
    }
}
