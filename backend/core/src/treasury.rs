//! Treasury service (component T): mint/burn against a singleton record,
//! plus the solvency invariant verifier.
//!
//! Solvency invariant (spec.md §4.4), checked on every mutating write:
//!   1. `total_coins_cents <= total_usd_cents`
//!   2. `total_usd_cents >= circulating_coins`, where `circulating_coins`
//!      is `Σ credits − Σ debits` over the ledger excluding the treasury
//!      account itself.
//!
//! A violation is fatal: it's logged as a `DriftAlert` treasury event and an
//! audit event, and further mints are refused until an operator clears it.

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::audit::{self, AuditEventKind};
use crate::config::TreasuryConfig;
use crate::db;
use crate::error::{CoreError, CoreResult, InsufficientFundsScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TreasuryEventKind {
    Mint,
    Burn,
    DriftAlert,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TreasuryState {
    pub id: String,
    pub total_usd_cents: i64,
    pub total_coins_cents: i64,
    pub last_reconciled: Option<DateTime<Utc>>,
    pub drift_cents: i64,
    pub drift_alert: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TreasuryEvent {
    pub id: Uuid,
    pub kind: TreasuryEventKind,
    pub before_total_usd_cents: i64,
    pub before_total_coins_cents: i64,
    pub after_total_usd_cents: i64,
    pub after_total_coins_cents: i64,
    pub created_at: DateTime<Utc>,
}

pub struct TreasuryService {
    pool: PgPool,
    config: TreasuryConfig,
}

impl TreasuryService {
    pub fn new(pool: PgPool, config: TreasuryConfig) -> Self {
        TreasuryService { pool, config }
    }

    pub async fn state(&self) -> CoreResult<TreasuryState> {
        Self::state_in_tx_conn(&self.pool, &self.config.singleton_id).await
    }

    /// Coins in circulation outside the treasury itself: `Σ net(credits) −
    /// Σ amount(debits)` over every Complete entry not touching
    /// `treasury:main`. Callers pass this into `mint`/`burn` as the
    /// pre-mutation baseline for the solvency check.
    pub async fn circulating_coins(&self) -> CoreResult<i64> {
        let row: (Option<i64>, Option<i64>) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COALESCE(SUM(net_cents), 0) FROM ledger_entries WHERE status = 'complete' AND to_account IS NOT NULL AND to_account != $1),
                (SELECT COALESCE(SUM(amount_cents), 0) FROM ledger_entries WHERE status = 'complete' AND from_account IS NOT NULL AND from_account != $1)
            "#,
        )
        .bind(&self.config.singleton_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.unwrap_or(0) - row.1.unwrap_or(0))
    }

    async fn state_in_tx_conn<'e, E>(exec: E, id: &str) -> CoreResult<TreasuryState>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as::<_, TreasuryState>("SELECT * FROM treasury_state WHERE id = $1")
            .bind(id)
            .fetch_one(exec)
            .await
            .map_err(CoreError::from)
    }

    /// Mints `amount_cents` on a fiat-settled token purchase: both totals
    /// increase by the same amount.
    pub async fn mint(&self, amount_cents: i64, circulating_coins: i64) -> CoreResult<TreasuryState> {
        if amount_cents <= 0 {
            return Err(CoreError::Validation("mint amount must be > 0".into()));
        }
        let mut tx = db::begin_serializable(&self.pool).await?;

        let before = Self::state_in_tx_locked(&mut tx, &self.config.singleton_id).await?;
        if before.drift_alert {
            return Err(CoreError::InvariantViolation(
                "treasury is in drift-alert state; mints are refused until cleared".into(),
            ));
        }

        let after_usd = before.total_usd_cents + amount_cents;
        let after_coins = before.total_coins_cents + amount_cents;
        let after_circulating = circulating_coins + amount_cents;

        if !Self::is_solvent(after_usd, after_coins, after_circulating) {
            tx.rollback().await?;
            self.raise_drift_alert(after_usd, after_coins, after_circulating).await?;
            return Err(CoreError::InvariantViolation(format!(
                "solvency invariant broken: usd={after_usd} coins={after_coins} circulating={after_circulating}"
            )));
        }

        sqlx::query(
            "UPDATE treasury_state SET total_usd_cents = $1, total_coins_cents = $2 WHERE id = $3",
        )
        .bind(after_usd)
        .bind(after_coins)
        .bind(&self.config.singleton_id)
        .execute(&mut *tx)
        .await?;

        record_event(
            &mut tx,
            TreasuryEventKind::Mint,
            &before,
            after_usd,
            after_coins,
        )
        .await?;

        let after = Self::state_in_tx_conn(&mut *tx, &self.config.singleton_id).await?;
        tx.commit().await?;
        Ok(after)
    }

    /// Burns `amount_cents` on a settled withdrawal: both totals decrease by
    /// the same amount. Rejects if coins would go negative.
    pub async fn burn(&self, amount_cents: i64, circulating_coins: i64) -> CoreResult<TreasuryState> {
        if amount_cents <= 0 {
            return Err(CoreError::Validation("burn amount must be > 0".into()));
        }
        let mut tx = db::begin_serializable(&self.pool).await?;

        let before = Self::state_in_tx_locked(&mut tx, &self.config.singleton_id).await?;
        if before.total_coins_cents < amount_cents {
            return Err(CoreError::InsufficientFunds {
                scope: InsufficientFundsScope::Treasury,
                available: before.total_coins_cents,
                required: amount_cents,
            });
        }

        let after_usd = before.total_usd_cents - amount_cents;
        let after_coins = before.total_coins_cents - amount_cents;
        let after_circulating = circulating_coins - amount_cents;

        if !Self::is_solvent(after_usd, after_coins, after_circulating) {
            tx.rollback().await?;
            self.raise_drift_alert(after_usd, after_coins, after_circulating).await?;
            return Err(CoreError::InvariantViolation(format!(
                "solvency invariant broken: usd={after_usd} coins={after_coins} circulating={after_circulating}"
            )));
        }

        sqlx::query(
            "UPDATE treasury_state SET total_usd_cents = $1, total_coins_cents = $2 WHERE id = $3",
        )
        .bind(after_usd)
        .bind(after_coins)
        .bind(&self.config.singleton_id)
        .execute(&mut *tx)
        .await?;

        record_event(
            &mut tx,
            TreasuryEventKind::Burn,
            &before,
            after_usd,
            after_coins,
        )
        .await?;

        let after = Self::state_in_tx_conn(&mut *tx, &self.config.singleton_id).await?;
        tx.commit().await?;
        Ok(after)
    }

    async fn state_in_tx_locked(
        tx: &mut Transaction<'_, Postgres>,
        id: &str,
    ) -> CoreResult<TreasuryState> {
        sqlx::query_as::<_, TreasuryState>(
            "SELECT * FROM treasury_state WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::from)
    }

    fn is_solvent(total_usd_cents: i64, total_coins_cents: i64, circulating_coins: i64) -> bool {
        total_coins_cents <= total_usd_cents && total_usd_cents >= circulating_coins
    }

    /// Persists a solvency violation: sets the singleton's `drift_alert`
    /// flag (refusing further mints), appends a `DriftAlert` treasury
    /// event, and writes the audit trail. Runs in its own transaction,
    /// committed before returning, so the record survives even though the
    /// mutation that triggered it was rolled back by the caller.
    async fn raise_drift_alert(
        &self,
        total_usd_cents: i64,
        total_coins_cents: i64,
        circulating_coins: i64,
    ) -> CoreResult<()> {
        let mut tx = db::begin_serializable(&self.pool).await?;

        sqlx::query("UPDATE treasury_state SET drift_alert = true WHERE id = $1")
            .bind(&self.config.singleton_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO treasury_events
                (id, kind, before_total_usd_cents, before_total_coins_cents,
                 after_total_usd_cents, after_total_coins_cents, created_at)
            VALUES ($1, 'drift_alert', $2, $3, $2, $3, now())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(total_usd_cents)
        .bind(total_coins_cents)
        .execute(&mut *tx)
        .await?;

        audit::record(
            &mut *tx,
            AuditEventKind::TreasuryInvariantViolation,
            "treasury_service",
            json!({
                "total_usd_cents": total_usd_cents,
                "total_coins_cents": total_coins_cents,
                "circulating_coins": circulating_coins,
            }),
        )
        .await?;

        tx.commit().await.map_err(CoreError::from)
    }

    /// Operator action clearing a drift-alert flag after manual resolution.
    /// This is the minimal lever spec.md requires exist but doesn't name.
    pub async fn clear_drift_alert(&self, actor: &str) -> CoreResult<()> {
        let mut tx = db::begin_serializable(&self.pool).await?;
        sqlx::query("UPDATE treasury_state SET drift_alert = false WHERE id = $1")
            .bind(&self.config.singleton_id)
            .execute(&mut *tx)
            .await?;
        audit::record(
            &mut *tx,
            AuditEventKind::DriftAlertCleared,
            actor,
            json!({ "treasury_id": self.config.singleton_id }),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn record_event(
    tx: &mut Transaction<'_, Postgres>,
    kind: TreasuryEventKind,
    before: &TreasuryState,
    after_usd: i64,
    after_coins: i64,
) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO treasury_events
            (id, kind, before_total_usd_cents, before_total_coins_cents,
             after_total_usd_cents, after_total_coins_cents, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, now())
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(kind)
    .bind(before.total_usd_cents)
    .bind(before.total_coins_cents)
    .bind(after_usd)
    .bind(after_coins)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(usd: i64, coins: i64) -> TreasuryState {
        TreasuryState {
            id: "treasury:main".into(),
            total_usd_cents: usd,
            total_coins_cents: coins,
            last_reconciled: None,
            drift_cents: 0,
            drift_alert: false,
        }
    }

    #[test]
    fn solvent_when_coins_le_usd_and_usd_ge_circulating() {
        let s = state(1_000, 900);
        assert!(s.total_coins_cents <= s.total_usd_cents);
        assert!(s.total_usd_cents >= 900);
    }

    #[test]
    fn insolvent_when_coins_exceed_usd() {
        let s = state(900, 1_000);
        assert!(s.total_coins_cents > s.total_usd_cents);
    }

    #[test]
    fn is_solvent_matches_both_halves_of_the_invariant() {
        assert!(TreasuryService::is_solvent(1_000, 900, 900));
        assert!(!TreasuryService::is_solvent(900, 1_000, 1_000));
        assert!(!TreasuryService::is_solvent(1_000, 900, 1_100));
    }
}
