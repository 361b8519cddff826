//! Reconciler (component C): periodic and on-demand drift checks between
//! the expected treasury position (derived purely from the ledger), the
//! singleton `TreasuryState`, and (when available) an external gateway
//! balance.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{self, AuditEventKind};
use crate::config::ReconcilerConfig;
use crate::error::CoreResult;
use crate::treasury::TreasuryService;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReconciliationRun {
    pub id: Uuid,
    pub ledger_expected_cents: i64,
    pub external_balance_cents: Option<i64>,
    pub drift_cents: i64,
    pub alert_flag: bool,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StalePendingEntry {
    pub id: Uuid,
    pub kind: String,
    pub amount_cents: i64,
    pub created_at: DateTime<Utc>,
}

pub struct Reconciler {
    pool: PgPool,
    config: ReconcilerConfig,
    treasury: TreasuryService,
}

impl Reconciler {
    pub fn new(pool: PgPool, config: ReconcilerConfig, treasury: TreasuryService) -> Self {
        Reconciler {
            pool,
            config,
            treasury,
        }
    }

    /// Runs a reconciliation pass. `external_balance_cents` is the gateway's
    /// reported balance, when the caller has one to compare against.
    pub async fn run(&self, external_balance_cents: Option<i64>) -> CoreResult<ReconciliationRun> {
        let expected = self.expected_treasury_usd().await?;
        let state = self.treasury.state().await?;

        let internal_drift = state.total_usd_cents - expected;
        let external_drift = external_balance_cents.map(|ext| state.total_usd_cents - ext);

        let threshold = self.config.drift_alert_threshold_cents;
        let alert = internal_drift.abs() >= threshold
            || external_drift.map(|d| d.abs() >= threshold).unwrap_or(false);

        let details = json!({
            "expected_treasury_usd_cents": expected,
            "treasury_state_usd_cents": state.total_usd_cents,
            "treasury_state_coins_cents": state.total_coins_cents,
            "internal_drift_cents": internal_drift,
            "external_drift_cents": external_drift,
        });

        let id = Uuid::new_v4();
        let drift = external_drift.unwrap_or(internal_drift);
        sqlx::query(
            r#"
            INSERT INTO reconciliation_runs
                (id, ledger_expected_cents, external_balance_cents, drift_cents, alert_flag, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(external_balance_cents)
        .bind(drift)
        .bind(alert)
        .bind(&details)
        .execute(&self.pool)
        .await?;

        if alert {
            let mut tx = crate::db::begin_serializable(&self.pool).await?;
            sqlx::query(
                r#"
                INSERT INTO treasury_events
                    (id, kind, before_total_usd_cents, before_total_coins_cents,
                     after_total_usd_cents, after_total_coins_cents, created_at)
                VALUES ($1, 'drift_alert', $2, $3, $2, $3, now())
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(state.total_usd_cents)
            .bind(state.total_coins_cents)
            .execute(&mut *tx)
            .await?;
            audit::record(&mut *tx, AuditEventKind::TreasuryInvariantViolation, "reconciler", details.clone())
                .await?;
            tx.commit().await?;
        }

        let row: ReconciliationRun = sqlx::query_as("SELECT * FROM reconciliation_runs WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn expected_treasury_usd(&self) -> CoreResult<i64> {
        let row: (Option<i64>, Option<i64>) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COALESCE(SUM(after_total_usd_cents - before_total_usd_cents), 0)
                    FROM treasury_events WHERE kind = 'mint'),
                (SELECT COALESCE(SUM(before_total_usd_cents - after_total_usd_cents), 0)
                    FROM treasury_events WHERE kind = 'burn')
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.unwrap_or(0) - row.1.unwrap_or(0))
    }

    /// Ledger entries still `Pending` older than the grace window implied by
    /// `drift_alert_threshold_cents` staying set; surfaced for an admin
    /// queue, never auto-resolved (per the Open Question on stale Pending
    /// entries).
    pub async fn stale_pending_entries(&self, older_than: DateTime<Utc>) -> CoreResult<Vec<StalePendingEntry>> {
        let rows: Vec<(Uuid, String, i64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, kind, amount_cents, created_at FROM ledger_entries WHERE status = 'pending' AND created_at < $1",
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, kind, amount_cents, created_at)| StalePendingEntry {
                id,
                kind,
                amount_cents,
                created_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_pending_entry_carries_enough_to_triage() {
        let entry = StalePendingEntry {
            id: Uuid::nil(),
            kind: "withdrawal".into(),
            amount_cents: 500,
            created_at: Utc::now(),
        };
        assert_eq!(entry.kind, "withdrawal");
        assert_eq!(entry.amount_cents, 500);
    }
}
