//! Fee-split engine (component S).
//!
//! For every collected fee, synthesizes three ledger transfers from the
//! platform account to reserves/operating/payroll at 0.80/0.10/0.10.
//! Remainder cents from rounding are allocated to payroll so the three
//! outputs sum exactly to the input. Idempotent per source-transaction-id
//! via a unique index on `fee_distributions.source_transaction_id`.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::config::FeeConfig;
use crate::error::{CoreError, CoreResult};
use crate::fees::round_half_up_millionths;
use crate::ledger::{LedgerEntryKind, LedgerService, NewLedgerEntry};
use crate::metadata::Metadata;

pub const PLATFORM_ACCOUNT: &str = "platform";
pub const RESERVES_ACCOUNT: &str = "reserves";
pub const OPERATING_ACCOUNT: &str = "operating";
pub const PAYROLL_ACCOUNT: &str = "payroll";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitAmounts {
    pub reserves_cents: i64,
    pub operating_cents: i64,
    pub payroll_cents: i64,
}

pub fn compute_split(config: &FeeConfig, total_fee_cents: i64) -> SplitAmounts {
    let reserves = round_half_up_millionths(
        total_fee_cents as i128 * config.split_reserves_millionths as i128,
    );
    let operating = round_half_up_millionths(
        total_fee_cents as i128 * config.split_operating_millionths as i128,
    );
    // Payroll absorbs whatever rounding leaves over so the three outputs
    // always sum exactly to the input, per spec.md §4.5.
    let payroll = total_fee_cents - reserves - operating;
    SplitAmounts {
        reserves_cents: reserves,
        operating_cents: operating,
        payroll_cents: payroll,
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeeDistribution {
    pub id: Uuid,
    pub source_transaction_id: String,
    pub total_fee_cents: i64,
    pub reserves_cents: i64,
    pub operating_cents: i64,
    pub payroll_cents: i64,
}

pub struct FeeSplitEngine {
    pool: PgPool,
    config: FeeConfig,
}

impl FeeSplitEngine {
    pub fn new(pool: PgPool, config: FeeConfig) -> Self {
        FeeSplitEngine { pool, config }
    }

    pub async fn split(
        &self,
        source_transaction_id: &str,
        total_fee_cents: i64,
    ) -> CoreResult<FeeDistribution> {
        if total_fee_cents <= 0 {
            return Err(CoreError::Validation("fee to split must be > 0".into()));
        }

        let mut tx = crate::db::begin_serializable(&self.pool).await?;

        if let Some(existing) = fetch_existing(&mut tx, source_transaction_id).await? {
            tx.commit().await?;
            return Ok(existing);
        }

        let split = compute_split(&self.config, total_fee_cents);

        let entries = vec![
            NewLedgerEntry::new(
                LedgerEntryKind::Fee,
                Some(PLATFORM_ACCOUNT.into()),
                Some(RESERVES_ACCOUNT.into()),
                split.reserves_cents,
                0,
            )
            .with_metadata(Metadata::new().role("fee_split_reserves")),
            NewLedgerEntry::new(
                LedgerEntryKind::Fee,
                Some(PLATFORM_ACCOUNT.into()),
                Some(OPERATING_ACCOUNT.into()),
                split.operating_cents,
                0,
            )
            .with_metadata(Metadata::new().role("fee_split_operating")),
            NewLedgerEntry::new(
                LedgerEntryKind::Fee,
                Some(PLATFORM_ACCOUNT.into()),
                Some(PAYROLL_ACCOUNT.into()),
                split.payroll_cents,
                0,
            )
            .with_metadata(Metadata::new().role("fee_split_payroll")),
        ]
        .into_iter()
        .filter(|e| e.amount_cents > 0)
        .collect();

        LedgerService::record_batch_in_tx(&mut tx, entries).await?;

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO fee_distributions
                (id, source_transaction_id, total_fee_cents, reserves_cents, operating_cents, payroll_cents)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(source_transaction_id)
        .bind(total_fee_cents)
        .bind(split.reserves_cents)
        .bind(split.operating_cents)
        .bind(split.payroll_cents)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(FeeDistribution {
            id,
            source_transaction_id: source_transaction_id.to_string(),
            total_fee_cents,
            reserves_cents: split.reserves_cents,
            operating_cents: split.operating_cents,
            payroll_cents: split.payroll_cents,
        })
    }
}

async fn fetch_existing(
    tx: &mut Transaction<'_, Postgres>,
    source_transaction_id: &str,
) -> CoreResult<Option<FeeDistribution>> {
    sqlx::query_as::<_, FeeDistribution>(
        "SELECT * FROM fee_distributions WHERE source_transaction_id = $1",
    )
    .bind(source_transaction_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(CoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_of_546_matches_spec_scenario_one() {
        let config = FeeConfig::default_schedule();
        let split = compute_split(&config, 73);
        assert_eq!(split.reserves_cents, 58);
        assert_eq!(split.operating_cents, 7);
        assert_eq!(split.payroll_cents, 8);
        assert_eq!(
            split.reserves_cents + split.operating_cents + split.payroll_cents,
            73
        );
    }

    #[test]
    fn split_of_546_matches_spec_scenario_two() {
        let config = FeeConfig::default_schedule();
        let split = compute_split(&config, 546);
        assert_eq!(split.reserves_cents, 437);
        assert_eq!(split.operating_cents, 55);
        assert_eq!(split.payroll_cents, 54);
        assert_eq!(
            split.reserves_cents + split.operating_cents + split.payroll_cents,
            546
        );
    }

    #[test]
    fn split_always_sums_exactly_to_input() {
        let config = FeeConfig::default_schedule();
        for fee in [1, 2, 3, 7, 13, 99, 1_000_003] {
            let split = compute_split(&config, fee);
            assert_eq!(
                split.reserves_cents + split.operating_cents + split.payroll_cents,
                fee
            );
        }
    }
}
