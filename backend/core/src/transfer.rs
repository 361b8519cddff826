//! Peer-to-peer transfer flow: spec.md §8 scenario 1, the simplest
//! end-to-end path through the ledger. No external leg and nothing ever
//! goes `Pending` here, unlike withdrawal.rs — both entries land `Complete`
//! in the same transaction.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::config::FeeConfig;
use crate::error::{CoreError, CoreResult, InsufficientFundsScope};
use crate::fee_split::{FeeSplitEngine, PLATFORM_ACCOUNT};
use crate::fees::calculate_fee;
use crate::ledger::{LedgerEntryKind, LedgerService, NewLedgerEntry};
use crate::metadata::Metadata;

pub struct TransferFlow {
    pool: PgPool,
    fees: FeeConfig,
    fee_split: FeeSplitEngine,
}

#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub transfer_id: Uuid,
    pub amount_cents: i64,
    pub fee_cents: i64,
    pub net_cents: i64,
}

impl TransferFlow {
    pub fn new(pool: PgPool, fees: FeeConfig, fee_split: FeeSplitEngine) -> Self {
        TransferFlow { pool, fees, fee_split }
    }

    /// Debits `from` for `amount_cents` plus the transfer fee, credits `to`
    /// with the net amount, and routes the fee to the platform account —
    /// same fee-collection shape as withdrawal.rs, minus the gateway leg.
    pub async fn transfer(&self, from: &str, to: &str, amount_cents: i64) -> CoreResult<TransferReceipt> {
        if amount_cents <= 0 {
            return Err(CoreError::Validation("amount_cents must be > 0".into()));
        }
        if from == to {
            return Err(CoreError::Validation("cannot transfer to the same account".into()));
        }

        let breakdown = calculate_fee(&self.fees, LedgerEntryKind::Transfer, amount_cents);
        let transfer_id = Uuid::new_v4();
        let ref_id = format!("transfer:{transfer_id}");
        let total_debit = amount_cents + breakdown.fee_cents;

        {
            let mut tx = crate::db::begin_serializable(&self.pool).await?;

            let balance = account_balance_in_tx(&mut tx, from).await?;
            if balance < total_debit {
                return Err(CoreError::InsufficientFunds {
                    scope: InsufficientFundsScope::Account,
                    available: balance,
                    required: total_debit,
                });
            }

            let mut entries = vec![NewLedgerEntry::new(
                LedgerEntryKind::Transfer,
                Some(from.to_string()),
                Some(to.to_string()),
                amount_cents,
                breakdown.fee_cents,
            )
            .with_ref_id(ref_id.clone())
            .with_metadata(Metadata::new().role("transfer").with("transfer_id", transfer_id.to_string()))];

            if breakdown.fee_cents > 0 {
                entries.push(
                    NewLedgerEntry::new(
                        LedgerEntryKind::Fee,
                        Some(from.to_string()),
                        Some(PLATFORM_ACCOUNT.to_string()),
                        breakdown.fee_cents,
                        0,
                    )
                    .with_metadata(Metadata::new().role("transfer_fee").with("transfer_id", transfer_id.to_string())),
                );
            }

            LedgerService::record_batch_in_tx(&mut tx, entries).await?;
            tx.commit().await?;
        }

        if breakdown.fee_cents > 0 {
            self.fee_split.split(&ref_id, breakdown.fee_cents).await.ok();
        }

        Ok(TransferReceipt {
            transfer_id,
            amount_cents,
            fee_cents: breakdown.fee_cents,
            net_cents: breakdown.net_cents,
        })
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::calculate_fee;

    #[test]
    fn scenario_one_arithmetic_matches_spec() {
        // Seed A 100.00, transfer 50.00 A->B: fee 0.73, net 49.27, A debited 50.73.
        let config = FeeConfig::default_schedule();
        let breakdown = calculate_fee(&config, LedgerEntryKind::Transfer, 5_000);
        let total_debit = 5_000 + breakdown.fee_cents;
        assert_eq!(breakdown.fee_cents, 73);
        assert_eq!(breakdown.net_cents, 4_927);
        assert_eq!(total_debit, 5_073);
        assert_eq!(10_000 - total_debit, 4_927);
    }
}
