//! Checkout webhook ingestion: mints a 1:1 USD-pegged token on a
//! fiat-settled purchase (spec.md §1 item 1, §4.4) and guards replay via
//! `processed_webhook_events`, per the "idempotent checkout webhook replay"
//! testable scenario in spec.md §8.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::ledger::{LedgerEntryKind, LedgerService, NewLedgerEntry};
use crate::metadata::Metadata;
use crate::treasury::TreasuryService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// First time this `event_id` was seen: the mint and ledger credit ran.
    Credited { ledger_entry_id: Uuid },
    /// `event_id` was already processed; no new mint or ledger write.
    Replayed,
}

pub struct CheckoutService {
    pool: PgPool,
    ledger: LedgerService,
    treasury: TreasuryService,
}

impl CheckoutService {
    pub fn new(pool: PgPool, ledger: LedgerService, treasury: TreasuryService) -> Self {
        CheckoutService { pool, ledger, treasury }
    }

    /// Credits `user` with `amount_cents` worth of token on a settled fiat
    /// checkout. `event_id` is the payment gateway's webhook id: replaying
    /// the same id is a no-op rather than a duplicate mint.
    pub async fn credit_on_webhook(
        &self,
        event_id: &str,
        source: &str,
        user: &str,
        amount_cents: i64,
    ) -> CoreResult<WebhookOutcome> {
        if amount_cents <= 0 {
            return Err(CoreError::Validation("amount_cents must be > 0".into()));
        }

        let mut tx = crate::db::begin_serializable(&self.pool).await?;
        let inserted = sqlx::query(
            "INSERT INTO processed_webhook_events (event_id, source) VALUES ($1, $2) ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event_id)
        .bind(source)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        if inserted.rows_affected() == 0 {
            return Ok(WebhookOutcome::Replayed);
        }

        let entries = vec![NewLedgerEntry::new(
            LedgerEntryKind::TokenPurchase,
            None,
            Some(user.to_string()),
            amount_cents,
            0,
        )
        .with_ref_id(format!("checkout:{event_id}"))
        .with_metadata(Metadata::new().role("checkout").with("event_id", event_id.to_string()))];

        let ids = self.ledger.record_batch(entries).await?;
        let ledger_entry_id = ids[0];

        let circulating = self.treasury.circulating_coins().await?;
        self.treasury.mint(amount_cents, circulating).await?;

        Ok(WebhookOutcome::Credited { ledger_entry_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_are_distinguishable() {
        let credited = WebhookOutcome::Credited {
            ledger_entry_id: Uuid::nil(),
        };
        assert_ne!(credited, WebhookOutcome::Replayed);
    }
}
