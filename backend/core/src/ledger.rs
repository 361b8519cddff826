//! The append-only ledger (component L).
//!
//! Contract: `record_batch`, `get_entries`, `check_ref` — exactly as
//! spec.md §4.1 describes. A batch is a list of entries sharing a generated
//! `batch_id` stamped into each entry's metadata; application is atomic.
//! `ref_id` is the cross-service idempotency key: a replayed ref-id returns
//! the original batch rather than inserting duplicates.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::metadata::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum LedgerEntryKind {
    TokenPurchase,
    Transfer,
    MarketplacePurchase,
    Withdrawal,
    Fee,
    Royalty,
    EmergentTransfer,
    Reversal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum LedgerEntryStatus {
    Pending,
    Complete,
    Reversed,
}

/// A caller-constructed entry awaiting a generated id and timestamp.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub kind: LedgerEntryKind,
    pub from_account: Option<String>,
    pub to_account: Option<String>,
    pub amount_cents: i64,
    pub fee_cents: i64,
    pub net_cents: i64,
    pub status: LedgerEntryStatus,
    pub ref_id: Option<String>,
    pub metadata: Metadata,
    pub request_id: Option<String>,
    pub ip: Option<String>,
}

impl NewLedgerEntry {
    pub fn new(
        kind: LedgerEntryKind,
        from_account: Option<String>,
        to_account: Option<String>,
        amount_cents: i64,
        fee_cents: i64,
    ) -> Self {
        NewLedgerEntry {
            kind,
            from_account,
            to_account,
            amount_cents,
            fee_cents,
            net_cents: amount_cents - fee_cents,
            status: LedgerEntryStatus::Complete,
            ref_id: None,
            metadata: Metadata::new(),
            request_id: None,
            ip: None,
        }
    }

    pub fn pending(mut self) -> Self {
        self.status = LedgerEntryStatus::Pending;
        self
    }

    pub fn with_ref_id(mut self, ref_id: impl Into<String>) -> Self {
        self.ref_id = Some(ref_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    fn validate(&self) -> CoreResult<()> {
        if self.from_account.is_none() && self.to_account.is_none() {
            return Err(CoreError::Validation(
                "ledger entry needs at least one of from/to account".into(),
            ));
        }
        if self.amount_cents <= 0 {
            return Err(CoreError::Validation("amount_cents must be > 0".into()));
        }
        if self.fee_cents < 0 {
            return Err(CoreError::Validation("fee_cents must be >= 0".into()));
        }
        if self.net_cents <= 0 {
            return Err(CoreError::Validation("net_cents must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub kind: LedgerEntryKind,
    pub from_account: Option<String>,
    pub to_account: Option<String>,
    pub amount_cents: i64,
    pub fee_cents: i64,
    pub net_cents: i64,
    pub status: LedgerEntryStatus,
    pub ref_id: Option<String>,
    pub metadata: Value,
    pub request_id: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct EntryFilters {
    pub kind: Option<LedgerEntryKind>,
    pub since: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl EntryFilters {
    pub fn paged(limit: i64, offset: i64) -> Self {
        EntryFilters {
            limit,
            offset,
            ..Default::default()
        }
    }
}

pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

pub struct LedgerService {
    pool: PgPool,
}

impl LedgerService {
    pub fn new(pool: PgPool) -> Self {
        LedgerService { pool }
    }

    /// Writes `entries` atomically, opening its own serializable
    /// transaction. Returns the applied entry ids, or the ids of the
    /// original batch if `ref_id` was already completed (idempotent
    /// replay — not an error).
    pub async fn record_batch(&self, entries: Vec<NewLedgerEntry>) -> CoreResult<Vec<Uuid>> {
        let mut tx = crate::db::begin_serializable(&self.pool).await?;
        let ids = Self::record_batch_in_tx(&mut tx, entries).await?;
        tx.commit().await.map_err(CoreError::from)?;
        Ok(ids)
    }

    /// Same as `record_batch` but participates in a transaction the caller
    /// already holds open (used by the purchase orchestrator, which needs
    /// the ledger batch, license insert, and listing counter bump to commit
    /// or roll back together).
    pub async fn record_batch_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        entries: Vec<NewLedgerEntry>,
    ) -> CoreResult<Vec<Uuid>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        for e in &entries {
            e.validate()?;
        }

        // Idempotency: if any entry in this batch carries a ref_id that was
        // already completed, return the original batch's ids untouched.
        for e in &entries {
            if let Some(ref_id) = &e.ref_id {
                if let Some(existing) = Self::check_ref_in_tx(tx, ref_id).await? {
                    return Ok(existing.into_iter().map(|row| row.id).collect());
                }
            }
        }

        let batch_id = Uuid::new_v4().to_string();
        let mut ids = Vec::with_capacity(entries.len());

        for mut e in entries {
            e.metadata = e.metadata.with("batch_id", batch_id.clone());
            let id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO ledger_entries
                    (id, kind, from_account, to_account, amount_cents, fee_cents,
                     net_cents, status, ref_id, metadata, request_id, ip, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now())
                "#,
            )
            .bind(id)
            .bind(e.kind)
            .bind(&e.from_account)
            .bind(&e.to_account)
            .bind(e.amount_cents)
            .bind(e.fee_cents)
            .bind(e.net_cents)
            .bind(e.status)
            .bind(&e.ref_id)
            .bind(e.metadata.into_json())
            .bind(&e.request_id)
            .bind(&e.ip)
            .execute(&mut **tx)
            .await
            .map_err(|err| map_insert_error(err))?;
            ids.push(id);
        }

        Ok(ids)
    }

    pub async fn check_ref(&self, ref_id: &str) -> CoreResult<Option<Vec<LedgerEntry>>> {
        let rows = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM ledger_entries WHERE ref_id = $1 AND status = 'complete' ORDER BY created_at",
        )
        .bind(ref_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(if rows.is_empty() { None } else { Some(rows) })
    }

    async fn check_ref_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        ref_id: &str,
    ) -> CoreResult<Option<Vec<LedgerEntry>>> {
        let rows = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM ledger_entries WHERE ref_id = $1 AND status = 'complete' ORDER BY created_at",
        )
        .bind(ref_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(if rows.is_empty() { None } else { Some(rows) })
    }

    /// Entries touching `account` either as sender or receiver. Readers
    /// never fail on an empty result set.
    pub async fn get_entries(
        &self,
        account: &str,
        filters: EntryFilters,
    ) -> CoreResult<Page<LedgerEntry>> {
        let limit = if filters.limit <= 0 { 50 } else { filters.limit };
        let offset = filters.offset.max(0);

        let items = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT * FROM ledger_entries
            WHERE (to_account = $1 OR from_account = $1)
              AND ($2::text IS NULL OR kind = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(account)
        .bind(filters.kind.map(kind_to_text))
        .bind(filters.since)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM ledger_entries WHERE to_account = $1 OR from_account = $1",
        )
        .bind(account)
        .fetch_one(&self.pool)
        .await?;

        Ok(Page { items, total })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn kind_to_text(kind: LedgerEntryKind) -> &'static str {
    match kind {
        LedgerEntryKind::TokenPurchase => "token_purchase",
        LedgerEntryKind::Transfer => "transfer",
        LedgerEntryKind::MarketplacePurchase => "marketplace_purchase",
        LedgerEntryKind::Withdrawal => "withdrawal",
        LedgerEntryKind::Fee => "fee",
        LedgerEntryKind::Royalty => "royalty",
        LedgerEntryKind::EmergentTransfer => "emergent_transfer",
        LedgerEntryKind::Reversal => "reversal",
    }
}

fn map_insert_error(err: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.constraint() == Some("ledger_entries_ref_id_key") {
            return CoreError::Conflict("duplicate ref_id".into());
        }
    }
    CoreError::from(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_entry_with_no_endpoints() {
        let entry = NewLedgerEntry::new(LedgerEntryKind::Transfer, None, None, 100, 0);
        assert!(matches!(entry.validate(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn rejects_non_positive_amount() {
        let entry = NewLedgerEntry::new(
            LedgerEntryKind::Transfer,
            Some("a".into()),
            Some("b".into()),
            0,
            0,
        );
        assert!(matches!(entry.validate(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn net_defaults_to_amount_minus_fee() {
        let entry = NewLedgerEntry::new(
            LedgerEntryKind::Transfer,
            Some("a".into()),
            Some("b".into()),
            1000,
            146,
        );
        assert_eq!(entry.net_cents, 854);
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn mint_style_entry_has_only_to_account() {
        let entry = NewLedgerEntry::new(
            LedgerEntryKind::TokenPurchase,
            None,
            Some("user:1".into()),
            500,
            0,
        );
        assert!(entry.validate().is_ok());
    }
}
