//! Royalty cascade (component R).
//!
//! A directed edge `child -> parent` is inserted when a derivative is
//! declared, guarded against cycles and self-edges. Payout computation
//! walks the lineage breadth-first from the purchased content, applies
//! generational decay with a floor, dedups per creator, and skips the
//! buyer/seller on their own transaction.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::config::RoyaltyConfig;
use crate::error::{CoreError, CoreResult};
use crate::fees::round_half_up_millionths;
use crate::ledger::{LedgerEntryKind, LedgerService, NewLedgerEntry};
use crate::metadata::Metadata;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CitationEdge {
    pub child_id: String,
    pub parent_id: String,
    pub generation: i32,
    pub creator_id: String,
    pub parent_creator: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoyaltyPayout {
    pub id: Uuid,
    pub transaction_ref: String,
    pub recipient_creator: String,
    pub generation: i32,
    pub rate_millionths: i64,
    pub amount_cents: i64,
    pub ledger_entry_id: Uuid,
}

/// `rate(g) = max(r0 / 2^g, floor)`, expressed in millionths throughout so
/// callers never touch floating point.
pub fn generational_rate_millionths(config: &RoyaltyConfig, generation: u32) -> u32 {
    let halved = config.initial_rate_millionths >> generation.min(31);
    halved.max(config.floor_rate_millionths)
}

pub struct RoyaltyEngine {
    pool: PgPool,
    config: RoyaltyConfig,
}

#[derive(Debug, Clone)]
struct AncestorHit {
    parent_id: String,
    creator_id: String,
    generation: u32,
}

impl RoyaltyEngine {
    pub fn new(pool: PgPool, config: RoyaltyConfig) -> Self {
        RoyaltyEngine { pool, config }
    }

    /// Declares `child -> parent` after a cycle check: ancestors of the
    /// would-be parent are walked breadth-first; if `child` is reached, the
    /// edge is rejected. Self-edges are rejected outright.
    pub async fn declare_citation(
        &self,
        child_id: &str,
        parent_id: &str,
        creator_id: &str,
        parent_creator: &str,
    ) -> CoreResult<CitationEdge> {
        if child_id == parent_id {
            return Err(CoreError::CitationSelfEdge);
        }

        let mut tx = crate::db::begin_serializable(&self.pool).await?;

        if Self::would_create_cycle(&mut tx, child_id, parent_id, self.config.max_cascade_depth).await? {
            return Err(CoreError::CitationCycleDetected);
        }

        let parent_generation: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MIN(generation), 0) FROM citation_edges WHERE child_id = $1",
        )
        .bind(parent_id)
        .fetch_one(&mut *tx)
        .await?;
        let generation = if parent_generation == 0 && !Self::has_any_parent(&mut tx, parent_id).await? {
            1
        } else {
            parent_generation + 1
        };

        let edge = CitationEdge {
            child_id: child_id.to_string(),
            parent_id: parent_id.to_string(),
            generation,
            creator_id: creator_id.to_string(),
            parent_creator: parent_creator.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO citation_edges (child_id, parent_id, generation, creator_id, parent_creator, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&edge.child_id)
        .bind(&edge.parent_id)
        .bind(edge.generation)
        .bind(&edge.creator_id)
        .bind(&edge.parent_creator)
        .bind(edge.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_duplicate(e))?;

        tx.commit().await?;
        Ok(edge)
    }

    async fn has_any_parent(tx: &mut Transaction<'_, Postgres>, id: &str) -> CoreResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM citation_edges WHERE child_id = $1")
            .bind(id)
            .fetch_one(&mut **tx)
            .await?;
        Ok(count > 0)
    }

    /// Breadth-first traversal of `parent_id`'s ancestors (following
    /// `child -> parent` edges upward); returns true if `child_id` would be
    /// reached, which would make `child_id -> parent_id` a cycle.
    async fn would_create_cycle(
        tx: &mut Transaction<'_, Postgres>,
        child_id: &str,
        parent_id: &str,
        max_depth: u32,
    ) -> CoreResult<bool> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back((parent_id.to_string(), 0u32));
        visited.insert(parent_id.to_string());

        while let Some((current, depth)) = queue.pop_front() {
            if current == child_id {
                return Ok(true);
            }
            if depth >= max_depth {
                continue;
            }
            let parents: Vec<(String,)> =
                sqlx::query_as("SELECT parent_id FROM citation_edges WHERE child_id = $1")
                    .bind(&current)
                    .fetch_all(&mut **tx)
                    .await?;
            for (p,) in parents {
                if visited.insert(p.clone()) {
                    queue.push_back((p, depth + 1));
                }
            }
        }
        Ok(false)
    }

    /// Walks ancestors of `content_id` breadth-first, dedups by creator
    /// (keeping the lowest-generation/highest-rate hit), skips the buyer and
    /// seller, and computes a payout batch for `remaining_after_fees`.
    /// Deterministically ordered by (generation asc, creator_id asc).
    pub async fn compute_payouts(
        &self,
        content_id: &str,
        remaining_after_fees_cents: i64,
        buyer: &str,
        seller: &str,
    ) -> CoreResult<Vec<(String, u32, i64)>> {
        let ancestors = self.ancestor_walk(content_id).await?;

        let mut best_by_creator: HashMap<String, AncestorHit> = HashMap::new();
        for hit in ancestors {
            if hit.creator_id == buyer || hit.creator_id == seller {
                continue;
            }
            best_by_creator
                .entry(hit.creator_id.clone())
                .and_modify(|existing| {
                    if hit.generation < existing.generation {
                        *existing = hit.clone();
                    }
                })
                .or_insert(hit);
        }

        let mut payouts: Vec<(String, u32, i64)> = Vec::new();
        for hit in best_by_creator.into_values() {
            let rate = generational_rate_millionths(&self.config, hit.generation);
            let amount = round_half_up_millionths(
                remaining_after_fees_cents as i128 * rate as i128,
            );
            if amount >= 1 {
                payouts.push((hit.creator_id, hit.generation, amount));
            }
        }

        payouts.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(payouts)
    }

    async fn ancestor_walk(&self, content_id: &str) -> CoreResult<Vec<AncestorHit>> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back((content_id.to_string(), 0u32));
        visited.insert(content_id.to_string());

        let mut hits = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= self.config.max_cascade_depth {
                continue;
            }
            let edges: Vec<(String, String)> = sqlx::query_as(
                "SELECT parent_id, parent_creator FROM citation_edges WHERE child_id = $1",
            )
            .bind(&current)
            .fetch_all(&self.pool)
            .await?;

            for (parent_id, parent_creator) in edges {
                // generation is distance from `content_id`, not the edge's
                // stored absolute depth from the lineage root.
                hits.push(AncestorHit {
                    parent_id: parent_id.clone(),
                    creator_id: parent_creator,
                    generation: depth + 1,
                });

                if visited.insert(parent_id.clone()) {
                    queue.push_back((parent_id, depth + 1));
                }
            }
        }
        Ok(hits)
    }

    /// Emits the royalty ledger batch plus `royalty_payouts` rows for a
    /// transaction, inside the caller's open transaction. `from_account` is
    /// the seller (or platform, depending on settlement routing).
    pub async fn emit_payouts(
        tx: &mut Transaction<'_, Postgres>,
        transaction_ref: &str,
        from_account: &str,
        payouts: &[(String, u32, i64)],
    ) -> CoreResult<Vec<RoyaltyPayout>> {
        let mut rows = Vec::with_capacity(payouts.len());
        for (creator_id, generation, amount_cents) in payouts {
            let entries = vec![NewLedgerEntry::new(
                LedgerEntryKind::Royalty,
                Some(from_account.to_string()),
                Some(creator_id.clone()),
                *amount_cents,
                0,
            )
            .with_metadata(
                Metadata::new()
                    .role("royalty")
                    .with("generation", *generation)
                    .with("transaction_ref", transaction_ref),
            )];

            let ids = LedgerService::record_batch_in_tx(tx, entries).await?;
            let ledger_entry_id = ids[0];

            let id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO royalty_payouts
                    (id, transaction_ref, recipient_creator, generation, rate_millionths, amount_cents, ledger_entry_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(id)
            .bind(transaction_ref)
            .bind(creator_id)
            .bind(*generation as i32)
            .bind(0i64)
            .bind(amount_cents)
            .bind(ledger_entry_id)
            .execute(&mut **tx)
            .await?;

            rows.push(RoyaltyPayout {
                id,
                transaction_ref: transaction_ref.to_string(),
                recipient_creator: creator_id.clone(),
                generation: *generation as i32,
                rate_millionths: 0,
                amount_cents: *amount_cents,
                ledger_entry_id,
            });
        }
        Ok(rows)
    }
}

fn map_duplicate(e: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.constraint().is_some() {
            return CoreError::Conflict("citation_edge_already_exists".into());
        }
    }
    CoreError::from(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RoyaltyConfig {
        RoyaltyConfig {
            initial_rate_millionths: 210_000,
            floor_rate_millionths: 500,
            max_cascade_depth: 50,
        }
    }

    #[test]
    fn generation_zero_is_the_initial_rate() {
        assert_eq!(generational_rate_millionths(&config(), 0), 210_000);
    }

    #[test]
    fn generation_one_halves_the_rate() {
        assert_eq!(generational_rate_millionths(&config(), 1), 105_000);
    }

    #[test]
    fn rate_is_non_increasing_and_floored() {
        let cfg = config();
        let mut previous = u32::MAX;
        for g in 0..25 {
            let rate = generational_rate_millionths(&cfg, g);
            assert!(rate <= previous);
            previous = rate;
        }
        assert_eq!(generational_rate_millionths(&cfg, 20), 500);
        assert_eq!(generational_rate_millionths(&cfg, 30), 500);
    }

    #[test]
    fn generation_one_payout_matches_spec_scenario() {
        // 0.105 * (100 - 5.46) = 9.9267 -> 9.93
        let cfg = config();
        let rate = generational_rate_millionths(&cfg, 1);
        assert_eq!(rate, 105_000);
        let remaining = 10_000 - 546;
        let payout = round_half_up_millionths(remaining as i128 * rate as i128);
        assert_eq!(payout, 993);
    }
}
