//! Content-addressed vault (component V).
//!
//! Dedup is by SHA-256 of uploaded bytes (`concord_crypto::content_hash`).
//! Storage is gzip-compressed (stable across encodes of identical bytes,
//! resolving the Open Question on codec choice) and written to a sharded
//! path, `<vault_root>/aa/bb/<hash>`. Hash lookup, ref-count bump, and the
//! on-disk write all happen inside one transaction so a crash never leaves
//! a VaultEntry row without its bytes or vice versa.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use sqlx::{PgPool, Transaction, Postgres};

use crate::config::VaultConfig;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreResult {
    pub deduplicated: bool,
    pub additional_bytes: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VaultEntry {
    pub content_hash: String,
    pub file_path: String,
    pub original_bytes: i64,
    pub compressed_bytes: i64,
    pub compression_kind: String,
    pub mime_type: String,
    pub reference_count: i32,
    pub created_at: DateTime<Utc>,
    pub last_referenced_at: DateTime<Utc>,
}

pub struct Vault {
    pool: PgPool,
    config: VaultConfig,
}

impl Vault {
    pub fn new(pool: PgPool, config: VaultConfig) -> Self {
        Vault { pool, config }
    }

    pub async fn store(&self, bytes: &[u8], mime_type: &str) -> CoreResult<(String, StoreResult)> {
        let hash = concord_crypto::content_hash(bytes);
        let mut tx = crate::db::begin_serializable(&self.pool).await?;

        if let Some(existing) = fetch_entry(&mut tx, &hash).await? {
            sqlx::query(
                "UPDATE vault_entries SET reference_count = reference_count + 1, last_referenced_at = now() WHERE content_hash = $1",
            )
            .bind(&hash)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            let _ = existing;
            return Ok((
                hash,
                StoreResult {
                    deduplicated: true,
                    additional_bytes: 0,
                },
            ));
        }

        let compressed = gzip_compress(bytes)?;
        let (shard_a, shard_b) = concord_crypto::shard_prefix(&hash)
            .ok_or_else(|| CoreError::Validation("content hash too short to shard".into()))?;
        let relative_path = format!("{shard_a}/{shard_b}/{hash}");
        let full_path = PathBuf::from(&self.config.root_path).join(&relative_path);

        write_to_disk(&full_path, &compressed)?;

        sqlx::query(
            r#"
            INSERT INTO vault_entries
                (content_hash, file_path, original_bytes, compressed_bytes, compression_kind,
                 mime_type, reference_count, created_at, last_referenced_at)
            VALUES ($1, $2, $3, $4, 'gzip', $5, 1, now(), now())
            "#,
        )
        .bind(&hash)
        .bind(&relative_path)
        .bind(bytes.len() as i64)
        .bind(compressed.len() as i64)
        .bind(mime_type)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint().is_some() {
                    return CoreError::Conflict("vault entry already exists for this hash".into());
                }
            }
            CoreError::from(e)
        })?;

        tx.commit().await?;
        Ok((
            hash,
            StoreResult {
                deduplicated: false,
                additional_bytes: compressed.len() as i64,
            },
        ))
    }

    pub async fn decrement_ref(&self, hash: &str) -> CoreResult<i32> {
        let mut tx = crate::db::begin_serializable(&self.pool).await?;
        let count: i32 = sqlx::query_scalar(
            "UPDATE vault_entries SET reference_count = reference_count - 1 WHERE content_hash = $1 RETURNING reference_count",
        )
        .bind(hash)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(count)
    }

    /// Deletes entries whose ref-count has been `<= 0` for longer than the
    /// configured grace period. Returns the hashes removed.
    pub async fn sweep(&self) -> CoreResult<Vec<String>> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.gc_grace_period_seconds);
        let expired: Vec<(String, String)> = sqlx::query_as(
            "SELECT content_hash, file_path FROM vault_entries WHERE reference_count <= 0 AND last_referenced_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut removed = Vec::with_capacity(expired.len());
        for (hash, relative_path) in expired {
            let full_path = PathBuf::from(&self.config.root_path).join(&relative_path);
            let _ = std::fs::remove_file(&full_path);
            sqlx::query("DELETE FROM vault_entries WHERE content_hash = $1")
                .bind(&hash)
                .execute(&self.pool)
                .await?;
            removed.push(hash);
        }
        Ok(removed)
    }
}

async fn fetch_entry(tx: &mut Transaction<'_, Postgres>, hash: &str) -> CoreResult<Option<VaultEntry>> {
    sqlx::query_as::<_, VaultEntry>("SELECT * FROM vault_entries WHERE content_hash = $1 FOR UPDATE")
        .bind(hash)
        .fetch_optional(&mut **tx)
        .await
        .map_err(CoreError::from)
}

fn gzip_compress(bytes: &[u8]) -> CoreResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| CoreError::StorageFault(format!("gzip compress failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| CoreError::StorageFault(format!("gzip finish failed: {e}")))
}

fn write_to_disk(path: &PathBuf, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CoreError::StorageFault(format!("vault mkdir failed: {e}")))?;
    }
    std::fs::write(path, bytes).map_err(|e| CoreError::StorageFault(format!("vault write failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_is_deterministic_for_identical_bytes() {
        let a = gzip_compress(b"the quick brown fox").unwrap();
        let b = gzip_compress(b"the quick brown fox").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn gzip_round_trips_through_flate2() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let compressed = gzip_compress(b"round trip me").unwrap();
        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"round trip me");
    }
}
