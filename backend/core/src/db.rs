//! Connection pool setup and the serializable-transaction retry helper.
//!
//! Every mutating sequence in this crate (batch writes, purchase
//! orchestration, mint/burn, withdrawal flips, emergent transfers, citation
//! insertion) runs inside a single `SERIALIZABLE` transaction, per spec.md
//! §5. Postgres reports write-after-read conflicts as SQLSTATE `40001`; we
//! retry those with a small bounded, jittered backoff rather than surface
//! them to the caller.

use std::future::Future;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::warn;

use crate::config::{ConcurrencyConfig, DatabaseConfig};
use crate::error::{CoreError, CoreResult};

pub async fn connect(config: &DatabaseConfig) -> CoreResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .connect(&config.url)
        .await
        .map_err(CoreError::from)
}

pub async fn run_migrations(pool: &PgPool) -> CoreResult<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| CoreError::StorageFault(e.to_string()))
}

/// Opens a transaction at `SERIALIZABLE` isolation. All cross-account
/// mutations in this crate go through this helper so the isolation level is
/// never forgotten at a call site.
pub async fn begin_serializable(pool: &PgPool) -> CoreResult<Transaction<'static, Postgres>> {
    let mut tx = pool.begin().await.map_err(CoreError::from)?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut *tx)
        .await
        .map_err(CoreError::from)?;
    Ok(tx)
}

const SERIALIZATION_FAILURE: &str = "40001";

fn is_serialization_failure(err: &CoreError) -> bool {
    matches!(err, CoreError::StorageFault(msg) if msg.contains(SERIALIZATION_FAILURE))
}

/// Runs `op` (which opens and commits its own serializable transaction),
/// retrying a bounded number of times on SQLSTATE 40001 with jittered
/// backoff. The orchestrator, treasury, emergent-transfer and citation
/// paths all use this rather than retrying ad hoc.
pub async fn with_serializable_retry<T, F, Fut>(cfg: &ConcurrencyConfig, mut op: F) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if is_serialization_failure(&e) && attempt < cfg.serializable_retry_attempts => {
                attempt += 1;
                let jitter = rand::random::<u64>() % cfg.serializable_retry_base_delay_ms.max(1);
                let delay = cfg.serializable_retry_base_delay_ms * attempt as u64 + jitter;
                warn!(attempt, delay_ms = delay, "retrying after serialization failure");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retries_up_to_the_configured_attempts() {
        let cfg = ConcurrencyConfig {
            serializable_retry_attempts: 2,
            serializable_retry_base_delay_ms: 1,
        };
        let mut calls = 0;
        let result: CoreResult<()> = with_serializable_retry(&cfg, || {
            calls += 1;
            async move {
                if calls < 3 {
                    Err(CoreError::StorageFault("40001 serialization failure".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn gives_up_after_exhausting_attempts() {
        let cfg = ConcurrencyConfig {
            serializable_retry_attempts: 1,
            serializable_retry_base_delay_ms: 1,
        };
        let mut calls = 0;
        let result: CoreResult<()> = with_serializable_retry(&cfg, || {
            calls += 1;
            async move { Err(CoreError::StorageFault("40001".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn non_serialization_errors_are_not_retried() {
        let cfg = ConcurrencyConfig {
            serializable_retry_attempts: 5,
            serializable_retry_base_delay_ms: 1,
        };
        let mut calls = 0;
        let result: CoreResult<()> = with_serializable_retry(&cfg, || {
            calls += 1;
            async move { Err(CoreError::Validation("bad input".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
