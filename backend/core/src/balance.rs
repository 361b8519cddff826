//! Balance projector (component B).
//!
//! Balance is never stored at the user level — it's derived purely from
//! `Complete` ledger entries, per spec.md §4.2:
//!
//! ```text
//! balance(acct) = Σ net(entry)    where to = acct   and status = Complete
//!               − Σ amount(entry) where from = acct and status = Complete
//! ```
//!
//! `amount` (not `net`) is debited so the sender bears the fee.

use sqlx::PgPool;

use crate::error::CoreResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    pub credits_cents: i64,
    pub debits_cents: i64,
}

impl Balance {
    pub fn net_cents(&self) -> i64 {
        self.credits_cents - self.debits_cents
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceSummary {
    pub user_cents: i64,
    pub emergent_cents: i64,
    pub platform_cents: i64,
}

pub struct BalanceProjector {
    pool: PgPool,
}

impl BalanceProjector {
    pub fn new(pool: PgPool) -> Self {
        BalanceProjector { pool }
    }

    pub async fn balance(&self, account: &str) -> CoreResult<Balance> {
        let row: (Option<i64>, Option<i64>) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COALESCE(SUM(net_cents), 0) FROM ledger_entries
                    WHERE to_account = $1 AND status = 'complete'),
                (SELECT COALESCE(SUM(amount_cents), 0) FROM ledger_entries
                    WHERE from_account = $1 AND status = 'complete')
            "#,
        )
        .bind(account)
        .fetch_one(&self.pool)
        .await?;

        Ok(Balance {
            credits_cents: row.0.unwrap_or(0),
            debits_cents: row.1.unwrap_or(0),
        })
    }

    /// Partitions all accounts' net balances into user / emergent / platform
    /// buckets by id prefix, for the system-wide summary.
    pub async fn system_summary(&self) -> CoreResult<BalanceSummary> {
        let accounts: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT account FROM (
                SELECT to_account AS account FROM ledger_entries WHERE status = 'complete'
                UNION
                SELECT from_account AS account FROM ledger_entries WHERE status = 'complete'
            ) AS accts
            WHERE account IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summary = BalanceSummary::default();
        for (account,) in accounts {
            let balance = self.balance(&account).await?;
            let net = balance.net_cents();
            match bucket_for(&account) {
                AccountBucket::Emergent => summary.emergent_cents += net,
                AccountBucket::Platform => summary.platform_cents += net,
                AccountBucket::User => summary.user_cents += net,
            }
        }
        Ok(summary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountBucket {
    User,
    Emergent,
    Platform,
}

const PLATFORM_PREFIXES: &[&str] = &["platform", "reserves", "operating", "payroll", "escrow", "treasury"];

pub fn bucket_for(account: &str) -> AccountBucket {
    if account.starts_with("emergent_op:") || account.starts_with("emergent_res:") {
        return AccountBucket::Emergent;
    }
    for prefix in PLATFORM_PREFIXES {
        if account == *prefix || account.starts_with(&format!("{prefix}:")) {
            return AccountBucket::Platform;
        }
    }
    AccountBucket::User
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_is_credits_minus_debits() {
        let b = Balance {
            credits_cents: 1000,
            debits_cents: 300,
        };
        assert_eq!(b.net_cents(), 700);
    }

    #[test]
    fn buckets_emergent_accounts() {
        assert_eq!(bucket_for("emergent_op:abc"), AccountBucket::Emergent);
        assert_eq!(bucket_for("emergent_res:abc"), AccountBucket::Emergent);
    }

    #[test]
    fn buckets_platform_accounts() {
        assert_eq!(bucket_for("platform"), AccountBucket::Platform);
        assert_eq!(bucket_for("reserves"), AccountBucket::Platform);
        assert_eq!(bucket_for("payroll"), AccountBucket::Platform);
    }

    #[test]
    fn buckets_everything_else_as_user() {
        assert_eq!(bucket_for("user:42"), AccountBucket::User);
    }
}
