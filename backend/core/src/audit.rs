//! Audit-event emission for fatal conditions and admin actions.
//!
//! Every `InvariantViolation` and every admin-initiated reversal or drift
//! clearance is both logged through `tracing` and persisted to
//! `audit_events` so it survives process restarts and is queryable by
//! operators, per the propagation policy in spec.md §7.

use serde_json::Value;
use sqlx::PgExecutor;
use tracing::error;
use uuid::Uuid;

use crate::error::CoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventKind {
    TreasuryInvariantViolation,
    EmergentFiatExitAttempt,
    DriftAlertCleared,
    AdminReversal,
}

impl AuditEventKind {
    fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::TreasuryInvariantViolation => "treasury_invariant_violation",
            AuditEventKind::EmergentFiatExitAttempt => "emergent_fiat_exit_attempt",
            AuditEventKind::DriftAlertCleared => "drift_alert_cleared",
            AuditEventKind::AdminReversal => "admin_reversal",
        }
    }
}

pub async fn record<'e, E>(
    exec: E,
    kind: AuditEventKind,
    actor: &str,
    detail: Value,
) -> CoreResult<Uuid>
where
    E: PgExecutor<'e>,
{
    error!(kind = kind.as_str(), actor, %detail, "audit event");

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO audit_events (id, kind, actor, detail, created_at)
        VALUES ($1, $2, $3, $4, now())
        "#,
    )
    .bind(id)
    .bind(kind.as_str())
    .bind(actor)
    .bind(detail)
    .execute(exec)
    .await?;

    Ok(id)
}
