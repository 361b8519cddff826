//! Error taxonomy for the economic engine.
//!
//! Every public operation in this crate returns `Result<T, CoreError>`. No
//! panics cross a component boundary on an expected failure path; panics are
//! reserved for programmer error (e.g. a config value that was never
//! validated). `CoreError` is deliberately one flat enum rather than one
//! enum per component — callers (principally `concord-api`) need a single
//! place to map errors onto the `{ok: false, error, detail}` envelope.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("insufficient funds in {scope}: have {available} need {required}")]
    InsufficientFunds {
        scope: InsufficientFundsScope,
        available: i64,
        required: i64,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    /// Spec boundary tag `cannot_buy_own_listing`.
    #[error("buyer cannot be the seller")]
    CannotBuyOwnListing,

    /// Spec boundary tag `emergent_cannot_withdraw_to_fiat`.
    #[error("emergent accounts cannot withdraw to fiat")]
    EmergentCannotWithdrawToFiat,

    /// Spec boundary tag `citation_cycle_detected`.
    #[error("citation would create a cycle")]
    CitationCycleDetected,

    /// Spec boundary tag `citation_self_edge`.
    #[error("citation cannot reference itself")]
    CitationSelfEdge,

    /// Not really an error: a replayed ref-id or webhook event id. Callers
    /// should treat this as success and surface `idempotent: true`.
    #[error("idempotent replay of {0}")]
    Idempotent(String),

    /// Fatal: treasury solvency broken or an emergent account tried to exit
    /// to fiat. The caller MUST have already written an audit/treasury
    /// event by the time this is returned.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("external collaborator failure: {0}")]
    ExternalFailure(String),

    #[error("storage fault: {0}")]
    StorageFault(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsufficientFundsScope {
    Operating,
    Reserve,
    Treasury,
    Account,
}

impl std::fmt::Display for InsufficientFundsScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InsufficientFundsScope::Operating => "operating",
            InsufficientFundsScope::Reserve => "reserve",
            InsufficientFundsScope::Treasury => "treasury",
            InsufficientFundsScope::Account => "account",
        };
        f.write_str(s)
    }
}

impl CoreError {
    /// Opaque string tag for public API responses. Detailed messages stay in
    /// server logs and audit entries per the propagation policy.
    pub fn tag(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation_error",
            CoreError::InsufficientFunds { scope, .. } => match scope {
                InsufficientFundsScope::Operating => "insufficient_operating_funds",
                InsufficientFundsScope::Reserve => "insufficient_reserve_funds",
                InsufficientFundsScope::Treasury => "insufficient_treasury_funds",
                InsufficientFundsScope::Account => "insufficient_funds",
            },
            CoreError::Conflict(_) => "conflict",
            CoreError::CannotBuyOwnListing => "cannot_buy_own_listing",
            CoreError::EmergentCannotWithdrawToFiat => "emergent_cannot_withdraw_to_fiat",
            CoreError::CitationCycleDetected => "citation_cycle_detected",
            CoreError::CitationSelfEdge => "citation_self_edge",
            CoreError::Idempotent(_) => "idempotent",
            CoreError::InvariantViolation(_) => "invariant_violation",
            CoreError::ExternalFailure(_) => "external_failure",
            CoreError::StorageFault(_) => "storage_fault",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::InvariantViolation(_) | CoreError::StorageFault(_)
        )
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::StorageFault(e.to_string())
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_tags_carry_the_spec_literal_codes() {
        assert_eq!(CoreError::CannotBuyOwnListing.tag(), "cannot_buy_own_listing");
        assert_eq!(
            CoreError::EmergentCannotWithdrawToFiat.tag(),
            "emergent_cannot_withdraw_to_fiat"
        );
        assert_eq!(CoreError::CitationCycleDetected.tag(), "citation_cycle_detected");
        assert_eq!(CoreError::CitationSelfEdge.tag(), "citation_self_edge");
    }

    #[test]
    fn only_invariant_violation_and_storage_fault_are_fatal() {
        assert!(CoreError::InvariantViolation("x".into()).is_fatal());
        assert!(CoreError::StorageFault("x".into()).is_fatal());
        assert!(!CoreError::CannotBuyOwnListing.is_fatal());
        assert!(!CoreError::EmergentCannotWithdrawToFiat.is_fatal());
    }
}
