//! `PaymentsGateway`: the external-collaborator boundary (spec.md §6).
//!
//! Concrete implementations live outside `concord-core` on purpose — the
//! core crate only ever sees the trait, never a Stripe/Adyen SDK type, so
//! its ledger and withdrawal logic stays testable without a network call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedAccountLink {
    pub account_id: String,
    pub onboarding_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("webhook signature verification failed")]
    InvalidSignature,
}

#[async_trait]
pub trait PaymentsGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        buyer: &str,
        amount_cents: i64,
        currency: &str,
    ) -> Result<CheckoutSession, GatewayError>;

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<(), GatewayError>;

    async fn create_connected_account_link(&self, account_id: &str) -> Result<ConnectedAccountLink, GatewayError>;

    async fn transfer_to_connected_account(
        &self,
        account_id: &str,
        amount_cents: i64,
    ) -> Result<String, GatewayError>;
}

/// Deterministic in-memory double for tests and local runs. Never reaches
/// the network; every signature with a non-empty `expected_signature` set
/// at construction verifies, everything else is rejected.
pub struct MockGateway {
    expected_signature: Option<String>,
}

impl MockGateway {
    pub fn new() -> Self {
        MockGateway {
            expected_signature: None,
        }
    }

    pub fn with_webhook_signature(signature: impl Into<String>) -> Self {
        MockGateway {
            expected_signature: Some(signature.into()),
        }
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentsGateway for MockGateway {
    async fn create_checkout_session(
        &self,
        buyer: &str,
        amount_cents: i64,
        currency: &str,
    ) -> Result<CheckoutSession, GatewayError> {
        let session_id = format!("mock_session_{buyer}_{amount_cents}_{currency}");
        Ok(CheckoutSession {
            checkout_url: format!("https://mock.gateway.test/checkout/{session_id}"),
            session_id,
        })
    }

    fn verify_webhook_signature(&self, _payload: &[u8], signature: &str) -> Result<(), GatewayError> {
        match &self.expected_signature {
            Some(expected) if expected == signature => Ok(()),
            _ => Err(GatewayError::InvalidSignature),
        }
    }

    async fn create_connected_account_link(&self, account_id: &str) -> Result<ConnectedAccountLink, GatewayError> {
        Ok(ConnectedAccountLink {
            account_id: account_id.to_string(),
            onboarding_url: format!("https://mock.gateway.test/onboard/{account_id}"),
        })
    }

    async fn transfer_to_connected_account(
        &self,
        account_id: &str,
        amount_cents: i64,
    ) -> Result<String, GatewayError> {
        if amount_cents <= 0 {
            return Err(GatewayError::Rejected("amount must be positive".into()));
        }
        Ok(format!("mock_transfer_{account_id}_{amount_cents}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checkout_session_is_deterministic_for_identical_inputs() {
        let gateway = MockGateway::new();
        let a = gateway.create_checkout_session("buyer-1", 500, "usd").await.unwrap();
        let b = gateway.create_checkout_session("buyer-1", 500, "usd").await.unwrap();
        assert_eq!(a.session_id, b.session_id);
    }

    #[test]
    fn webhook_signature_must_match_exactly() {
        let gateway = MockGateway::with_webhook_signature("sig-123");
        assert!(gateway.verify_webhook_signature(b"payload", "sig-123").is_ok());
        assert!(gateway.verify_webhook_signature(b"payload", "wrong").is_err());
    }

    #[tokio::test]
    async fn transfer_rejects_non_positive_amounts() {
        let gateway = MockGateway::new();
        assert!(gateway.transfer_to_connected_account("acct-1", 0).await.is_err());
    }
}
