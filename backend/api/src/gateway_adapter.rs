//! Bridges `concord_gateway::PaymentsGateway` to the narrower `PayoutSink`
//! the withdrawal flow depends on, keeping `concord-core` free of a direct
//! dependency on the gateway crate's transport concerns.

use async_trait::async_trait;
use concord_core::withdrawal::PayoutSink;
use concord_gateway::PaymentsGateway;

pub struct GatewayPayoutSink {
    pub gateway: std::sync::Arc<dyn PaymentsGateway>,
}

#[async_trait]
impl PayoutSink for GatewayPayoutSink {
    async fn pay_out(&self, account: &str, amount_cents: i64) -> Result<(), String> {
        self.gateway
            .transfer_to_connected_account(account, amount_cents)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
