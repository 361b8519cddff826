use std::sync::Arc;

use concord_core::balance::BalanceProjector;
use concord_core::checkout::CheckoutService;
use concord_core::emergent::EmergentLedger;
use concord_core::fee_split::FeeSplitEngine;
use concord_core::ledger::LedgerService;
use concord_core::purchase::PurchaseOrchestrator;
use concord_core::reconcile::Reconciler;
use concord_core::royalty::RoyaltyEngine;
use concord_core::transfer::TransferFlow;
use concord_core::treasury::TreasuryService;
use concord_core::vault::Vault;
use concord_core::withdrawal::WithdrawalFlow;
use concord_core::Config;
use concord_gateway::PaymentsGateway;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ledger: Arc<LedgerService>,
    pub balance: Arc<BalanceProjector>,
    pub treasury: Arc<TreasuryService>,
    pub fee_split: Arc<FeeSplitEngine>,
    pub royalty: Arc<RoyaltyEngine>,
    pub purchase: Arc<PurchaseOrchestrator>,
    pub emergent: Arc<EmergentLedger>,
    pub vault: Arc<Vault>,
    pub reconciler: Arc<Reconciler>,
    pub withdrawal: Arc<WithdrawalFlow>,
    pub transfer: Arc<TransferFlow>,
    pub checkout: Arc<CheckoutService>,
    pub gateway: Arc<dyn PaymentsGateway>,
}
