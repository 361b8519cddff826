//! Fee calculator (component F).
//!
//! The fee schedule is a constant map from ledger-entry kind to rate,
//! carried in `FeeConfig` — never a magic number at a call site. Arithmetic
//! is integer cents throughout; any decimal input is rounded half-away-from-
//! zero at the boundary.

use crate::config::FeeConfig;
use crate::ledger::LedgerEntryKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub amount_cents: i64,
    pub fee_cents: i64,
    pub net_cents: i64,
}

/// Rounds `amount_millionths / 1_000_000` to the nearest cent,
/// half-away-from-zero.
pub fn round_half_up_millionths(amount_millionths: i128) -> i64 {
    let sign = if amount_millionths < 0 { -1 } else { 1 };
    let magnitude = amount_millionths.unsigned_abs();
    let rounded = (magnitude + 500_000) / 1_000_000;
    (sign as i128 * rounded as i128) as i64
}

pub fn calculate_fee(config: &FeeConfig, kind: LedgerEntryKind, amount_cents: i64) -> FeeBreakdown {
    let rate_millionths = *config.rates_millionths.get(&kind).unwrap_or(&0) as i128;
    let fee_cents = round_half_up_millionths(amount_cents as i128 * rate_millionths);
    FeeBreakdown {
        amount_cents,
        fee_cents,
        net_cents: amount_cents - fee_cents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_on_100_dollars_with_combined_marketplace_rate() {
        let config = FeeConfig::default_schedule();
        let breakdown = calculate_fee(&config, LedgerEntryKind::MarketplacePurchase, 10_000);
        assert_eq!(breakdown.fee_cents, 546);
        assert_eq!(breakdown.net_cents, 9_454);
    }

    #[test]
    fn transfer_fee_is_one_point_four_six_percent() {
        let config = FeeConfig::default_schedule();
        let breakdown = calculate_fee(&config, LedgerEntryKind::Transfer, 10_000);
        assert_eq!(breakdown.fee_cents, 146);
        assert_eq!(breakdown.net_cents, 9_854);
    }

    #[test]
    fn royalty_entries_are_fee_free() {
        let config = FeeConfig::default_schedule();
        let breakdown = calculate_fee(&config, LedgerEntryKind::Royalty, 10_000);
        assert_eq!(breakdown.fee_cents, 0);
        assert_eq!(breakdown.net_cents, 10_000);
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        // 0.5 cents rounds up.
        assert_eq!(round_half_up_millionths(500_000), 1);
        // Just under half rounds down.
        assert_eq!(round_half_up_millionths(499_999), 0);
        // Negative magnitudes round away from zero too.
        assert_eq!(round_half_up_millionths(-500_000), -1);
    }

    #[test]
    fn transfer_scenario_from_spec_end_to_end() {
        // Seed A 100.00, transfer 50.00 A->B: fee 0.73, net 49.27.
        let config = FeeConfig::default_schedule();
        let breakdown = calculate_fee(&config, LedgerEntryKind::Transfer, 5_000);
        assert_eq!(breakdown.fee_cents, 73);
        assert_eq!(breakdown.net_cents, 4_927);
    }
}
