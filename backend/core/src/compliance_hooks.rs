//! Compliance hooks.
//!
//! Wash-trade detection is named by the spec as a required integration point
//! but left unspecified product-wise. This stub always clears a transaction
//! pending a real rule set; callers are expected to wire it into the
//! purchase orchestrator once product defines flagging criteria.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WashTradeVerdict {
    pub flagged: bool,
    pub reason: Option<String>,
}

pub fn check_wash_trade(_buyer: &str, _seller: &str, _content_hash: &str) -> WashTradeVerdict {
    WashTradeVerdict {
        flagged: false,
        reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_never_flags() {
        let verdict = check_wash_trade("buyer", "seller", "hash");
        assert!(!verdict.flagged);
    }
}
