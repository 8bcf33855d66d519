//! Strategy identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a named discovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    /// ERC-20 style token transfers in and out of the address
    TokenTransfers,
    /// NFT transfers and mints
    NftTransfers,
    /// Canonical bridge deposits and withdrawals
    BridgeActivity,
    /// Intent-based bridge fills (solver networks)
    IntentBridgeFills,
    /// Owners and signers of multisig wallets the address touches
    MultisigSigners,
    /// Liquidity provision and protocol interactions
    DefiInteractions,
    /// Direct counterparties from the plain transaction list
    CounterpartyScan,
    /// Entity labels from intelligence platforms
    IntelligenceLabels,
}

impl StrategyId {
    /// Every strategy, in catalog order
    pub const ALL: [Self; 8] = [
        Self::TokenTransfers,
        Self::NftTransfers,
        Self::BridgeActivity,
        Self::IntentBridgeFills,
        Self::MultisigSigners,
        Self::DefiInteractions,
        Self::CounterpartyScan,
        Self::IntelligenceLabels,
    ];

    /// Stable string identifier
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TokenTransfers => "token_transfers",
            Self::NftTransfers => "nft_transfers",
            Self::BridgeActivity => "bridge_activity",
            Self::IntentBridgeFills => "intent_bridge_fills",
            Self::MultisigSigners => "multisig_signers",
            Self::DefiInteractions => "defi_interactions",
            Self::CounterpartyScan => "counterparty_scan",
            Self::IntelligenceLabels => "intelligence_labels",
        }
    }

    /// Whether the strategy works for every blockchain family
    #[must_use]
    pub fn is_chain_agnostic(self) -> bool {
        matches!(self, Self::CounterpartyScan | Self::IntelligenceLabels)
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("unknown strategy '{s}'"))
    }
}
