//! Static strategy catalog

use sleuth_core::{BlockchainFamily, ExplorerCategory, StrategyId};

use crate::graph::EdgeType;

/// What a strategy scrapes and how its findings enter the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyDefinition {
    /// Identifier
    pub id: StrategyId,
    /// Display name
    pub name: &'static str,
    /// One-line description
    pub description: &'static str,
    /// Explorer category resolved for the target's chain
    pub explorer: ExplorerCategory,
    /// Edge type of every discovered relationship
    pub edge_type: EdgeType,
    /// Extraction focus handed to the automation service
    pub focus: &'static str,
    /// Whether the detail-enrichment pass is worth its cost
    pub enrich: bool,
}

const CATALOG: [StrategyDefinition; 8] = [
    StrategyDefinition {
        id: StrategyId::TokenTransfers,
        name: "Token transfers",
        description: "Native and ERC-20 transfers in and out of the target",
        explorer: ExplorerCategory::General,
        edge_type: EdgeType::TokenTransfer,
        focus: "native and ERC-20 token transfers",
        enrich: false,
    },
    StrategyDefinition {
        id: StrategyId::NftTransfers,
        name: "NFT transfers",
        description: "ERC-721 and ERC-1155 transfers involving the target",
        explorer: ExplorerCategory::General,
        edge_type: EdgeType::NftTransfer,
        focus: "ERC-721 and ERC-1155 NFT transfers",
        enrich: false,
    },
    StrategyDefinition {
        id: StrategyId::BridgeActivity,
        name: "Bridge activity",
        description: "Cross-chain deposits and withdrawals through message bridges",
        explorer: ExplorerCategory::CrossChain,
        edge_type: EdgeType::BridgeTransaction,
        focus: "cross-chain bridge deposits and withdrawals",
        enrich: false,
    },
    StrategyDefinition {
        id: StrategyId::IntentBridgeFills,
        name: "Intent bridge fills",
        description: "Intent-based bridge orders and the relayers that filled them",
        explorer: ExplorerCategory::IntentBridge,
        edge_type: EdgeType::BridgeTransaction,
        focus: "intent bridge orders and relayer fills",
        enrich: false,
    },
    StrategyDefinition {
        id: StrategyId::MultisigSigners,
        name: "Multisig signers",
        description: "Owners and signers of multisig wallets the target controls or uses",
        explorer: ExplorerCategory::General,
        edge_type: EdgeType::TokenTransfer,
        focus: "multisig executions, owner changes and signer confirmations",
        enrich: true,
    },
    StrategyDefinition {
        id: StrategyId::DefiInteractions,
        name: "DeFi interactions",
        description: "Swaps, liquidity provision and lending positions",
        explorer: ExplorerCategory::General,
        edge_type: EdgeType::LiquidityProvision,
        focus: "swaps, liquidity provision and lending interactions",
        enrich: true,
    },
    StrategyDefinition {
        id: StrategyId::CounterpartyScan,
        name: "Counterparty scan",
        description: "Every direct counterparty of the target",
        explorer: ExplorerCategory::General,
        edge_type: EdgeType::TokenTransfer,
        focus: "all incoming and outgoing transfers",
        enrich: false,
    },
    StrategyDefinition {
        id: StrategyId::IntelligenceLabels,
        name: "Intelligence labels",
        description: "Counterparties with entity attributions from intelligence platforms",
        explorer: ExplorerCategory::Intelligence,
        edge_type: EdgeType::TokenTransfer,
        focus: "counterparties with entity labels or attributions",
        enrich: false,
    },
];

/// Every strategy, in catalog order
#[must_use]
pub fn catalog() -> &'static [StrategyDefinition] {
    &CATALOG
}

/// Definition of a strategy
#[must_use]
pub fn definition(id: StrategyId) -> &'static StrategyDefinition {
    // Catalog rows follow the declaration order of `StrategyId`.
    &CATALOG[id as usize]
}

/// Strategies applicable to a family, in catalog order
#[must_use]
pub fn applicable(family: BlockchainFamily) -> Vec<&'static StrategyDefinition> {
    let ids = family.strategies();
    CATALOG.iter().filter(|d| ids.contains(&d.id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_covers_every_id() {
        for id in StrategyId::ALL {
            assert_eq!(definition(id).id, id);
        }
        assert_eq!(catalog().len(), StrategyId::ALL.len());
    }

    #[test]
    fn test_applicable_by_family() {
        assert!(applicable(BlockchainFamily::Ethereum).len() >= 5);
        let bitcoin: Vec<_> = applicable(BlockchainFamily::Bitcoin).iter().map(|d| d.id).collect();
        assert_eq!(bitcoin, vec![StrategyId::CounterpartyScan, StrategyId::IntelligenceLabels]);
        assert!(applicable(BlockchainFamily::Unknown).is_empty());
    }
}
