//! Explorer registry and resolution.
//!
//! The registry is a typed, read-only table loaded once. Resolution order:
//!
//! 1. exact match on chain and category
//! 2. first explorer with the category, ignoring chain
//! 3. [`ExplorerNotFound`]
//!
//! Iteration follows registry order, so resolution is deterministic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Functional category of an explorer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExplorerCategory {
    /// Cross-chain message explorers
    CrossChain,
    /// Intent/solver bridge explorers
    IntentBridge,
    /// Entity labelling and intelligence platforms
    Intelligence,
    /// General block explorers
    General,
}

impl ExplorerCategory {
    /// Stable string identifier
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CrossChain => "cross-chain",
            Self::IntentBridge => "intent-bridge",
            Self::Intelligence => "intelligence",
            Self::General => "general",
        }
    }
}

impl fmt::Display for ExplorerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExplorerCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "cross-chain" => Ok(Self::CrossChain),
            "intent-bridge" => Ok(Self::IntentBridge),
            "intelligence" => Ok(Self::Intelligence),
            "general" => Ok(Self::General),
            other => Err(format!("unknown explorer category '{other}'")),
        }
    }
}

/// A block-explorer-like data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explorer {
    /// Display name
    pub name: String,
    /// Base URL the pipeline navigates to
    pub url: String,
    /// Functional category
    pub category: ExplorerCategory,
    /// Chain affinity, `None` for multi-chain explorers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

impl Explorer {
    /// Create an explorer record
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        category: ExplorerCategory,
        chain: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            category,
            chain: chain.map(str::to_string),
        }
    }

    fn serves_chain(&self, chain: &str) -> bool {
        self.chain
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(chain))
    }
}

/// No explorer matches the requested category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorerNotFound {
    /// Requested chain
    pub chain: String,
    /// Requested category, as given by the caller
    pub category: String,
}

impl fmt::Display for ExplorerNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no explorer for chain '{}' and category '{}'",
            self.chain, self.category
        )
    }
}

impl std::error::Error for ExplorerNotFound {}

/// Read-only explorer table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExplorerRegistry {
    explorers: Vec<Explorer>,
}

impl ExplorerRegistry {
    /// Wrap an explorer list; order is preserved and drives resolution
    #[must_use]
    pub fn new(explorers: Vec<Explorer>) -> Self {
        Self { explorers }
    }

    /// Built-in registry
    #[must_use]
    pub fn builtin() -> Self {
        use ExplorerCategory::{CrossChain, General, Intelligence, IntentBridge};

        Self::new(vec![
            Explorer::new("Etherscan", "https://etherscan.io", General, Some("ethereum")),
            Explorer::new("Blockchair", "https://blockchair.com/bitcoin", General, Some("bitcoin")),
            Explorer::new("Solscan", "https://solscan.io", General, Some("solana")),
            Explorer::new("Tronscan", "https://tronscan.org", General, Some("tron")),
            Explorer::new("Blockscout", "https://eth.blockscout.com", General, None),
            Explorer::new("Arkham Intelligence", "https://intel.arkm.com", Intelligence, None),
            Explorer::new("Breadcrumbs", "https://www.breadcrumbs.app", Intelligence, None),
            Explorer::new("LayerZero Scan", "https://layerzeroscan.com", CrossChain, None),
            Explorer::new("Wormholescan", "https://wormholescan.io", CrossChain, Some("solana")),
            Explorer::new("Socketscan", "https://www.socketscan.io", CrossChain, Some("ethereum")),
            Explorer::new(
                "Across",
                "https://app.across.to/transactions",
                IntentBridge,
                Some("ethereum"),
            ),
            Explorer::new("deBridge", "https://app.debridge.finance/orders", IntentBridge, None),
        ])
    }

    /// All explorers in registry order
    #[must_use]
    pub fn explorers(&self) -> &[Explorer] {
        &self.explorers
    }

    /// Number of explorers
    #[must_use]
    pub fn len(&self) -> usize {
        self.explorers.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.explorers.is_empty()
    }

    /// Pick an explorer for a chain and category
    ///
    /// # Errors
    ///
    /// Returns [`ExplorerNotFound`] when no explorer has the category.
    pub fn resolve(
        &self,
        chain: &str,
        category: ExplorerCategory,
    ) -> Result<&Explorer, ExplorerNotFound> {
        self.explorers
            .iter()
            .find(|e| e.category == category && e.serves_chain(chain))
            .or_else(|| self.explorers.iter().find(|e| e.category == category))
            .ok_or_else(|| ExplorerNotFound {
                chain: chain.to_string(),
                category: category.to_string(),
            })
    }

    /// Like [`resolve`](Self::resolve) with a category given as text.
    ///
    /// # Errors
    ///
    /// Returns [`ExplorerNotFound`] for unknown categories as well.
    pub fn resolve_named(
        &self,
        chain: &str,
        category: &str,
    ) -> Result<&Explorer, ExplorerNotFound> {
        let parsed = category.parse::<ExplorerCategory>().map_err(|_| ExplorerNotFound {
            chain: chain.to_string(),
            category: category.to_string(),
        })?;
        self.resolve(chain, parsed)
    }
}

impl Default for ExplorerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_chain_registry() -> ExplorerRegistry {
        ExplorerRegistry::new(vec![
            Explorer::new("X-General", "https://x.example", ExplorerCategory::General, Some("x")),
            Explorer::new("Y-Bridge", "https://y.example", ExplorerCategory::CrossChain, Some("y")),
            Explorer::new(
                "X-Bridge",
                "https://xb.example",
                ExplorerCategory::CrossChain,
                Some("x"),
            ),
        ])
    }

    #[test]
    fn test_exact_match_wins_over_order() {
        let registry = two_chain_registry();
        let explorer = registry.resolve("x", ExplorerCategory::CrossChain).unwrap();
        assert_eq!(explorer.name, "X-Bridge");
    }

    #[test]
    fn test_category_fallback_ignores_chain() {
        let registry = two_chain_registry();
        let explorer = registry.resolve("z", ExplorerCategory::CrossChain).unwrap();
        assert_eq!(explorer.name, "Y-Bridge");
    }

    #[test]
    fn test_chain_match_is_case_insensitive() {
        let registry = two_chain_registry();
        let explorer = registry.resolve("X", ExplorerCategory::CrossChain).unwrap();
        assert_eq!(explorer.name, "X-Bridge");
    }

    #[test]
    fn test_not_found() {
        let registry = two_chain_registry();
        let err = registry.resolve("x", ExplorerCategory::Intelligence).unwrap_err();
        assert_eq!(err.category, "intelligence");

        let err = registry.resolve_named("z", "nonexistent-category").unwrap_err();
        assert_eq!(err.category, "nonexistent-category");
        assert!(err.to_string().contains("nonexistent-category"));
    }

    #[test]
    fn test_builtin_covers_every_category() {
        let registry = ExplorerRegistry::builtin();
        for category in [
            ExplorerCategory::CrossChain,
            ExplorerCategory::IntentBridge,
            ExplorerCategory::Intelligence,
            ExplorerCategory::General,
        ] {
            assert!(registry.resolve("ethereum", category).is_ok(), "{category}");
        }
        assert_eq!(
            registry.resolve("ethereum", ExplorerCategory::General).unwrap().name,
            "Etherscan"
        );
    }

    #[test]
    fn test_category_parsing_accepts_underscores() {
        assert_eq!("cross_chain".parse::<ExplorerCategory>(), Ok(ExplorerCategory::CrossChain));
        assert_eq!(" General ".parse::<ExplorerCategory>(), Ok(ExplorerCategory::General));
    }

    #[test]
    fn test_registry_from_yaml_list() {
        let yaml = r"
- name: Local
  url: http://localhost:4000
  category: general
  chain: ethereum
- name: Labels
  url: http://localhost:4001
  category: intelligence
";
        let registry: ExplorerRegistry = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.explorers()[1].chain, None);
    }
}
