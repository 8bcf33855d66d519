//! Address classification.
//!
//! `classify` is total: every input maps to exactly one [`BlockchainFamily`],
//! with unrecognized formats landing on [`BlockchainFamily::Unknown`] and an
//! empty strategy list.
//!
//! Detection order matters because the base-58 alphabets overlap:
//! ethereum-like, tron-like, bitcoin-like, then solana-like.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::strategy::StrategyId;

static ETHEREUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("static regex"));

static TRON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^T[1-9A-HJ-NP-Za-km-z]{33}$").expect("static regex"));

static BITCOIN_LEGACY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[13][1-9A-HJ-NP-Za-km-z]{24,33}$").expect("static regex"));

static BITCOIN_BECH32_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^bc1[02-9ac-hj-np-z]{11,71}$").expect("static regex"));

static SOLANA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").expect("static regex"));

/// Blockchain family an address format belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockchainFamily {
    /// `0x` + 40 hex characters (Ethereum and EVM chains)
    Ethereum,
    /// Legacy base-58 (`1…`/`3…`) or bech32 (`bc1…`)
    Bitcoin,
    /// Base-58, 32 to 44 characters
    Solana,
    /// `T` + 33 base-58 characters
    Tron,
    /// Anything else
    Unknown,
}

impl BlockchainFamily {
    /// Chain name used for explorer resolution
    #[must_use]
    pub fn chain(self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Bitcoin => "bitcoin",
            Self::Solana => "solana",
            Self::Tron => "tron",
            Self::Unknown => "unknown",
        }
    }

    /// Whether addresses of this family compare case-insensitively
    #[must_use]
    pub fn is_case_insensitive(self) -> bool {
        matches!(self, Self::Ethereum)
    }

    /// Strategies that can run against an address of this family
    #[must_use]
    pub fn strategies(self) -> Vec<StrategyId> {
        match self {
            Self::Ethereum => StrategyId::ALL.to_vec(),
            Self::Bitcoin | Self::Solana | Self::Tron => StrategyId::ALL
                .iter()
                .copied()
                .filter(|s| s.is_chain_agnostic())
                .collect(),
            Self::Unknown => Vec::new(),
        }
    }
}

impl fmt::Display for BlockchainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.chain())
    }
}

/// Result of classifying an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Detected family
    pub family: BlockchainFamily,
    /// Applicable strategies, in catalog order
    pub strategies: Vec<StrategyId>,
}

/// Detect the family of an address string.
///
/// Leading and trailing whitespace is ignored.
#[must_use]
pub fn family_of(address: &str) -> BlockchainFamily {
    let address = address.trim();

    if ETHEREUM_RE.is_match(address) {
        BlockchainFamily::Ethereum
    } else if TRON_RE.is_match(address) {
        BlockchainFamily::Tron
    } else if BITCOIN_LEGACY_RE.is_match(address) || BITCOIN_BECH32_RE.is_match(address) {
        BlockchainFamily::Bitcoin
    } else if !address.contains("0x") && SOLANA_RE.is_match(address) {
        BlockchainFamily::Solana
    } else {
        BlockchainFamily::Unknown
    }
}

/// Classify an address into a family and its applicable strategies
#[must_use]
pub fn classify(address: &str) -> Classification {
    let family = family_of(address);
    Classification {
        family,
        strategies: family.strategies(),
    }
}

/// Canonical graph key for an address of the given family.
///
/// Ethereum-like addresses are lowercased; every other family is case
/// sensitive and only trimmed.
#[must_use]
pub fn canonical_form(family: BlockchainFamily, address: &str) -> String {
    let trimmed = address.trim();
    if family.is_case_insensitive() {
        trimmed.to_ascii_lowercase()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETH: &str = "0xAbCd000000000000000000000000000000001234";

    #[test]
    fn test_ethereum_detection() {
        assert_eq!(family_of(ETH), BlockchainFamily::Ethereum);
        assert_eq!(family_of(&format!("  {ETH}\n")), BlockchainFamily::Ethereum);
        // 39 hex chars
        assert_eq!(
            family_of("0xabcd00000000000000000000000000000000123"),
            BlockchainFamily::Unknown
        );
        // non-hex character
        assert_eq!(
            family_of("0xabcd00000000000000000000000000000000123g"),
            BlockchainFamily::Unknown
        );
    }

    #[test]
    fn test_bitcoin_detection() {
        assert_eq!(
            family_of("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"),
            BlockchainFamily::Bitcoin
        );
        assert_eq!(
            family_of("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy"),
            BlockchainFamily::Bitcoin
        );
        assert_eq!(
            family_of("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"),
            BlockchainFamily::Bitcoin
        );
    }

    #[test]
    fn test_tron_detection() {
        assert_eq!(
            family_of("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t"),
            BlockchainFamily::Tron
        );
    }

    #[test]
    fn test_solana_detection() {
        assert_eq!(
            family_of("9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM"),
            BlockchainFamily::Solana
        );
    }

    #[test]
    fn test_solana_excludes_ethereum_prefix() {
        // Base-58 has no '0', so anything carrying "0x" can never be solana-like.
        assert_eq!(
            family_of("0xWzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLV"),
            BlockchainFamily::Unknown
        );
    }

    #[test]
    fn test_classify_is_total() {
        for input in ["", " ", "hello", "0x", "💥💥💥", "T", "bc1", &"z".repeat(500)] {
            let c = classify(input);
            assert_eq!(c.family, BlockchainFamily::Unknown, "input {input:?}");
            assert!(c.strategies.is_empty());
        }
    }

    #[test]
    fn test_strategy_tables() {
        let eth = classify(ETH);
        assert!(eth.strategies.len() >= 5);
        assert!(eth.strategies.contains(&StrategyId::TokenTransfers));
        assert!(eth.strategies.contains(&StrategyId::MultisigSigners));

        let btc = classify("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa");
        assert!(!btc.strategies.is_empty());
        assert!(btc.strategies.iter().all(|s| s.is_chain_agnostic()));
    }

    #[test]
    fn test_canonical_form() {
        assert_eq!(
            canonical_form(BlockchainFamily::Ethereum, ETH),
            "0xabcd000000000000000000000000000000001234"
        );
        assert_eq!(
            canonical_form(BlockchainFamily::Tron, " TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t "),
            "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t"
        );
    }
}
