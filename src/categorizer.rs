//! Address categorization
//!
//! Static heuristics first (well-known contracts), then the explorers: the
//! chain's intelligence explorer and its general explorer, in that order.
//! [`AddressCategorizer::categorize`] never fails; any internal error yields
//! an `unknown` record tagged `categorization_failed`. The graph drops that
//! tag once a later merge supplies a category for the address.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sleuth_core::{BlockchainFamily, Explorer, ExplorerCategory, ExplorerRegistry};
use tracing::{debug, warn};

use crate::automation::{ScopedSession, SessionFactory};
use crate::config::CategorizerConfig;
use crate::graph::{CATEGORIZATION_FAILED_TAG, Node, NodeCategory};
use crate::pipeline::{Transaction, schema};
use crate::{Error, Result};

/// Tag attached when categorization could not run
pub const FAILED_TAG: &str = CATEGORIZATION_FAILED_TAG;

/// Well-known Ethereum contracts (lowercase)
const KNOWN_ADDRESSES: &[(&str, NodeCategory, &str)] = &[
    ("0xd90e2f925da726b50c4ed8d0fb90ad053324f31b", NodeCategory::Mixer, "Tornado Cash: Router"),
    ("0x722122df12d4e14e13ac3b6895a86e84145b6967", NodeCategory::Mixer, "Tornado Cash: Proxy"),
    ("0x28c6c06298d514db089934071355e5743bf21d60", NodeCategory::Cex, "Binance 14"),
    ("0x21a31ee1afc51d94c2efccaa2092ad1028285549", NodeCategory::Cex, "Binance 15"),
    ("0x71660c4005ba85c37ccec55d0c4493e66fe775d3", NodeCategory::Cex, "Coinbase 1"),
    (
        "0x3ee18b2214aff97000d974cf647e7c347e8fa585",
        NodeCategory::Bridge,
        "Wormhole: Portal Token Bridge",
    ),
    (
        "0x5c7bcd6e7de5423a257d81b442095a1a6ced35c5",
        NodeCategory::Bridge,
        "Across Protocol: Spoke Pool",
    ),
    ("0x7a250d5630b4cf539739df2c5dacb4c659f2488d", NodeCategory::Defi, "Uniswap V2: Router 2"),
    ("0xe592427a0aece92de3edee1f18e0157c05861564", NodeCategory::Defi, "Uniswap V3: Router"),
];

/// Categorization of one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    /// Address as given
    pub address: String,
    /// Category
    pub category: NodeCategory,
    /// Evidence tags
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Explorer label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl AddressInfo {
    /// No evidence either way
    pub fn unknown(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            category: NodeCategory::Unknown,
            tags: BTreeSet::new(),
            label: None,
        }
    }

    /// Categorization could not run
    pub fn failed(address: impl Into<String>) -> Self {
        let mut info = Self::unknown(address);
        info.tags.insert(FAILED_TAG.to_string());
        info
    }

    /// Whether categorization failed
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.tags.contains(FAILED_TAG)
    }

    /// Graph node for this address
    #[must_use]
    pub fn to_node(&self) -> Node {
        let mut node =
            Node::new(self.address.clone(), self.category).with_tags(self.tags.iter().cloned());
        node.label.clone_from(&self.label);
        node
    }
}

/// `address_profile` extraction
#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    is_contract: bool,
}

/// Looks up a static table of known addresses
#[must_use]
pub fn known_address(family: BlockchainFamily, address: &str) -> Option<AddressInfo> {
    if family != BlockchainFamily::Ethereum {
        return None;
    }
    let lowered = address.to_ascii_lowercase();
    KNOWN_ADDRESSES
        .iter()
        .find(|(known, _, _)| *known == lowered)
        .map(|(_, category, label)| AddressInfo {
            address: address.to_string(),
            category: *category,
            tags: BTreeSet::from(["known_contract".to_string()]),
            label: Some((*label).to_string()),
        })
}

/// Address categorizer over the automation capability
pub struct AddressCategorizer {
    sessions: Arc<SessionFactory>,
    registry: Arc<ExplorerRegistry>,
    concurrency: usize,
}

impl AddressCategorizer {
    /// Create a categorizer
    pub fn new(
        sessions: Arc<SessionFactory>,
        registry: Arc<ExplorerRegistry>,
        config: &CategorizerConfig,
    ) -> Self {
        Self {
            sessions,
            registry,
            concurrency: config.concurrency.max(1),
        }
    }

    /// Categorize one address.
    ///
    /// Without `known` transactions the address is first searched on the
    /// explorer; with them, their pattern is handed to the extraction instead.
    pub async fn categorize(
        &self,
        family: BlockchainFamily,
        address: &str,
        known: Option<&[Transaction]>,
    ) -> AddressInfo {
        if let Some(info) = known_address(family, address) {
            debug!(address, category = %info.category, "Matched known address");
            return info;
        }

        match self.lookup(family, address, known).await {
            Ok(info) => info,
            Err(e) => {
                warn!(address, error = %e, "Categorization failed, marking unknown");
                telemetry_metrics::counter!(
                    "sleuth_recovered_failures_total",
                    "stage" => "categorize"
                )
                .increment(1);
                AddressInfo::failed(address)
            }
        }
    }

    /// Categorize several addresses with bounded parallelism, in input order
    pub async fn categorize_all(
        &self,
        family: BlockchainFamily,
        addresses: &[String],
    ) -> Vec<AddressInfo> {
        let lookups: Vec<_> = addresses
            .iter()
            .map(|address| self.categorize(family, address, None))
            .collect();
        stream::iter(lookups)
            .buffered(self.concurrency)
            .collect()
            .await
    }

    fn candidates(&self, family: BlockchainFamily) -> Vec<&Explorer> {
        let chain = family.chain();
        let mut explorers: Vec<&Explorer> =
            [ExplorerCategory::Intelligence, ExplorerCategory::General]
                .into_iter()
                .filter_map(|category| self.registry.resolve(chain, category).ok())
                .collect();
        explorers.dedup_by(|a, b| a.url == b.url);
        explorers
    }

    async fn lookup(
        &self,
        family: BlockchainFamily,
        address: &str,
        known: Option<&[Transaction]>,
    ) -> Result<AddressInfo> {
        let explorers = self.candidates(family);
        if explorers.is_empty() {
            return Err(Error::Config(format!(
                "no explorer can categorize {} addresses",
                family.chain()
            )));
        }

        let mut last_error = None;
        let mut answered = false;
        for explorer in explorers {
            match self.lookup_on(explorer, address, known).await {
                Ok(Some(info))
                    if info.category != NodeCategory::Unknown || !info.tags.is_empty() =>
                {
                    return Ok(info);
                }
                Ok(_) => answered = true,
                Err(e) => {
                    debug!(
                        address,
                        explorer = %explorer.name,
                        error = %e,
                        "Explorer could not categorize"
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(AddressInfo::unknown(address)),
        }
    }

    async fn lookup_on(
        &self,
        explorer: &Explorer,
        address: &str,
        known: Option<&[Transaction]>,
    ) -> Result<Option<AddressInfo>> {
        let mut session = self.sessions.open().await?;
        let result = profile(&mut session, explorer, address, known).await;
        session.release().await;
        result
    }
}

async fn profile(
    session: &mut ScopedSession,
    explorer: &Explorer,
    address: &str,
    known: Option<&[Transaction]>,
) -> Result<Option<AddressInfo>> {
    session.navigate(&explorer.url).await?;

    let mut instruction = schema::categorize(address);
    match known {
        Some(transactions) => instruction.push_str(&summarize(address, transactions)),
        None => {
            let outcome = session.act(&schema::search(address)).await?;
            if !outcome.success {
                debug!(address, explorer = %explorer.name, "Address not found on explorer");
                return Ok(None);
            }
        }
    }

    let Some(data) = session.extract(&instruction, &schema::address_profile()).await? else {
        return Ok(None);
    };
    parse_profile(address, data).map(Some)
}

fn parse_profile(address: &str, data: Value) -> Result<AddressInfo> {
    let profile: Profile = serde_json::from_value(data)
        .map_err(|e| Error::Extraction(format!("address profile for {address}: {e}")))?;

    let category = match profile.category.as_deref() {
        Some(raw) => raw.parse::<NodeCategory>().map_err(Error::Extraction)?,
        None => NodeCategory::Unknown,
    };
    let category = if category == NodeCategory::Unknown && profile.is_contract {
        NodeCategory::Contract
    } else {
        category
    };

    Ok(AddressInfo {
        address: address.to_string(),
        category,
        tags: profile
            .tags
            .into_iter()
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect(),
        label: profile.label.filter(|l| !l.trim().is_empty()),
    })
}

/// Observed pattern appended to the instruction when transactions are known
fn summarize(address: &str, transactions: &[Transaction]) -> String {
    let counterparties: BTreeSet<&str> = transactions
        .iter()
        .flat_map(Transaction::parties)
        .filter(|p| !p.eq_ignore_ascii_case(address))
        .collect();
    let outgoing = transactions
        .iter()
        .filter(|tx| tx.from.as_deref().is_some_and(|f| f.eq_ignore_ascii_case(address)))
        .count();
    format!(
        " Already observed for this address: {} transactions ({outgoing} outgoing) \
         with {} distinct counterparties.",
        transactions.len(),
        counterparties.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{ScriptedAutomation, ScriptedSite};
    use crate::config::AutomationConfig;
    use crate::failsafe::Failsafe;
    use serde_json::json;

    const ETHERSCAN: &str = "https://etherscan.io";
    const ARKHAM: &str = "https://intel.arkm.com";
    const CEX: &str = "0x00000000000000000000000000000000000000c1";
    const PLAIN: &str = "0x00000000000000000000000000000000000000e2";

    fn labelled(address: &str, profile: Value) -> ScriptedSite {
        let mut site = ScriptedSite::default();
        site.labels.insert(address.to_string(), profile);
        site
    }

    fn categorizer(automation: ScriptedAutomation) -> AddressCategorizer {
        let sessions = SessionFactory::new(
            Arc::new(automation),
            Failsafe::disabled(),
            &AutomationConfig::default(),
        );
        AddressCategorizer::new(
            Arc::new(sessions),
            Arc::new(ExplorerRegistry::builtin()),
            &CategorizerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_known_address_skips_automation() {
        let automation = ScriptedAutomation::new();
        automation.fail_all_opens();
        let info = categorizer(automation)
            .categorize(
                BlockchainFamily::Ethereum,
                "0xD90e2f925DA726b50C4Ed8D0Fb90Ad053324F31b",
                None,
            )
            .await;
        assert_eq!(info.category, NodeCategory::Mixer);
        assert!(!info.is_failed());
    }

    #[tokio::test]
    async fn test_intelligence_label_wins() {
        let automation = ScriptedAutomation::new()
            .with_site(
                ARKHAM,
                labelled(
                    CEX,
                    json!({ "category": "cex", "label": "Kraken 4", "tags": ["Exchange"] }),
                ),
            )
            .with_site(ETHERSCAN, labelled(CEX, json!({ "category": "contract" })));

        let info = categorizer(automation).categorize(BlockchainFamily::Ethereum, CEX, None).await;
        assert_eq!(info.category, NodeCategory::Cex);
        assert_eq!(info.label.as_deref(), Some("Kraken 4"));
        assert!(info.tags.contains("exchange"));
    }

    #[tokio::test]
    async fn test_falls_back_to_general_explorer() {
        let automation = ScriptedAutomation::new()
            .with_site(ETHERSCAN, labelled(CEX, json!({ "is_contract": true })));
        let info = categorizer(automation).categorize(BlockchainFamily::Ethereum, CEX, None).await;
        assert_eq!(info.category, NodeCategory::Contract);
    }

    #[tokio::test]
    async fn test_no_evidence_is_plain_unknown() {
        let automation = ScriptedAutomation::new()
            .with_site(ARKHAM, ScriptedSite::default())
            .with_site(ETHERSCAN, labelled(CEX, json!({ "category": "cex" })));
        let info = categorizer(automation)
            .categorize(BlockchainFamily::Ethereum, PLAIN, None)
            .await;
        assert_eq!(info, AddressInfo::unknown(PLAIN));
    }

    #[tokio::test]
    async fn test_failure_degrades_to_tagged_unknown() {
        let automation = ScriptedAutomation::new();
        automation.fail_all_opens();
        let info = categorizer(automation)
            .categorize(BlockchainFamily::Ethereum, PLAIN, None)
            .await;
        assert_eq!(info.category, NodeCategory::Unknown);
        assert!(info.is_failed());
    }

    #[tokio::test]
    async fn test_invalid_category_is_failure() {
        let automation = ScriptedAutomation::new()
            .with_site(ARKHAM, labelled(CEX, json!({ "category": "whale" })));
        let info = categorizer(automation).categorize(BlockchainFamily::Ethereum, CEX, None).await;
        assert!(info.is_failed());
    }

    #[tokio::test]
    async fn test_categorize_all_keeps_order() {
        let automation = ScriptedAutomation::new()
            .with_site(ARKHAM, labelled(CEX, json!({ "category": "cex" })));
        let addresses = vec![PLAIN.to_string(), CEX.to_string()];
        let infos = categorizer(automation)
            .categorize_all(BlockchainFamily::Ethereum, &addresses)
            .await;
        assert_eq!(infos[0].address, PLAIN);
        assert_eq!(infos[1].category, NodeCategory::Cex);
    }

    #[test]
    fn test_summary_counts() {
        let mut out = Transaction::new("0x1");
        out.from = Some(PLAIN.to_uppercase().replace("0X", "0x"));
        out.to = Some(CEX.into());
        let mut inbound = Transaction::new("0x2");
        inbound.from = Some(CEX.into());
        inbound.to = Some(PLAIN.into());

        let text = summarize(PLAIN, &[out, inbound]);
        assert!(text.contains("2 transactions (1 outgoing) with 1 distinct"), "{text}");
    }
}
