//! Investigation graph model
//!
//! Nodes are keyed by address and edges by `(source, target, hash)`. Merges
//! are idempotent. Tags, labels, seen windows, edge attributes and the
//! `unknown` -> specific category step are joins, so their result does not
//! depend on batch order. A node's specific category is fixed by the first
//! batch that supplies one; changing it afterwards takes an explicit
//! [`Graph::recategorize`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sleuth_core::StrategyId;

use crate::{Error, Result};

/// Semantic category of an address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// No evidence yet
    #[default]
    Unknown,
    /// Smart contract without a more specific role
    Contract,
    /// DeFi protocol
    Defi,
    /// Bridge contract or relayer
    Bridge,
    /// Centralized exchange
    Cex,
    /// Wallet controlled by the same entity as the target
    AltWallet,
    /// Flagged by an intelligence source
    Flagged,
    /// Mixer
    Mixer,
    /// The investigation target
    Main,
}

impl NodeCategory {
    /// Every category
    pub const ALL: [Self; 9] = [
        Self::Main,
        Self::AltWallet,
        Self::Cex,
        Self::Defi,
        Self::Bridge,
        Self::Mixer,
        Self::Contract,
        Self::Flagged,
        Self::Unknown,
    ];

    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Contract => "contract",
            Self::Defi => "defi",
            Self::Bridge => "bridge",
            Self::Cex => "cex",
            Self::AltWallet => "alt_wallet",
            Self::Flagged => "flagged",
            Self::Mixer => "mixer",
            Self::Main => "main",
        }
    }

    /// Category after merging another observation: `Unknown` takes the
    /// other side, a specific category is kept
    #[must_use]
    pub fn refine(self, other: Self) -> Self {
        if self == Self::Unknown { other } else { self }
    }

    /// Whether this is a specific (non-`Unknown`) category
    #[must_use]
    pub fn is_specific(self) -> bool {
        self != Self::Unknown
    }
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown address category '{s}'"))
    }
}

/// Tag marking an address whose categorization sources all failed.
///
/// Only carried by `unknown` nodes; it is dropped once a category arrives.
pub const CATEGORIZATION_FAILED_TAG: &str = "categorization_failed";

/// Relationship carried by an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// Fungible token or native transfer
    TokenTransfer,
    /// NFT transfer
    NftTransfer,
    /// Cross-chain bridge transaction
    BridgeTransaction,
    /// Liquidity provision into a pool
    LiquidityProvision,
}

impl EdgeType {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TokenTransfer => "token_transfer",
            Self::NftTransfer => "nft_transfer",
            Self::BridgeTransaction => "bridge_transaction",
            Self::LiquidityProvision => "liquidity_provision",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Graph vertex: one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Address
    pub id: String,
    /// Category
    #[serde(default)]
    pub category: NodeCategory,
    /// Tags (set semantics)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Display label from an explorer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Earliest incident edge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    /// Latest incident edge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Node {
    /// Node with a category and no tags
    pub fn new(id: impl Into<String>, category: NodeCategory) -> Self {
        Self {
            id: id.into(),
            category,
            tags: BTreeSet::new(),
            label: None,
            first_seen: None,
            last_seen: None,
        }
    }

    /// Add tags
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Set the label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn absorb(&mut self, other: Self) {
        self.category = self.category.refine(other.category);
        self.tags.extend(other.tags);
        self.settle_tags();
        self.label = join_min(self.label.take(), other.label);
        self.observe(other.first_seen);
        self.observe(other.last_seen);
    }

    fn settle_tags(&mut self) {
        if self.category.is_specific() {
            self.tags.remove(CATEGORIZATION_FAILED_TAG);
        }
    }

    fn observe(&mut self, at: Option<DateTime<Utc>>) {
        let Some(at) = at else { return };
        self.first_seen = Some(self.first_seen.map_or(at, |t| t.min(at)));
        self.last_seen = Some(self.last_seen.map_or(at, |t| t.max(at)));
    }
}

/// Edge identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    /// Source address
    pub source: String,
    /// Target address
    pub target: String,
    /// Transaction hash
    pub hash: String,
}

/// Directed relationship backed by one observed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source address
    pub source: String,
    /// Target address
    pub target: String,
    /// Transaction hash
    pub hash: String,
    /// Relationship type
    #[serde(rename = "type")]
    pub kind: EdgeType,
    /// Transferred value as displayed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Transaction time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Strategy that discovered the edge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyId>,
}

impl Edge {
    /// Edge without value or timestamp
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        hash: impl Into<String>,
        kind: EdgeType,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            hash: hash.into(),
            kind,
            value: None,
            timestamp: None,
            strategy: None,
        }
    }

    /// Identity of this edge
    #[must_use]
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source: self.source.clone(),
            target: self.target.clone(),
            hash: self.hash.clone(),
        }
    }

    fn absorb(&mut self, other: Self) {
        self.kind = self.kind.min(other.kind);
        self.value = join_min(self.value.take(), other.value);
        self.timestamp = join_min(self.timestamp, other.timestamp);
        self.strategy = join_min(self.strategy, other.strategy);
    }
}

/// Missing values are filled; two present values resolve to the lesser
fn join_min<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Nodes and edges to merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphBatch {
    /// Nodes
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Edges
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl GraphBatch {
    /// Whether the batch carries nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    fn validate(&self) -> Result<()> {
        if let Some(node) = self.nodes.iter().find(|n| n.id.trim().is_empty()) {
            return Err(Error::Invariant(format!("node with empty id: {node:?}")));
        }
        if let Some(edge) = self
            .edges
            .iter()
            .find(|e| {
                e.source.trim().is_empty() || e.target.trim().is_empty() || e.hash.trim().is_empty()
            })
        {
            return Err(Error::Invariant(format!(
                "edge with empty endpoint or hash: {} -> {} ({})",
                edge.source, edge.target, edge.hash
            )));
        }
        Ok(())
    }
}

/// What a merge changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    /// Nodes that did not exist before
    pub nodes_added: usize,
    /// Edges that did not exist before
    pub edges_added: usize,
}

/// The accumulated investigation graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    nodes: BTreeMap<String, Node>,
    edges: BTreeMap<EdgeKey, Edge>,
}

impl Graph {
    /// Empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch.
    ///
    /// The whole batch is validated first, so a rejected batch leaves the
    /// graph untouched. Missing edge endpoints are created as `unknown`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`] for empty node ids, endpoints or hashes.
    pub fn merge(&mut self, batch: GraphBatch) -> Result<MergeStats> {
        batch.validate()?;
        let mut stats = MergeStats::default();

        for node in batch.nodes {
            if let Some(existing) = self.nodes.get_mut(&node.id) {
                existing.absorb(node);
            } else {
                let mut node = node;
                node.settle_tags();
                self.nodes.insert(node.id.clone(), node);
                stats.nodes_added += 1;
            }
        }

        for edge in batch.edges {
            for endpoint in [&edge.source, &edge.target] {
                let node = self.nodes.entry(endpoint.clone()).or_insert_with(|| {
                    stats.nodes_added += 1;
                    Node::new(endpoint.clone(), NodeCategory::Unknown)
                });
                node.observe(edge.timestamp);
            }

            let key = edge.key();
            if let Some(existing) = self.edges.get_mut(&key) {
                existing.absorb(edge);
            } else {
                self.edges.insert(key, edge);
                stats.edges_added += 1;
            }
        }

        Ok(stats)
    }

    /// Explicit re-categorization: sets the category even if that lowers it.
    ///
    /// Returns `false` if the node does not exist.
    pub fn recategorize(&mut self, id: &str, category: NodeCategory) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.category = category;
                node.settle_tags();
                true
            }
            None => false,
        }
    }

    /// Node by address
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Nodes in address order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Edges in key order
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Edges touching an address
    pub fn edges_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.values().filter(move |e| e.source == id || e.target == id)
    }

    /// Node count
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Edge count
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Whether the graph is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Lossless serializable form
    #[must_use]
    pub fn to_record(&self) -> GraphRecord {
        GraphRecord {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
        }
    }

    /// Rebuild from a record
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`] if the record contains empty identifiers.
    pub fn from_record(record: GraphRecord) -> Result<Self> {
        let mut graph = Self::new();
        graph.merge(GraphBatch {
            nodes: record.nodes,
            edges: record.edges,
        })?;
        Ok(graph)
    }
}

/// Serializable graph, as handed to graph stores
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphRecord {
    /// Nodes in address order
    pub nodes: Vec<Node>,
    /// Edges in key order
    pub edges: Vec<Edge>,
}
