//! Executes one strategy run:
//! resolve explorer, scrape, categorize counterparties, merge into the graph.

use std::collections::HashSet;
use std::sync::Arc;

use sleuth_core::{BlockchainFamily, ExplorerRegistry, canonical_form};
use tracing::{debug, info};

use super::catalog::StrategyDefinition;
use crate::categorizer::AddressCategorizer;
use crate::config::{CategorizerConfig, PipelineConfig};
use crate::events::{EventFeed, InvestigationEvent};
use crate::graph::{Edge, GraphBatch, GraphBuilder, Node, NodeCategory};
use crate::pipeline::{ScrapeRequest, ScrapingPipeline, Transaction};
use crate::Result;

/// Investigation target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Address exactly as submitted
    pub address: String,
    /// Detected family
    pub family: BlockchainFamily,
}

impl Target {
    /// Canonical form of an address seen next to this target.
    ///
    /// The target itself keeps its submitted spelling so it maps to one node.
    #[must_use]
    pub fn canonicalize(&self, address: &str) -> String {
        let address = address.trim();
        let is_target = if self.family.is_case_insensitive() {
            address.eq_ignore_ascii_case(&self.address)
        } else {
            address == self.address
        };
        if is_target {
            self.address.clone()
        } else {
            canonical_form(self.family, address)
        }
    }
}

/// One strategy run request
pub struct RunContext<'a> {
    /// Strategy to execute
    pub strategy: &'static StrategyDefinition,
    /// Investigation target
    pub target: &'a Target,
    /// Graph generation the run was started in
    pub generation: u64,
    /// Progress sink (0-100)
    pub progress: &'a (dyn Fn(u8) + Send + Sync),
}

/// Strategy executor over the shared components
pub struct StrategyRunner {
    registry: Arc<ExplorerRegistry>,
    pipeline: Arc<ScrapingPipeline>,
    categorizer: Arc<AddressCategorizer>,
    graph: Arc<GraphBuilder>,
    events: Arc<EventFeed>,
    limit: usize,
    enrich_details: bool,
    max_categorized: usize,
}

impl StrategyRunner {
    /// Create a runner
    pub fn new(
        registry: Arc<ExplorerRegistry>,
        pipeline: Arc<ScrapingPipeline>,
        categorizer: Arc<AddressCategorizer>,
        graph: Arc<GraphBuilder>,
        events: Arc<EventFeed>,
        pipeline_config: &PipelineConfig,
        categorizer_config: &CategorizerConfig,
    ) -> Self {
        Self {
            registry,
            pipeline,
            categorizer,
            graph,
            events,
            limit: pipeline_config.default_limit,
            enrich_details: pipeline_config.enrich_details,
            max_categorized: categorizer_config.max_addresses,
        }
    }

    /// Override the transaction limit per run
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    /// Transaction limit per run
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    fn step(&self, ctx: &RunContext<'_>, step: &str) {
        self.events.emit(InvestigationEvent::StepStarted {
            strategy: ctx.strategy.id,
            step: step.to_string(),
        });
    }

    fn log(&self, ctx: &RunContext<'_>, message: String) {
        self.events.emit(InvestigationEvent::StepLog {
            strategy: Some(ctx.strategy.id),
            message,
        });
    }

    /// Run a strategy; returns the number of distinct counterparties found
    ///
    /// # Errors
    ///
    /// Missing explorers, session and navigation failures, and
    /// [`Error::Cancelled`](crate::Error::Cancelled) when the graph was reset
    /// during the run.
    pub async fn run(&self, ctx: &RunContext<'_>) -> Result<usize> {
        let def = ctx.strategy;
        let chain = ctx.target.family.chain();

        self.step(ctx, "resolve_explorer");
        let explorer = self.registry.resolve(chain, def.explorer)?;
        self.log(ctx, format!("Using {} ({}) for {chain}", explorer.name, explorer.category));
        (ctx.progress)(10);

        self.step(ctx, "scrape");
        let request = ScrapeRequest::new(explorer, &ctx.target.address, self.limit)
            .with_focus(def.focus)
            .with_enrichment(def.enrich && self.enrich_details);
        let result = self.pipeline.run(request).await?;
        self.events.emit(InvestigationEvent::TransactionsFound {
            strategy: def.id,
            explorer: explorer.name.clone(),
            count: result.metadata.scraped,
            total: result.metadata.total,
        });
        (ctx.progress)(50);

        self.step(ctx, "categorize");
        let counterparties = counterparties(ctx.target, &result.transactions);
        let selected: Vec<String> =
            counterparties.iter().take(self.max_categorized).cloned().collect();
        let infos = self.categorizer.categorize_all(ctx.target.family, &selected).await;
        let failed = infos.iter().filter(|info| info.is_failed()).count();
        self.events.emit(InvestigationEvent::CategorizationComplete {
            strategy: def.id,
            categorized: infos.len(),
            failed,
        });
        if counterparties.len() > selected.len() {
            self.log(
                ctx,
                format!(
                    "{} further counterparties left uncategorized",
                    counterparties.len() - selected.len()
                ),
            );
        }
        (ctx.progress)(80);

        self.step(ctx, "merge");
        let mut nodes = vec![Node::new(ctx.target.address.clone(), NodeCategory::Main)];
        nodes.extend(infos.iter().map(|info| info.to_node()));
        let edges = edges(ctx, &result.transactions);
        let stats = self.graph.merge_scoped(ctx.generation, GraphBatch { nodes, edges })?;
        debug!(
            strategy = %def.id,
            nodes_added = stats.nodes_added,
            edges_added = stats.edges_added,
            "Strategy results merged"
        );
        self.log(
            ctx,
            format!(
                "Merged {} new addresses and {} new relationships",
                stats.nodes_added, stats.edges_added
            ),
        );
        (ctx.progress)(100);

        info!(strategy = %def.id, discovered = counterparties.len(), "Strategy run finished");
        Ok(counterparties.len())
    }
}

/// Distinct counterparties in first-seen order, target excluded
fn counterparties(target: &Target, transactions: &[Transaction]) -> Vec<String> {
    let mut seen = HashSet::new();
    transactions
        .iter()
        .flat_map(Transaction::parties)
        .map(|party| target.canonicalize(party))
        .filter(|party| !party.is_empty() && *party != target.address)
        .filter(|party| seen.insert(party.clone()))
        .collect()
}

/// One edge per transaction with both parties visible
fn edges(ctx: &RunContext<'_>, transactions: &[Transaction]) -> Vec<Edge> {
    transactions
        .iter()
        .filter_map(|tx| {
            let (Some(from), Some(to)) = (tx.from.as_deref(), tx.to.as_deref()) else {
                debug!(hash = %tx.hash, "Skipping transaction without both parties");
                return None;
            };
            let mut edge = Edge::new(
                ctx.target.canonicalize(from),
                ctx.target.canonicalize(to),
                tx.hash.clone(),
                ctx.strategy.edge_type,
            );
            edge.value.clone_from(&tx.value);
            edge.timestamp = tx.observed_at();
            edge.strategy = Some(ctx.strategy.id);
            Some(edge)
        })
        .collect()
}
