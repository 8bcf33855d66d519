//! Investigation context
//!
//! Owns every component of one investigation and wires them together:
//! classifier and registry lookups, the session factory shared by the
//! pipeline and the categorizer, the graph builder, the scheduler and the
//! event feed. Nothing here is global; build one [`Investigation`] per target.
//!
//! Dispatch loop:
//!
//! ```text
//! start/resume ─► dispatch(ticket) ─► spawn run ─► complete(ticket)
//!                      ▲                                │
//!                      └── promote_next ◄── advance_delay ┘
//! ```
//!
//! Pause, stop and reset cancel the in-flight run and bump the scheduler
//! epoch, so a run that finishes anyway cannot advance the queue.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sleuth_core::{BlockchainFamily, Classification, ExplorerRegistry, StrategyId, classify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::automation::{Automation, SessionFactory};
use crate::categorizer::AddressCategorizer;
use crate::config::Config;
use crate::events::{EventFeed, InvestigationEvent};
use crate::failsafe::Failsafe;
use crate::graph::{GraphBuilder, GraphRecord, GraphStore, JsonFileGraphStore, MemoryGraphStore};
use crate::pipeline::ScrapingPipeline;
use crate::strategy::{
    Completion, InvestigationState, RunContext, RunTicket, StrategyEntry, StrategyOutcome,
    StrategyRunner, StrategyScheduler, StrategyStats, StrategyStatus, Target, applicable,
    definition,
};
use crate::{Error, Result};

/// Read-only view of an investigation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestigationSnapshot {
    /// Investigation id
    pub id: Uuid,
    /// Target address as submitted
    pub target: Option<String>,
    /// Target family
    pub family: Option<BlockchainFamily>,
    /// State
    pub state: InvestigationState,
    /// Strategy queue
    pub strategies: Vec<StrategyEntry>,
    /// Accumulated graph
    pub graph: GraphRecord,
}

/// One investigation and everything it owns
pub struct Investigation {
    id: RwLock<Uuid>,
    target: RwLock<Option<Target>>,
    registry: Arc<ExplorerRegistry>,
    pipeline: Arc<ScrapingPipeline>,
    categorizer: Arc<AddressCategorizer>,
    graph: Arc<GraphBuilder>,
    scheduler: StrategyScheduler,
    runner: StrategyRunner,
    stats: Arc<StrategyStats>,
    events: Arc<EventFeed>,
    store: Arc<dyn GraphStore>,
    cancel: Mutex<CancellationToken>,
    advance_delay: Duration,
}

impl Investigation {
    /// Build an investigation over an automation backend and a loaded registry
    pub fn new(
        config: &Config,
        automation: Arc<dyn Automation>,
        registry: ExplorerRegistry,
    ) -> Self {
        let registry = Arc::new(registry);
        let sessions = Arc::new(SessionFactory::new(
            automation,
            Failsafe::new(&config.failsafe),
            &config.automation,
        ));
        let pipeline = Arc::new(ScrapingPipeline::new(Arc::clone(&sessions), &config.pipeline));
        let categorizer = Arc::new(AddressCategorizer::new(
            sessions,
            Arc::clone(&registry),
            &config.categorizer,
        ));
        let graph = Arc::new(GraphBuilder::new());
        let events = Arc::new(EventFeed::default());
        let runner = StrategyRunner::new(
            Arc::clone(&registry),
            Arc::clone(&pipeline),
            Arc::clone(&categorizer),
            Arc::clone(&graph),
            Arc::clone(&events),
            &config.pipeline,
            &config.categorizer,
        );
        let store: Arc<dyn GraphStore> = match &config.store.directory {
            Some(directory) => Arc::new(JsonFileGraphStore::new(directory)),
            None => Arc::new(MemoryGraphStore::new()),
        };

        Self {
            id: RwLock::new(Uuid::new_v4()),
            target: RwLock::new(None),
            registry,
            pipeline,
            categorizer,
            graph,
            scheduler: StrategyScheduler::new(Arc::clone(&events)),
            runner,
            stats: Arc::new(StrategyStats::new()),
            events,
            store,
            cancel: Mutex::new(CancellationToken::new()),
            advance_delay: config.scheduler.effective_advance_delay(),
        }
    }

    /// Build from configuration, loading the explorer registry it names
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the registry file is unusable.
    pub fn from_config(config: &Config, automation: Arc<dyn Automation>) -> Result<Self> {
        let registry = config.explorers.load_registry()?;
        Ok(Self::new(config, automation, registry))
    }

    /// Share strategy statistics with other investigations
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<StrategyStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Use a specific graph store
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn GraphStore>) -> Self {
        self.store = store;
        self
    }

    /// Override the transaction limit per strategy run
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.runner.set_limit(limit);
        self
    }

    /// Investigation id (renewed on reset)
    #[must_use]
    pub fn id(&self) -> Uuid {
        *self.id.read()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> InvestigationState {
        self.scheduler.state()
    }

    /// Current target
    #[must_use]
    pub fn target(&self) -> Option<Target> {
        self.target.read().clone()
    }

    /// Explorer registry
    #[must_use]
    pub fn registry(&self) -> &ExplorerRegistry {
        &self.registry
    }

    /// Scraping pipeline
    #[must_use]
    pub fn pipeline(&self) -> &ScrapingPipeline {
        &self.pipeline
    }

    /// Address categorizer
    #[must_use]
    pub fn categorizer(&self) -> &AddressCategorizer {
        &self.categorizer
    }

    /// Graph builder
    #[must_use]
    pub fn graph(&self) -> &GraphBuilder {
        &self.graph
    }

    /// Strategy statistics
    #[must_use]
    pub fn stats(&self) -> &StrategyStats {
        &self.stats
    }

    /// Event feed
    #[must_use]
    pub fn events(&self) -> &EventFeed {
        &self.events
    }

    /// Set the target address of an idle investigation
    ///
    /// # Errors
    ///
    /// [`Error::InvalidAddress`] for blank input, [`Error::InvalidTransition`]
    /// unless the investigation is idle.
    pub fn submit(&self, address: &str) -> Result<Classification> {
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::InvalidAddress("address is empty".into()));
        }
        let state = self.scheduler.state();
        if state != InvestigationState::Idle {
            return Err(Error::InvalidTransition(format!(
                "cannot submit a new address to a {state} investigation; reset first"
            )));
        }

        let classification = classify(address);
        *self.target.write() = Some(Target {
            address: address.to_string(),
            family: classification.family,
        });
        info!(
            address,
            family = %classification.family,
            strategies = classification.strategies.len(),
            "Target submitted"
        );
        self.events.emit(InvestigationEvent::StepLog {
            strategy: None,
            message: format!(
                "{address} classified as {} with {} applicable strategies",
                classification.family,
                classification.strategies.len()
            ),
        });
        Ok(classification)
    }

    fn require_target(&self) -> Result<Target> {
        self.target()
            .ok_or_else(|| Error::InvalidTransition("no target address submitted".into()))
    }

    /// Queue a strategy
    ///
    /// # Errors
    ///
    /// [`Error::StrategyNotApplicable`] if the target's family does not unlock
    /// it, plus the scheduler's own errors.
    pub fn add_strategy(&self, id: StrategyId) -> Result<()> {
        let target = self.require_target()?;
        if !target.family.strategies().contains(&id) {
            return Err(Error::StrategyNotApplicable {
                strategy: id.to_string(),
                family: target.family.to_string(),
            });
        }
        self.scheduler.add(id, definition(id).name)
    }

    /// Queue every applicable strategy not queued yet
    ///
    /// # Errors
    ///
    /// See [`add_strategy`](Self::add_strategy).
    pub fn add_applicable_strategies(&self) -> Result<Vec<StrategyId>> {
        let target = self.require_target()?;
        let queued: Vec<StrategyId> =
            self.scheduler.snapshot().strategies.iter().map(|e| e.id).collect();
        let mut added = Vec::new();
        for def in applicable(target.family) {
            if queued.contains(&def.id) {
                continue;
            }
            self.scheduler.add(def.id, def.name)?;
            added.push(def.id);
        }
        Ok(added)
    }

    /// Start dispatching the queue
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] unless the investigation is ready.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.require_target()?;
        let cancel = self.cancel.lock();
        let ticket = self.scheduler.start()?;
        let token = cancel.clone();
        drop(cancel);
        self.dispatch(ticket, token);
        Ok(())
    }

    /// Pause; the running strategy is interrupted and resumes from scratch
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] unless the investigation is active.
    pub fn pause(&self) -> Result<()> {
        let mut cancel = self.cancel.lock();
        let paused = self.scheduler.pause()?;
        renew(&mut cancel);
        drop(cancel);
        debug!(strategy = ?paused, "Investigation paused");
        Ok(())
    }

    /// Resume a paused investigation
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] unless the investigation is paused.
    pub fn resume(self: &Arc<Self>) -> Result<()> {
        let cancel = self.cancel.lock();
        let resumed = self.scheduler.resume()?;
        let token = cancel.clone();
        drop(cancel);
        match resumed {
            Some(ticket) => self.dispatch(ticket, token),
            None if self.scheduler.state() == InvestigationState::Completed => {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.on_completed().await });
            }
            None => {}
        }
        Ok(())
    }

    /// Clear the queue and return to idle; target and graph are kept
    pub fn stop(&self) {
        self.halt();
    }

    /// Clear queue, graph and target to start over
    pub fn reset(&self) {
        self.halt();
        let generation = self.graph.clear();
        *self.target.write() = None;
        let id = Uuid::new_v4();
        *self.id.write() = id;
        info!(%id, generation, "Investigation reset");
        self.events.emit(InvestigationEvent::StepLog {
            strategy: None,
            message: "Investigation reset".into(),
        });
    }

    /// Read-only view of state, queue and graph
    #[must_use]
    pub fn snapshot(&self) -> InvestigationSnapshot {
        let target = self.target();
        let queue = self.scheduler.snapshot();
        InvestigationSnapshot {
            id: self.id(),
            family: target.as_ref().map(|t| t.family),
            target: target.map(|t| t.address),
            state: queue.state,
            strategies: queue.strategies,
            graph: self.graph.record(),
        }
    }

    /// Wait until the investigation completes or returns to idle
    pub async fn wait_for_completion(&self) -> InvestigationState {
        let mut state = self.scheduler.watch_state();
        let result = state
            .wait_for(|s| matches!(s, InvestigationState::Completed | InvestigationState::Idle))
            .await;
        result.map_or(InvestigationState::Idle, |s| *s)
    }

    /// Persist the graph under the investigation id
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn save(&self) -> Result<()> {
        let id = self.id().to_string();
        self.store.save(&id, &self.graph.record()).await
    }

    /// Load a stored graph into an idle investigation
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] unless idle, [`Error::Store`] if no
    /// snapshot exists, plus store and validation errors.
    pub async fn restore(&self, id: &str) -> Result<()> {
        if self.scheduler.state() != InvestigationState::Idle {
            return Err(Error::InvalidTransition("restore requires an idle investigation".into()));
        }
        let record = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| Error::Store(format!("no snapshot '{id}'")))?;
        self.graph.restore(record)?;
        Ok(())
    }

    // Scheduler transitions that issue or revoke tickets run under the
    // cancellation lock, so a ticket always pairs with the token that is live
    // for its epoch.
    fn halt(&self) {
        let mut cancel = self.cancel.lock();
        self.scheduler.stop();
        renew(&mut cancel);
    }

    fn dispatch(self: &Arc<Self>, ticket: RunTicket, token: CancellationToken) {
        let Some(target) = self.target() else {
            warn!(strategy = %ticket.strategy, "Dispatch without a target");
            return;
        };
        let generation = self.graph.generation();
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let scheduler = &this.scheduler;
            let progress = move |value: u8| {
                scheduler.report_progress(ticket, value);
            };
            let ctx = RunContext {
                strategy: definition(ticket.strategy),
                target: &target,
                generation,
                progress: &progress,
            };

            let result = tokio::select! {
                () = token.cancelled() => {
                    debug!(strategy = %ticket.strategy, "Strategy run cancelled");
                    return;
                }
                result = this.runner.run(&ctx) => result,
            };
            this.finish(ticket, result).await;
        });
    }

    async fn finish(self: &Arc<Self>, ticket: RunTicket, result: Result<usize>) {
        let outcome = match result {
            Ok(discovered) => StrategyOutcome::Succeeded { discovered },
            Err(Error::Cancelled) => {
                debug!(strategy = %ticket.strategy, "Run belonged to a cleared graph");
                return;
            }
            Err(e) => {
                warn!(strategy = %ticket.strategy, error = %e, "Strategy failed");
                StrategyOutcome::Failed { error: e.to_string() }
            }
        };

        let completion = self.scheduler.complete(ticket, outcome.clone());
        if completion == Completion::Stale {
            return;
        }

        match outcome {
            StrategyOutcome::Succeeded { discovered } => {
                self.stats.record_success(ticket.strategy, discovered);
                telemetry_metrics::counter!("sleuth_strategy_runs_total", "outcome" => "completed")
                    .increment(1);
            }
            StrategyOutcome::Failed { error } => {
                self.stats.record_failure(ticket.strategy);
                telemetry_metrics::counter!("sleuth_strategy_runs_total", "outcome" => "failed")
                    .increment(1);
                self.events.emit(InvestigationEvent::Error {
                    strategy: Some(ticket.strategy),
                    message: error,
                });
            }
        }

        match completion {
            Completion::Advance => {
                tokio::time::sleep(self.advance_delay).await;
                let (next, token) = {
                    let cancel = self.cancel.lock();
                    (self.scheduler.promote_next(), cancel.clone())
                };
                if let Some(next) = next {
                    self.dispatch(next, token);
                }
            }
            Completion::InvestigationCompleted => self.on_completed().await,
            Completion::Stale => {}
        }
    }

    async fn on_completed(&self) {
        let queue = self.scheduler.snapshot();
        let count = |status| queue.strategies.iter().filter(|e| e.status == status).count();
        let (nodes, edges) = self.graph.size();
        info!(nodes, edges, "Investigation completed");
        self.events.emit(InvestigationEvent::InvestigationCompleted {
            completed: count(StrategyStatus::Completed),
            failed: count(StrategyStatus::Failed),
            nodes,
            edges,
        });
        if let Err(e) = self.save().await {
            warn!(error = %e, "Failed to persist graph snapshot");
        }
    }
}

fn renew(token: &mut CancellationToken) {
    token.cancel();
    *token = CancellationToken::new();
}
