//! Strategy queue and investigation state machine
//!
//! ```text
//! investigation:  idle ─► ready ─► active ◄─► paused
//!                   ▲                 │
//!                   └──── completed ◄─┘        (stop/reset from anywhere ─► idle)
//!
//! strategy:       idle ─► queued ─► running ─► completed | failed
//!                                      ▲ │
//!                                      │ ▼
//!                                    paused
//! ```
//!
//! Every transition runs under one lock and re-checks its preconditions, so
//! at most one strategy is `running` at any instant. Each dispatch carries a
//! [`RunTicket`] stamped with the queue epoch; pause, stop and reset bump the
//! epoch, which turns any result still in flight into a stale completion.
//!
//! State changes, strategy starts and strategy completions are emitted on the
//! event feed while the queue lock is held, so the feed order matches the
//! order of transitions.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sleuth_core::StrategyId;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::events::{EventFeed, InvestigationEvent};
use crate::{Error, Result};

/// Top-level investigation state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationState {
    /// No strategies queued
    #[default]
    Idle,
    /// Strategies queued, not started
    Ready,
    /// Dispatching strategies
    Active,
    /// Suspended by the analyst
    Paused,
    /// Every strategy is terminal
    Completed,
}

impl fmt::Display for InvestigationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        })
    }
}

/// Status of a queued strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStatus {
    /// Added before the investigation started
    Idle,
    /// Waiting for its turn
    Queued,
    /// Executing
    Running,
    /// Interrupted by a pause
    Paused,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl StrategyStatus {
    /// Whether the strategy is done
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// One queue entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyEntry {
    /// Strategy
    pub id: StrategyId,
    /// Display name
    pub name: String,
    /// Status
    pub status: StrategyStatus,
    /// Progress 0-100, never decreasing while running
    pub progress: u8,
    /// Addresses discovered by the last run
    pub discovered: usize,
    /// First time the strategy started running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the strategy became terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Error of a failed run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl StrategyEntry {
    fn new(id: StrategyId, name: &str, status: StrategyStatus) -> Self {
        Self {
            id,
            name: name.to_string(),
            status,
            progress: 0,
            discovered: 0,
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }
}

/// Permission to run one strategy, valid until the next pause, stop or reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTicket {
    /// Strategy to run
    pub strategy: StrategyId,
    epoch: u64,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// The run finished
    Succeeded {
        /// Addresses discovered
        discovered: usize,
    },
    /// The run failed
    Failed {
        /// Error message shown in the strategy list
        error: String,
    },
}

/// Result of reporting a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The ticket was invalidated; nothing changed
    Stale,
    /// Recorded; more strategies are queued
    Advance,
    /// Recorded; every strategy is terminal
    InvestigationCompleted,
}

/// Read-only view of the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Investigation state
    pub state: InvestigationState,
    /// Queue in order
    pub strategies: Vec<StrategyEntry>,
}

#[derive(Debug, Default)]
struct Queue {
    state: InvestigationState,
    entries: Vec<StrategyEntry>,
    epoch: u64,
}

impl Queue {
    fn running(&self) -> Option<usize> {
        self.entries.iter().position(|e| e.status == StrategyStatus::Running)
    }

    fn all_terminal(&self) -> bool {
        self.entries.iter().all(|e| e.status.is_terminal())
    }

    fn check_invariant(&self) {
        debug_assert!(
            self.entries
                .iter()
                .filter(|e| e.status == StrategyStatus::Running)
                .count()
                <= 1,
            "more than one running strategy: {:?}",
            self.entries
        );
    }

    /// Move entry `index` to running and issue its ticket
    fn promote(&mut self, index: usize) -> RunTicket {
        let entry = &mut self.entries[index];
        entry.status = StrategyStatus::Running;
        entry.started_at.get_or_insert_with(Utc::now);
        let ticket = RunTicket {
            strategy: entry.id,
            epoch: self.epoch,
        };
        self.check_invariant();
        ticket
    }

    fn next_with(&self, status: StrategyStatus) -> Option<usize> {
        self.entries.iter().position(|e| e.status == status)
    }
}

/// Strategy queue of one investigation
pub struct StrategyScheduler {
    queue: Mutex<Queue>,
    state_tx: watch::Sender<InvestigationState>,
    events: Arc<EventFeed>,
}

impl Default for StrategyScheduler {
    fn default() -> Self {
        Self::new(Arc::new(EventFeed::default()))
    }
}

impl StrategyScheduler {
    /// Empty, idle scheduler emitting on `events`
    #[must_use]
    pub fn new(events: Arc<EventFeed>) -> Self {
        let (state_tx, _) = watch::channel(InvestigationState::Idle);
        Self {
            queue: Mutex::new(Queue::default()),
            state_tx,
            events,
        }
    }

    /// Current investigation state
    #[must_use]
    pub fn state(&self) -> InvestigationState {
        self.queue.lock().state
    }

    /// Watch investigation state changes
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<InvestigationState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, queue: &mut Queue, state: InvestigationState) {
        if queue.state != state {
            info!(from = %queue.state, to = %state, "Investigation state changed");
            self.events.emit(InvestigationEvent::StateChanged {
                from: queue.state,
                to: state,
            });
            queue.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn promote(&self, queue: &mut Queue, index: usize) -> RunTicket {
        let ticket = queue.promote(index);
        info!(strategy = %ticket.strategy, "Strategy running");
        self.events.emit(InvestigationEvent::StrategyStarted {
            strategy: ticket.strategy,
        });
        ticket
    }

    /// Append a strategy.
    ///
    /// Idle and ready investigations take it as `idle` (and become ready);
    /// running or paused ones queue it behind the rest.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateStrategy`] if already queued, [`Error::InvalidTransition`]
    /// on a completed investigation.
    pub fn add(&self, id: StrategyId, name: &str) -> Result<()> {
        let mut queue = self.queue.lock();
        if queue.entries.iter().any(|e| e.id == id) {
            return Err(Error::DuplicateStrategy(id.to_string()));
        }
        let status = match queue.state {
            InvestigationState::Idle | InvestigationState::Ready => StrategyStatus::Idle,
            InvestigationState::Active | InvestigationState::Paused => StrategyStatus::Queued,
            InvestigationState::Completed => {
                return Err(Error::InvalidTransition(
                    "investigation completed; reset before adding strategies".into(),
                ));
            }
        };
        queue.entries.push(StrategyEntry::new(id, name, status));
        debug!(strategy = %id, %status, "Strategy added");
        if queue.state == InvestigationState::Idle {
            self.set_state(&mut queue, InvestigationState::Ready);
        }
        Ok(())
    }

    /// Start dispatching: ready -> active, first strategy runs, the rest queue
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] unless the investigation is ready.
    pub fn start(&self) -> Result<RunTicket> {
        let mut queue = self.queue.lock();
        if queue.state != InvestigationState::Ready {
            return Err(Error::InvalidTransition(format!(
                "cannot start a {} investigation",
                queue.state
            )));
        }
        for entry in &mut queue.entries {
            if entry.status == StrategyStatus::Idle {
                entry.status = StrategyStatus::Queued;
            }
        }
        let Some(index) = queue.next_with(StrategyStatus::Queued) else {
            return Err(Error::Invariant("ready investigation without queued strategies".into()));
        };
        self.set_state(&mut queue, InvestigationState::Active);
        Ok(self.promote(&mut queue, index))
    }

    /// Record the end of a run
    pub fn complete(&self, ticket: RunTicket, outcome: StrategyOutcome) -> Completion {
        let mut queue = self.queue.lock();
        if ticket.epoch != queue.epoch {
            debug!(strategy = %ticket.strategy, "Ignoring completion from an earlier epoch");
            return Completion::Stale;
        }
        let Some(entry) = queue
            .entries
            .iter_mut()
            .find(|e| e.id == ticket.strategy && e.status == StrategyStatus::Running)
        else {
            debug!(
                strategy = %ticket.strategy,
                "Ignoring completion for a strategy that is not running"
            );
            return Completion::Stale;
        };

        entry.completed_at = Some(Utc::now());
        match outcome {
            StrategyOutcome::Succeeded { discovered } => {
                entry.status = StrategyStatus::Completed;
                entry.progress = 100;
                entry.discovered = discovered;
                entry.last_error = None;
            }
            StrategyOutcome::Failed { error } => {
                entry.status = StrategyStatus::Failed;
                entry.last_error = Some(error);
            }
        }
        info!(strategy = %ticket.strategy, status = %entry.status, "Strategy finished");
        self.events.emit(InvestigationEvent::StrategyCompleted {
            strategy: entry.id,
            status: entry.status,
            discovered: entry.discovered,
            error: entry.last_error.clone(),
        });

        debug_assert!(queue.running().is_none(), "another strategy ran concurrently");
        if queue.all_terminal() {
            self.set_state(&mut queue, InvestigationState::Completed);
            Completion::InvestigationCompleted
        } else {
            Completion::Advance
        }
    }

    /// Promote the next queued strategy if nothing is running.
    ///
    /// Returns `None` when the transition no longer applies (paused, stopped,
    /// another promotion won, or the queue is drained).
    pub fn promote_next(&self) -> Option<RunTicket> {
        let mut queue = self.queue.lock();
        if queue.state != InvestigationState::Active {
            return None;
        }
        if let Some(index) = queue.running() {
            debug!(
                running = %queue.entries[index].id,
                "Promotion abandoned, a strategy is running"
            );
            return None;
        }
        let index = queue.next_with(StrategyStatus::Queued)?;
        Some(self.promote(&mut queue, index))
    }

    /// Report progress for a running strategy; values never decrease
    pub fn report_progress(&self, ticket: RunTicket, progress: u8) -> bool {
        let mut queue = self.queue.lock();
        if ticket.epoch != queue.epoch {
            return false;
        }
        match queue
            .entries
            .iter_mut()
            .find(|e| e.id == ticket.strategy && e.status == StrategyStatus::Running)
        {
            Some(entry) => {
                entry.progress = entry.progress.max(progress.min(100));
                true
            }
            None => false,
        }
    }

    /// active -> paused; the running strategy is paused, queued ones stay queued
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] unless the investigation is active.
    pub fn pause(&self) -> Result<Option<StrategyId>> {
        let mut queue = self.queue.lock();
        if queue.state != InvestigationState::Active {
            return Err(Error::InvalidTransition(format!(
                "cannot pause a {} investigation",
                queue.state
            )));
        }
        queue.epoch += 1;
        let paused = queue.running().map(|index| {
            let entry = &mut queue.entries[index];
            entry.status = StrategyStatus::Paused;
            entry.id
        });
        self.set_state(&mut queue, InvestigationState::Paused);
        Ok(paused)
    }

    /// paused -> active; a paused strategy is preferred over a fresh one.
    ///
    /// Returns the ticket to dispatch, or `None` if nothing was left to run
    /// (the investigation then completes).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] unless the investigation is paused.
    pub fn resume(&self) -> Result<Option<RunTicket>> {
        let mut queue = self.queue.lock();
        if queue.state != InvestigationState::Paused {
            return Err(Error::InvalidTransition(format!(
                "cannot resume a {} investigation",
                queue.state
            )));
        }
        if queue.running().is_some() {
            return Err(Error::Invariant("paused investigation has a running strategy".into()));
        }
        let next = queue
            .next_with(StrategyStatus::Paused)
            .or_else(|| queue.next_with(StrategyStatus::Queued));
        match next {
            Some(index) => {
                self.set_state(&mut queue, InvestigationState::Active);
                Ok(Some(self.promote(&mut queue, index)))
            }
            None => {
                let state = if queue.all_terminal() && !queue.entries.is_empty() {
                    InvestigationState::Completed
                } else {
                    InvestigationState::Active
                };
                self.set_state(&mut queue, state);
                Ok(None)
            }
        }
    }

    /// Clear the queue and return to idle; in-flight results become stale
    pub fn stop(&self) {
        let mut queue = self.queue.lock();
        queue.epoch += 1;
        queue.entries.clear();
        self.set_state(&mut queue, InvestigationState::Idle);
    }

    /// Strategy currently running
    #[must_use]
    pub fn running(&self) -> Option<StrategyId> {
        let queue = self.queue.lock();
        queue.running().map(|index| queue.entries[index].id)
    }

    /// Copy of the queue
    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let queue = self.queue.lock();
        SchedulerSnapshot {
            state: queue.state,
            strategies: queue.entries.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn running_count(scheduler: &StrategyScheduler) -> usize {
        scheduler
            .snapshot()
            .strategies
            .iter()
            .filter(|e| e.status == StrategyStatus::Running)
            .count()
    }

    fn status(scheduler: &StrategyScheduler, id: StrategyId) -> StrategyStatus {
        scheduler
            .snapshot()
            .strategies
            .into_iter()
            .find(|e| e.id == id)
            .map(|e| e.status)
            .unwrap()
    }

    fn three() -> StrategyScheduler {
        let scheduler = StrategyScheduler::default();
        for id in [
            StrategyId::TokenTransfers,
            StrategyId::NftTransfers,
            StrategyId::CounterpartyScan,
        ] {
            scheduler.add(id, id.as_str()).unwrap();
        }
        scheduler
    }

    fn done() -> StrategyOutcome {
        StrategyOutcome::Succeeded { discovered: 1 }
    }

    #[test]
    fn test_first_add_makes_ready() {
        let scheduler = StrategyScheduler::default();
        assert_eq!(scheduler.state(), InvestigationState::Idle);
        scheduler.add(StrategyId::TokenTransfers, "Token transfers").unwrap();
        assert_eq!(scheduler.state(), InvestigationState::Ready);
        assert!(matches!(
            scheduler.add(StrategyId::TokenTransfers, "again"),
            Err(Error::DuplicateStrategy(_))
        ));
    }

    #[test]
    fn test_start_runs_exactly_one() {
        let scheduler = three();
        let ticket = scheduler.start().unwrap();
        assert_eq!(ticket.strategy, StrategyId::TokenTransfers);
        assert_eq!(scheduler.state(), InvestigationState::Active);
        assert_eq!(running_count(&scheduler), 1);
        assert_eq!(status(&scheduler, StrategyId::NftTransfers), StrategyStatus::Queued);
        assert!(scheduler.start().is_err());
    }

    #[test]
    fn test_queue_runs_in_order_to_completion() {
        let scheduler = three();
        let mut ticket = scheduler.start().unwrap();
        let mut order = vec![ticket.strategy];
        loop {
            match scheduler.complete(ticket, done()) {
                Completion::Advance => {
                    ticket = scheduler.promote_next().unwrap();
                    order.push(ticket.strategy);
                }
                Completion::InvestigationCompleted => break,
                Completion::Stale => panic!("unexpected stale completion"),
            }
            assert!(running_count(&scheduler) <= 1);
        }
        assert_eq!(
            order,
            vec![StrategyId::TokenTransfers, StrategyId::NftTransfers, StrategyId::CounterpartyScan]
        );
        assert_eq!(scheduler.state(), InvestigationState::Completed);
    }

    #[test]
    fn test_failure_still_advances() {
        let scheduler = three();
        let ticket = scheduler.start().unwrap();
        let outcome = StrategyOutcome::Failed {
            error: "session refused".into(),
        };
        assert_eq!(scheduler.complete(ticket, outcome), Completion::Advance);

        let entry = &scheduler.snapshot().strategies[0];
        assert_eq!(entry.status, StrategyStatus::Failed);
        assert_eq!(entry.last_error.as_deref(), Some("session refused"));
        assert!(scheduler.promote_next().is_some());
    }

    #[test]
    fn test_double_promotion_abandoned() {
        let scheduler = three();
        let ticket = scheduler.start().unwrap();
        scheduler.complete(ticket, done());

        let first = scheduler.promote_next();
        let second = scheduler.promote_next();
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(running_count(&scheduler), 1);
    }

    #[test]
    fn test_duplicate_completion_is_stale() {
        let scheduler = three();
        let ticket = scheduler.start().unwrap();
        assert_eq!(scheduler.complete(ticket, done()), Completion::Advance);
        assert_eq!(scheduler.complete(ticket, done()), Completion::Stale);
    }

    #[test]
    fn test_pause_invalidates_in_flight_result() {
        let scheduler = three();
        let ticket = scheduler.start().unwrap();

        assert_eq!(scheduler.pause().unwrap(), Some(StrategyId::TokenTransfers));
        assert_eq!(status(&scheduler, StrategyId::TokenTransfers), StrategyStatus::Paused);
        assert_eq!(status(&scheduler, StrategyId::NftTransfers), StrategyStatus::Queued);

        assert_eq!(scheduler.complete(ticket, done()), Completion::Stale);
        assert!(scheduler.promote_next().is_none());
        assert_eq!(running_count(&scheduler), 0);
    }

    #[test]
    fn test_resume_prefers_paused_strategy() {
        let scheduler = three();
        let first = scheduler.start().unwrap();
        scheduler.pause().unwrap();

        let resumed = scheduler.resume().unwrap().unwrap();
        assert_eq!(resumed.strategy, first.strategy);
        assert_ne!(resumed, first);
        assert_eq!(scheduler.state(), InvestigationState::Active);
        assert_eq!(running_count(&scheduler), 1);
    }

    #[test]
    fn test_pause_between_strategies_resumes_next_queued() {
        let scheduler = three();
        let ticket = scheduler.start().unwrap();
        scheduler.complete(ticket, done());
        assert_eq!(scheduler.pause().unwrap(), None);

        let next = scheduler.resume().unwrap().unwrap();
        assert_eq!(next.strategy, StrategyId::NftTransfers);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let scheduler = three();
        let ticket = scheduler.start().unwrap();
        assert!(scheduler.report_progress(ticket, 50));
        assert!(scheduler.report_progress(ticket, 10));
        assert!(scheduler.report_progress(ticket, 250));
        assert_eq!(scheduler.snapshot().strategies[0].progress, 100);

        let queued = RunTicket {
            strategy: StrategyId::NftTransfers,
            epoch: 0,
        };
        assert!(!scheduler.report_progress(queued, 30));
    }

    #[test]
    fn test_stop_clears_queue() {
        let scheduler = three();
        let ticket = scheduler.start().unwrap();
        scheduler.stop();

        assert_eq!(scheduler.state(), InvestigationState::Idle);
        assert!(scheduler.snapshot().strategies.is_empty());
        assert_eq!(scheduler.complete(ticket, done()), Completion::Stale);
    }

    #[test]
    fn test_add_while_active_queues() {
        let scheduler = three();
        scheduler.start().unwrap();
        scheduler.add(StrategyId::DefiInteractions, "DeFi").unwrap();
        assert_eq!(status(&scheduler, StrategyId::DefiInteractions), StrategyStatus::Queued);
    }

    #[test]
    fn test_transitions_emitted_in_order() {
        let events = Arc::new(EventFeed::default());
        let mut rx = events.subscribe();
        let scheduler = StrategyScheduler::new(Arc::clone(&events));
        scheduler.add(StrategyId::TokenTransfers, "Token transfers").unwrap();
        let ticket = scheduler.start().unwrap();
        scheduler.complete(ticket, done());

        let mut seen = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            seen.push(envelope.event);
        }
        assert_eq!(
            seen,
            vec![
                InvestigationEvent::StateChanged {
                    from: InvestigationState::Idle,
                    to: InvestigationState::Ready
                },
                InvestigationEvent::StateChanged {
                    from: InvestigationState::Ready,
                    to: InvestigationState::Active
                },
                InvestigationEvent::StrategyStarted {
                    strategy: StrategyId::TokenTransfers
                },
                InvestigationEvent::StrategyCompleted {
                    strategy: StrategyId::TokenTransfers,
                    status: StrategyStatus::Completed,
                    discovered: 1,
                    error: None
                },
                InvestigationEvent::StateChanged {
                    from: InvestigationState::Active,
                    to: InvestigationState::Completed
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_state_watch() {
        let scheduler = three();
        let mut watch = scheduler.watch_state();
        let ticket = scheduler.start().unwrap();
        watch.changed().await.unwrap();
        assert_eq!(*watch.borrow(), InvestigationState::Active);

        scheduler.stop();
        assert_eq!(scheduler.complete(ticket, done()), Completion::Stale);
        watch.changed().await.unwrap();
        assert_eq!(*watch.borrow_and_update(), InvestigationState::Idle);
    }
}
