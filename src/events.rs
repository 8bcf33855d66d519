//! Progress and event feed
//!
//! The core renders nothing; it emits typed events in order and any number of
//! subscribers consume them. Every event gets a sequence number at emission,
//! and emission is serialized so subscribers see sequence order.

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sleuth_core::StrategyId;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use crate::strategy::{InvestigationState, StrategyStatus};

/// Events buffered per subscriber before it starts lagging
pub const DEFAULT_CAPACITY: usize = 1024;

/// Something the presentation layer may want to show
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InvestigationEvent {
    /// Investigation state transition
    StateChanged {
        /// Previous state
        from: InvestigationState,
        /// New state
        to: InvestigationState,
    },
    /// A strategy began running
    StrategyStarted {
        /// Strategy
        strategy: StrategyId,
    },
    /// A step inside a strategy began
    StepStarted {
        /// Strategy
        strategy: StrategyId,
        /// Step name
        step: String,
    },
    /// Free-form log line
    StepLog {
        /// Strategy, if the line belongs to one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strategy: Option<StrategyId>,
        /// Message
        message: String,
    },
    /// A scrape returned
    TransactionsFound {
        /// Strategy
        strategy: StrategyId,
        /// Explorer name
        explorer: String,
        /// Transactions kept
        count: usize,
        /// Transactions observed before truncation
        total: usize,
    },
    /// Counterparties were categorized
    CategorizationComplete {
        /// Strategy
        strategy: StrategyId,
        /// Addresses categorized
        categorized: usize,
        /// Of those, how many degraded to `unknown` on failure
        failed: usize,
    },
    /// A strategy reached a terminal state
    StrategyCompleted {
        /// Strategy
        strategy: StrategyId,
        /// Terminal status
        status: StrategyStatus,
        /// Addresses discovered
        discovered: usize,
        /// Error of a failed run
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Every strategy is terminal
    InvestigationCompleted {
        /// Strategies completed
        completed: usize,
        /// Strategies failed
        failed: usize,
        /// Graph nodes
        nodes: usize,
        /// Graph edges
        edges: usize,
    },
    /// Error surfaced to the analyst
    Error {
        /// Strategy, if the error belongs to one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strategy: Option<StrategyId>,
        /// Message
        message: String,
    },
}

/// Event with its position in the feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Sequence number, starting at 1
    pub seq: u64,
    /// Emission time
    pub timestamp: DateTime<Utc>,
    /// Event
    #[serde(flatten)]
    pub event: InvestigationEvent,
}

/// Broadcast feed of investigation events
pub struct EventFeed {
    tx: broadcast::Sender<EventEnvelope>,
    sequence: Mutex<u64>,
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventFeed {
    /// Feed buffering `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            sequence: Mutex::new(0),
        }
    }

    /// Emit an event; returns its sequence number
    pub fn emit(&self, event: InvestigationEvent) -> u64 {
        let mut sequence = self.sequence.lock();
        *sequence += 1;
        let envelope = EventEnvelope {
            seq: *sequence,
            timestamp: Utc::now(),
            event,
        };
        debug!(seq = envelope.seq, event = ?envelope.event, "Emitting event");
        // No subscribers is fine
        let _ = self.tx.send(envelope);
        *sequence
    }

    /// Subscribe from the next event on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Subscribe as a stream; lagged gaps are logged and skipped
    pub fn stream(&self) -> impl Stream<Item = EventEnvelope> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|item| async move {
            match item {
                Ok(envelope) => Some(envelope),
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!(missed, "Event subscriber lagged, events dropped");
                    None
                }
            }
        })
    }

    /// Active subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
