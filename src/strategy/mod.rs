//! Strategies: catalog, queue scheduling, execution and statistics

pub mod catalog;
mod runner;
mod scheduler;
mod stats;

pub use catalog::{StrategyDefinition, applicable, catalog, definition};
pub use runner::{RunContext, StrategyRunner, Target};
pub use scheduler::{
    Completion, InvestigationState, RunTicket, SchedulerSnapshot, StrategyEntry, StrategyOutcome,
    StrategyScheduler, StrategyStatus,
};
pub use stats::{StrategyStats, StrategyStatsSnapshot};
