//! Per-strategy outcome statistics
//!
//! Raw counters only; the success rate is derived when read.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use sleuth_core::StrategyId;

#[derive(Debug, Default)]
struct Counters {
    successes: AtomicU64,
    failures: AtomicU64,
    discovered: AtomicU64,
}

/// Point-in-time statistics of one strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StrategyStatsSnapshot {
    /// Strategy
    pub strategy: StrategyId,
    /// Successful runs
    pub successes: u64,
    /// Failed runs
    pub failures: u64,
    /// Addresses discovered across successful runs
    pub discovered: u64,
}

impl StrategyStatsSnapshot {
    /// Total runs
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.successes + self.failures
    }

    /// Success rate in percent; `None` before the first run
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> Option<f64> {
        let runs = self.runs();
        (runs > 0).then(|| self.successes as f64 * 100.0 / runs as f64)
    }
}

/// Outcome counters keyed by strategy, shared across investigation resets
#[derive(Debug, Default)]
pub struct StrategyStats {
    counters: DashMap<StrategyId, Counters>,
}

impl StrategyStats {
    /// Empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful run
    pub fn record_success(&self, strategy: StrategyId, discovered: usize) {
        let entry = self.counters.entry(strategy).or_default();
        entry.successes.fetch_add(1, Ordering::Relaxed);
        entry
            .discovered
            .fetch_add(u64::try_from(discovered).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// Record a failed run
    pub fn record_failure(&self, strategy: StrategyId) {
        self.counters
            .entry(strategy)
            .or_default()
            .failures
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Statistics of one strategy
    #[must_use]
    pub fn get(&self, strategy: StrategyId) -> StrategyStatsSnapshot {
        let (successes, failures, discovered) = self.counters.get(&strategy).map_or((0, 0, 0), |c| {
            (
                c.successes.load(Ordering::Relaxed),
                c.failures.load(Ordering::Relaxed),
                c.discovered.load(Ordering::Relaxed),
            )
        });
        StrategyStatsSnapshot {
            strategy,
            successes,
            failures,
            discovered,
        }
    }

    /// Statistics of every strategy, in catalog order
    #[must_use]
    pub fn all(&self) -> Vec<StrategyStatsSnapshot> {
        StrategyId::ALL.into_iter().map(|id| self.get(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_is_exact() {
        let stats = StrategyStats::new();
        assert_eq!(stats.get(StrategyId::TokenTransfers).success_rate(), None);

        stats.record_success(StrategyId::TokenTransfers, 4);
        stats.record_failure(StrategyId::TokenTransfers);
        stats.record_failure(StrategyId::TokenTransfers);

        let snapshot = stats.get(StrategyId::TokenTransfers);
        assert_eq!(snapshot.runs(), 3);
        assert_eq!(snapshot.discovered, 4);
        let rate = snapshot.success_rate().unwrap();
        assert!((rate - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_drift_over_many_runs() {
        let stats = StrategyStats::new();
        for i in 0..999 {
            if i % 3 == 0 {
                stats.record_failure(StrategyId::NftTransfers);
            } else {
                stats.record_success(StrategyId::NftTransfers, 0);
            }
        }
        let snapshot = stats.get(StrategyId::NftTransfers);
        assert_eq!((snapshot.successes, snapshot.failures), (666, 333));
    }
}
