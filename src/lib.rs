//! Chain Sleuth Library
//!
//! Investigation orchestration engine: point it at a blockchain address and it
//! runs a queue of discovery strategies against block explorers through a
//! page-automation service, categorizes the counterparties it finds and folds
//! everything into a deduplicated relationship graph.
//!
//! # Components
//!
//! - **Classification**: address family and applicable strategies ([`sleuth_core`])
//! - **Explorer resolution**: typed registry with chain/category fallback
//! - **Scraping pipeline**: navigate, search, extract, paginate, enrich
//! - **Categorizer**: static heuristics plus explorer labels, never fails
//! - **Graph builder**: idempotent, order-independent merges
//! - **Scheduler**: one running strategy at a time, pause/resume/stop/reset
//! - **Event feed**: ordered progress notifications for any front end

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod automation;
pub mod categorizer;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod failsafe;
pub mod graph;
pub mod investigation;
pub mod pipeline;
pub mod strategy;

pub use error::{Error, Result};
pub use investigation::{Investigation, InvestigationSnapshot};
pub use sleuth_core::{
    BlockchainFamily, Classification, Explorer, ExplorerCategory, ExplorerRegistry, StrategyId,
    classify,
};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` overrides `level`. Logs go to stderr so stdout stays free for
/// command output.
///
/// # Errors
///
/// Returns [`Error::Config`] if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber.with(fmt::layer().with_writer(std::io::stderr)).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {e}")))
}
