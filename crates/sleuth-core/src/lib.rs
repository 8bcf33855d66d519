//! Chain Sleuth core primitives
//!
//! Dependency-light building blocks shared by the investigation engine:
//!
//! - [`address`]: format-based blockchain family detection
//! - [`strategy`]: strategy identifiers and the per-family applicability table
//! - [`explorer`]: the read-only explorer registry and its resolution rules

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod explorer;
pub mod strategy;

pub use address::{BlockchainFamily, Classification, canonical_form, classify};
pub use explorer::{Explorer, ExplorerCategory, ExplorerNotFound, ExplorerRegistry};
pub use strategy::StrategyId;
