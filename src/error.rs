//! Error types for Chain Sleuth

use std::io;

use sleuth_core::ExplorerNotFound;
use thiserror::Error;

/// Result type alias for Chain Sleuth
pub type Result<T> = std::result::Result<T, Error>;

/// Investigation engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No explorer for the requested chain/category
    #[error("Explorer not found: {0}")]
    ExplorerNotFound(#[from] ExplorerNotFound),

    /// Automation session could not be opened or was lost
    #[error("Automation session error: {0}")]
    Session(String),

    /// Navigation to the explorer failed
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// An automation call exceeded its time budget
    #[error("Automation timeout: {0}")]
    AutomationTimeout(String),

    /// Automation action (search, pagination) failed
    #[error("Automation action failed: {0}")]
    Action(String),

    /// Structured extraction failed or returned malformed data
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Submitted address cannot be investigated
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Requested state transition is not legal from the current state
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Strategy id not present in the catalog
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    /// Strategy does not apply to the target's blockchain family
    #[error("Strategy {strategy} does not apply to {family} addresses")]
    StrategyNotApplicable {
        /// Strategy id
        strategy: String,
        /// Target family
        family: String,
    },

    /// Strategy already queued in this investigation
    #[error("Strategy already queued: {0}")]
    DuplicateStrategy(String),

    /// Internal invariant violated
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// Work abandoned because of pause, stop or reset
    #[error("Cancelled")]
    Cancelled,

    /// Graph store failure
    #[error("Store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Whether retrying the same call may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Session(_) | Self::AutomationTimeout(_) | Self::Http(_) | Self::Io(_)
        )
    }

    /// Whether the error ends the strategy run that raised it.
    ///
    /// Everything else is recovered inside the pipeline as "fewer results".
    #[must_use]
    pub fn is_fatal_for_strategy(&self) -> bool {
        !matches!(
            self,
            Self::AutomationTimeout(_) | Self::Action(_) | Self::Extraction(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Session("refused".into()).is_retryable());
        assert!(Error::AutomationTimeout("navigate".into()).is_retryable());
        assert!(!Error::Navigation("404".into()).is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Session("gone".into()).is_fatal_for_strategy());
        assert!(Error::Navigation("dns".into()).is_fatal_for_strategy());
        assert!(!Error::Extraction("schema".into()).is_fatal_for_strategy());
        assert!(!Error::Action("no search box".into()).is_fatal_for_strategy());
    }

    #[test]
    fn test_explorer_not_found_converts() {
        let err: Error = ExplorerNotFound {
            chain: "z".into(),
            category: "general".into(),
        }
        .into();
        assert!(err.to_string().contains("chain 'z'"));
    }
}
