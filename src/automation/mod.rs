//! Page-automation capability
//!
//! The automation service is a black box that navigates pages, performs
//! natural-language actions and extracts structured data against a JSON
//! schema. Everything here is fallible; callers decide which failures are
//! fatal.
//!
//! ```text
//! SessionFactory::open ──► ScopedSession ──► navigate / act / extract
//!   (rate limit + retry)      (per-call timeout)     │
//!                                                    ▼
//!                                   release()  or  Drop ──► close
//! ```
//!
//! Sessions are never shared: every pipeline call and every enrichment or
//! categorization task opens its own.

pub mod http;
pub mod scripted;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::AutomationConfig;
use crate::failsafe::{Failsafe, with_retry};
use crate::{Error, Result};

pub use http::HttpAutomation;
pub use scripted::{Fixture, ScriptedAutomation, ScriptedSite};

/// Outcome of a natural-language action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActOutcome {
    /// Whether the action was carried out
    pub success: bool,
    /// Free-form description from the automation service
    #[serde(default)]
    pub message: String,
}

impl ActOutcome {
    /// Successful outcome
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Unsuccessful outcome (the service understood but could not act)
    pub fn declined(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Named JSON schema for structured extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSchema {
    /// Schema name
    pub name: String,
    /// JSON Schema document
    pub schema: Value,
}

/// Factory for automation sessions
#[async_trait]
pub trait Automation: Send + Sync {
    /// Open a fresh session
    async fn open_session(&self) -> Result<Box<dyn AutomationSession>>;
}

/// One browser/LLM context
#[async_trait]
pub trait AutomationSession: Send {
    /// Session identifier
    fn id(&self) -> &str;

    /// Load a URL
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Perform a natural-language action (search, click, paginate)
    async fn act(&mut self, instruction: &str) -> Result<ActOutcome>;

    /// Extract structured data; `None` when nothing matched
    async fn extract(&mut self, instruction: &str, schema: &ExtractionSchema)
    -> Result<Option<Value>>;

    /// Close the session and free remote resources
    async fn close(&mut self) -> Result<()>;
}

/// Opens sessions with rate limiting, retry and a bounded wait
pub struct SessionFactory {
    automation: Arc<dyn Automation>,
    failsafe: Failsafe,
    session_timeout: Duration,
    call_timeout: Duration,
}

impl SessionFactory {
    /// Create a factory
    pub fn new(
        automation: Arc<dyn Automation>,
        failsafe: Failsafe,
        config: &AutomationConfig,
    ) -> Self {
        Self {
            automation,
            failsafe,
            session_timeout: config.session_timeout,
            call_timeout: config.call_timeout,
        }
    }

    /// Per-call timeout applied to every session call
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Open a scoped session
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] or [`Error::AutomationTimeout`] once retries
    /// are exhausted.
    pub async fn open(&self) -> Result<ScopedSession> {
        self.failsafe.rate_limiter.acquire().await;

        let automation = &self.automation;
        let limit = self.session_timeout;
        let session = with_retry(&self.failsafe.retry_policy, "open_session", move || async move {
            match timeout(limit, automation.open_session()).await {
                Ok(result) => result,
                Err(_) => Err(Error::AutomationTimeout(format!(
                    "open_session exceeded {}ms",
                    limit.as_millis()
                ))),
            }
        })
        .await?;

        telemetry_metrics::counter!("sleuth_sessions_opened_total").increment(1);
        debug!(session = %session.id(), "Opened automation session");

        Ok(ScopedSession {
            id: session.id().to_string(),
            inner: Some(session),
            call_timeout: self.call_timeout,
        })
    }
}

/// Session guard: every call is time-bounded and the session is always closed.
///
/// Call [`release`](Self::release) on normal paths. If the guard is dropped
/// unreleased (panic, aborted task) the close is spawned on the current
/// runtime.
pub struct ScopedSession {
    id: String,
    inner: Option<Box<dyn AutomationSession>>,
    call_timeout: Duration,
}

impl ScopedSession {
    /// Session identifier
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn session(&mut self) -> Result<&mut Box<dyn AutomationSession>> {
        self.inner
            .as_mut()
            .ok_or_else(|| Error::Session(format!("session {} already released", self.id)))
    }

    fn timed_out(&self, call: &str) -> Error {
        Error::AutomationTimeout(format!(
            "{call} exceeded {}ms on session {}",
            self.call_timeout.as_millis(),
            self.id
        ))
    }

    /// Navigate to a URL
    pub async fn navigate(&mut self, url: &str) -> Result<()> {
        let limit = self.call_timeout;
        let session = self.session()?;
        let outcome = timeout(limit, session.navigate(url)).await;
        outcome.unwrap_or_else(|_| Err(self.timed_out("navigate")))
    }

    /// Perform a natural-language action
    pub async fn act(&mut self, instruction: &str) -> Result<ActOutcome> {
        let limit = self.call_timeout;
        let session = self.session()?;
        let outcome = timeout(limit, session.act(instruction)).await;
        outcome.unwrap_or_else(|_| Err(self.timed_out("act")))
    }

    /// Extract structured data
    pub async fn extract(
        &mut self,
        instruction: &str,
        schema: &ExtractionSchema,
    ) -> Result<Option<Value>> {
        let limit = self.call_timeout;
        let session = self.session()?;
        let outcome = timeout(limit, session.extract(instruction, schema)).await;
        outcome.unwrap_or_else(|_| Err(self.timed_out("extract")))
    }

    /// Close the session. Close failures are logged, never returned.
    pub async fn release(mut self) {
        if let Some(mut session) = self.inner.take() {
            close_session(&mut session, self.call_timeout).await;
        }
    }
}

async fn close_session(session: &mut Box<dyn AutomationSession>, limit: Duration) {
    let id = session.id().to_string();
    match timeout(limit, session.close()).await {
        Ok(Ok(())) => debug!(session = %id, "Closed automation session"),
        Ok(Err(e)) => warn!(session = %id, error = %e, "Failed to close automation session"),
        Err(_) => warn!(session = %id, "Timed out closing automation session"),
    }
    telemetry_metrics::counter!("sleuth_sessions_closed_total").increment(1);
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        let Some(mut session) = self.inner.take() else {
            return;
        };
        let limit = self.call_timeout;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            debug!(session = %self.id, "Session dropped unreleased, closing in background");
            handle.spawn(async move {
                close_session(&mut session, limit).await;
            });
        } else {
            warn!(session = %self.id, "Session dropped outside a runtime, remote session leaked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutomationConfig;

    fn factory(automation: Arc<ScriptedAutomation>) -> SessionFactory {
        SessionFactory::new(automation, Failsafe::disabled(), &AutomationConfig::default())
    }

    #[tokio::test]
    async fn test_release_closes_session() {
        let automation = Arc::new(ScriptedAutomation::new());
        let session = factory(automation.clone()).open().await.unwrap();
        assert_eq!(automation.active_sessions(), 1);

        session.release().await;
        assert_eq!(automation.opened_sessions(), 1);
        assert_eq!(automation.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_drop_closes_session_in_background() {
        let automation = Arc::new(ScriptedAutomation::new());
        let session = factory(automation.clone()).open().await.unwrap();
        drop(session);

        for _ in 0..50 {
            if automation.active_sessions() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(automation.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_open_failure_surfaces_session_error() {
        let automation = Arc::new(ScriptedAutomation::new());
        automation.fail_all_opens();
        let err = factory(automation.clone()).open().await.err().unwrap();
        assert!(matches!(err, Error::Session(_)));
        assert_eq!(automation.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let site = ScriptedSite {
            extract_delay_ms: 120_000,
            ..ScriptedSite::default()
        };
        let automation =
            Arc::new(ScriptedAutomation::new().with_site("https://slow.example", site));
        let mut session = factory(automation.clone()).open().await.unwrap();
        session.navigate("https://slow.example").await.unwrap();

        let schema = ExtractionSchema {
            name: "transactions".into(),
            schema: Value::Null,
        };
        let err = session.extract("list", &schema).await.unwrap_err();
        assert!(matches!(err, Error::AutomationTimeout(_)));
        session.release().await;
        assert_eq!(automation.active_sessions(), 0);
    }
}
