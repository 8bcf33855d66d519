//! Scraping pipeline
//!
//! Drives one automation session against one explorer:
//!
//! ```text
//! open ─► navigate ─► search ─► extract page ─┬─► has next? ─► next page ─┐
//!  (fatal)  (fatal)   (logged)   (empty on     │        ▲                  │
//!                                  failure)    │        └──── extract ◄────┘
//!                                              ▼
//!                                   truncate ─► release ─► [enrich]
//! ```
//!
//! Only session acquisition and navigation failures propagate. Everything
//! after that degrades to fewer transactions.

pub mod schema;
mod transaction;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sleuth_core::Explorer;
use tracing::{debug, info, warn};

use crate::automation::{ScopedSession, SessionFactory};
use crate::config::PipelineConfig;
use crate::{Error, Result};

pub use transaction::{Transaction, TransactionDetails};

/// Scrape bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeMetadata {
    /// Distinct transactions observed before truncation
    pub total: usize,
    /// Transactions returned
    pub scraped: usize,
    /// Pages read
    pub pages: usize,
    /// When the scrape finished (RFC 3339)
    pub timestamp: String,
}

/// Result envelope of one scrape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapingResult {
    /// Explorer that was scraped
    pub explorer: Explorer,
    /// Transactions in presentation order
    pub transactions: Vec<Transaction>,
    /// Counts and timestamp
    pub metadata: ScrapeMetadata,
}

/// Parameters of one scrape
#[derive(Debug, Clone, Copy)]
pub struct ScrapeRequest<'a> {
    /// Explorer to drive
    pub explorer: &'a Explorer,
    /// Address to look up
    pub address: &'a str,
    /// Maximum transactions returned
    pub limit: usize,
    /// Optional extraction focus ("NFT transfers", "bridge deposits")
    pub focus: Option<&'a str>,
    /// Run the detail-enrichment pass
    pub enrich: bool,
}

impl<'a> ScrapeRequest<'a> {
    /// Plain scrape without focus or enrichment
    #[must_use]
    pub fn new(explorer: &'a Explorer, address: &'a str, limit: usize) -> Self {
        Self {
            explorer,
            address,
            limit,
            focus: None,
            enrich: false,
        }
    }

    /// Set the extraction focus
    #[must_use]
    pub fn with_focus(mut self, focus: &'a str) -> Self {
        self.focus = Some(focus);
        self
    }

    /// Request detail enrichment
    #[must_use]
    pub fn with_enrichment(mut self, enrich: bool) -> Self {
        self.enrich = enrich;
        self
    }
}

/// Collected rows, deduplicated by hash in first-seen order
#[derive(Default)]
struct Collected {
    transactions: Vec<Transaction>,
    index: HashMap<String, usize>,
    pages: usize,
}

impl Collected {
    /// Append a page; returns how many hashes were new
    fn append(&mut self, page: Vec<Transaction>) -> usize {
        let mut added = 0;
        for tx in page {
            if let Some(&at) = self.index.get(&tx.hash) {
                self.transactions[at].absorb(tx);
            } else {
                self.index.insert(tx.hash.clone(), self.transactions.len());
                self.transactions.push(tx);
                added += 1;
            }
        }
        self.pages += 1;
        added
    }

    fn len(&self) -> usize {
        self.transactions.len()
    }
}

/// Scraping pipeline over a session factory
pub struct ScrapingPipeline {
    sessions: Arc<SessionFactory>,
    page_size: usize,
    enrichment_concurrency: usize,
}

impl ScrapingPipeline {
    /// Create a pipeline
    pub fn new(sessions: Arc<SessionFactory>, config: &PipelineConfig) -> Self {
        Self {
            sessions,
            page_size: config.page_size.max(1),
            enrichment_concurrency: config.enrichment_concurrency.max(1),
        }
    }

    /// Scrape up to `limit` transactions of `address` from `explorer`
    ///
    /// # Errors
    ///
    /// Returns an error only when no session can be opened or the explorer
    /// cannot be reached.
    pub async fn scrape(
        &self,
        explorer: &Explorer,
        address: &str,
        limit: usize,
    ) -> Result<ScrapingResult> {
        self.run(ScrapeRequest::new(explorer, address, limit)).await
    }

    /// Scrape, then enrich every returned transaction with its detail panel
    ///
    /// # Errors
    ///
    /// Same as [`scrape`](Self::scrape); enrichment failures never propagate.
    pub async fn scrape_with_details(
        &self,
        explorer: &Explorer,
        address: &str,
        limit: usize,
    ) -> Result<ScrapingResult> {
        self.run(ScrapeRequest::new(explorer, address, limit).with_enrichment(true))
            .await
    }

    /// Run a scrape request
    ///
    /// # Errors
    ///
    /// See [`scrape`](Self::scrape).
    pub async fn run(&self, request: ScrapeRequest<'_>) -> Result<ScrapingResult> {
        let explorer = request.explorer;
        debug!(
            explorer = %explorer.name,
            address = %request.address,
            limit = request.limit,
            "Starting scrape"
        );

        let mut session = self.sessions.open().await?;
        let collected = self.collect(&mut session, &request).await;
        session.release().await;
        let collected = collected?;

        let total = collected.len();
        let pages = collected.pages;
        let mut transactions = collected.transactions;
        transactions.truncate(request.limit);

        if request.enrich && !transactions.is_empty() {
            transactions = self.enrich(explorer, transactions).await;
        }

        telemetry_metrics::counter!("sleuth_scrapes_total").increment(1);
        info!(
            explorer = %explorer.name,
            address = %request.address,
            total,
            scraped = transactions.len(),
            pages,
            "Scrape finished"
        );

        Ok(ScrapingResult {
            explorer: explorer.clone(),
            metadata: ScrapeMetadata {
                total,
                scraped: transactions.len(),
                pages,
                timestamp: Utc::now().to_rfc3339(),
            },
            transactions,
        })
    }

    async fn collect(
        &self,
        session: &mut ScopedSession,
        request: &ScrapeRequest<'_>,
    ) -> Result<Collected> {
        let explorer = request.explorer;
        session.navigate(&explorer.url).await.map_err(|e| match e {
            Error::Navigation(_) => e,
            other => Error::Navigation(format!("{}: {other}", explorer.url)),
        })?;

        search(session, request.address, &explorer.name).await;

        let mut collected = Collected::default();
        let first = extract_page(session, request).await;
        collected.append(first);

        let max_steps = request.limit.div_ceil(self.page_size);
        for step in 0..max_steps {
            if collected.len() >= request.limit || !has_next_page(session).await {
                break;
            }
            match session.act(schema::NEXT_PAGE_INSTRUCTION).await {
                Ok(outcome) if outcome.success => {}
                Ok(outcome) => {
                    debug!(
                        explorer = %explorer.name,
                        message = %outcome.message,
                        "Pagination declined"
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        explorer = %explorer.name,
                        step,
                        error = %e,
                        "Pagination failed, keeping collected pages"
                    );
                    telemetry_metrics::counter!(
                        "sleuth_recovered_failures_total",
                        "stage" => "paginate"
                    )
                    .increment(1);
                    break;
                }
            }
            let page = extract_page(session, request).await;
            if collected.append(page) == 0 {
                debug!(explorer = %explorer.name, step, "Page added nothing new, stopping");
                break;
            }
        }

        Ok(collected)
    }

    async fn enrich(
        &self,
        explorer: &Explorer,
        transactions: Vec<Transaction>,
    ) -> Vec<Transaction> {
        debug!(
            explorer = %explorer.name,
            count = transactions.len(),
            concurrency = self.enrichment_concurrency,
            "Enriching transactions"
        );
        stream::iter(transactions)
            .map(|tx| self.enrich_one(explorer, tx))
            .buffered(self.enrichment_concurrency)
            .collect()
            .await
    }

    async fn enrich_one(&self, explorer: &Explorer, mut tx: Transaction) -> Transaction {
        match self.fetch_details(explorer, &tx.hash).await {
            Ok(Some(details)) => tx.apply_details(details),
            Ok(None) => debug!(hash = %tx.hash, "No detail panel found"),
            Err(e) => {
                warn!(
                    hash = %tx.hash,
                    error = %e,
                    "Enrichment failed, keeping transaction as scraped"
                );
                telemetry_metrics::counter!(
                    "sleuth_recovered_failures_total",
                    "stage" => "enrich"
                )
                .increment(1);
            }
        }
        tx
    }

    async fn fetch_details(
        &self,
        explorer: &Explorer,
        hash: &str,
    ) -> Result<Option<TransactionDetails>> {
        let mut session = self.sessions.open().await?;
        let details = lookup_details(&mut session, explorer, hash).await;
        session.release().await;
        details
    }
}

async fn search(session: &mut ScopedSession, address: &str, explorer: &str) {
    match session.act(&schema::search(address)).await {
        Ok(outcome) if outcome.success => debug!(explorer, "Search submitted"),
        Ok(outcome) => {
            debug!(explorer, message = %outcome.message, "Search declined, assuming redirect");
        }
        Err(e) => {
            warn!(explorer, error = %e, "Search step failed, continuing on current page");
            telemetry_metrics::counter!("sleuth_recovered_failures_total", "stage" => "search")
                .increment(1);
        }
    }
}

async fn extract_page(
    session: &mut ScopedSession,
    request: &ScrapeRequest<'_>,
) -> Vec<Transaction> {
    let instruction = schema::extract_transactions(request.address, request.focus);
    let data = match session.extract(&instruction, &schema::transactions()).await {
        Ok(Some(data)) => data,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!(
                explorer = %request.explorer.name,
                error = %e,
                "Extraction failed, treating page as empty"
            );
            telemetry_metrics::counter!("sleuth_recovered_failures_total", "stage" => "extract")
                .increment(1);
            return Vec::new();
        }
    };
    transaction::parse_page(&data).unwrap_or_else(|| {
        warn!(
            explorer = %request.explorer.name,
            "Extraction returned malformed data, treating page as empty"
        );
        telemetry_metrics::counter!("sleuth_recovered_failures_total", "stage" => "extract")
            .increment(1);
        Vec::new()
    })
}

async fn has_next_page(session: &mut ScopedSession) -> bool {
    match session.extract(&schema::detect_next_page(), &schema::pagination()).await {
        Ok(Some(data)) => data.get("has_next_page").and_then(Value::as_bool).unwrap_or(false),
        Ok(None) => false,
        Err(e) => {
            debug!(error = %e, "Pagination detection failed");
            false
        }
    }
}

async fn lookup_details(
    session: &mut ScopedSession,
    explorer: &Explorer,
    hash: &str,
) -> Result<Option<TransactionDetails>> {
    session.navigate(&explorer.url).await?;
    let outcome = session.act(&schema::search(hash)).await?;
    if !outcome.success {
        return Ok(None);
    }
    let data = session
        .extract(&schema::extract_details(hash), &schema::transaction_details())
        .await?;
    let Some(data) = data else {
        return Ok(None);
    };
    let details: TransactionDetails = serde_json::from_value(data)
        .map_err(|e| Error::Extraction(format!("transaction details for {hash}: {e}")))?;
    Ok((!details.is_empty()).then_some(details))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{ScriptedAutomation, ScriptedSite};
    use crate::config::AutomationConfig;
    use crate::failsafe::Failsafe;
    use serde_json::json;
    use sleuth_core::ExplorerCategory;

    const URL: &str = "https://scan.example";

    fn rows(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| {
                json!({ "hash": format!("0x{i:02}"), "from": "0xaaa", "to": format!("0xb{i:02}") })
            })
            .collect()
    }

    fn pipeline(automation: &Arc<ScriptedAutomation>, page_size: usize) -> ScrapingPipeline {
        let sessions = SessionFactory::new(
            automation.clone(),
            Failsafe::disabled(),
            &AutomationConfig::default(),
        );
        let config = PipelineConfig {
            page_size,
            ..PipelineConfig::default()
        };
        ScrapingPipeline::new(Arc::new(sessions), &config)
    }

    fn explorer() -> Explorer {
        Explorer::new("Scan", URL, ExplorerCategory::General, Some("ethereum"))
    }

    fn site(n: usize, page_size: usize) -> ScriptedSite {
        ScriptedSite {
            transactions: rows(n),
            page_size,
            ..ScriptedSite::default()
        }
    }

    #[tokio::test]
    async fn test_truncates_to_limit() {
        let automation = Arc::new(ScriptedAutomation::new().with_site(URL, site(12, 5)));
        let result = pipeline(&automation, 5).scrape(&explorer(), "0xaaa", 5).await.unwrap();

        assert_eq!(result.transactions.len(), 5);
        assert_eq!(result.metadata.scraped, 5);
        assert!(result.metadata.total >= 5);
        assert_eq!(automation.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_follows_pagination_in_order() {
        let automation = Arc::new(ScriptedAutomation::new().with_site(URL, site(12, 5)));
        let result = pipeline(&automation, 5).scrape(&explorer(), "0xaaa", 20).await.unwrap();

        let hashes: Vec<_> = result.transactions.iter().map(|tx| tx.hash.as_str()).collect();
        assert_eq!(hashes.len(), 12);
        assert_eq!(hashes.first(), Some(&"0x00"));
        assert_eq!(hashes.last(), Some(&"0x11"));
        assert_eq!(result.metadata.pages, 3);
    }

    #[tokio::test]
    async fn test_pagination_capped_by_page_budget() {
        let automation = Arc::new(ScriptedAutomation::new().with_site(URL, site(40, 5)));
        // Explorer shows 5 per page but the pipeline assumes 10: ceil(12/10) = 2 steps.
        let result = pipeline(&automation, 10).scrape(&explorer(), "0xaaa", 12).await.unwrap();
        assert_eq!(result.metadata.pages, 3);
        assert_eq!(result.metadata.total, 15);
        assert_eq!(result.transactions.len(), 12);
    }

    #[tokio::test]
    async fn test_malformed_extraction_degrades_to_empty() {
        let broken = ScriptedSite {
            malformed_extraction: true,
            ..site(12, 5)
        };
        let automation = Arc::new(ScriptedAutomation::new().with_site(URL, broken));
        let result = pipeline(&automation, 5).scrape(&explorer(), "0xaaa", 5).await.unwrap();

        assert!(result.transactions.is_empty());
        assert_eq!(result.metadata.scraped, 0);
    }

    #[tokio::test]
    async fn test_pagination_failure_keeps_collected() {
        let flaky = ScriptedSite {
            fail_pagination_after: Some(1),
            ..site(12, 5)
        };
        let automation = Arc::new(ScriptedAutomation::new().with_site(URL, flaky));
        let result = pipeline(&automation, 5).scrape(&explorer(), "0xaaa", 12).await.unwrap();
        assert_eq!(result.transactions.len(), 10);
    }

    #[tokio::test]
    async fn test_search_failure_is_not_fatal() {
        let no_search = ScriptedSite {
            fail_search: true,
            ..site(3, 5)
        };
        let automation = Arc::new(ScriptedAutomation::new().with_site(URL, no_search));
        let result = pipeline(&automation, 5).scrape(&explorer(), "0xaaa", 5).await.unwrap();
        assert_eq!(result.transactions.len(), 3);
    }

    #[tokio::test]
    async fn test_navigation_failure_is_fatal_and_releases() {
        let down = ScriptedSite {
            fail_navigation: true,
            ..site(3, 5)
        };
        let automation = Arc::new(ScriptedAutomation::new().with_site(URL, down));
        let err = pipeline(&automation, 5).scrape(&explorer(), "0xaaa", 5).await.unwrap_err();

        assert!(matches!(err, Error::Navigation(_)));
        assert_eq!(automation.opened_sessions(), 1);
        assert_eq!(automation.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_session_failure_is_fatal() {
        let automation = Arc::new(ScriptedAutomation::new().with_site(URL, site(3, 5)));
        automation.fail_all_opens();
        let err = pipeline(&automation, 5).scrape(&explorer(), "0xaaa", 5).await.unwrap_err();
        assert!(matches!(err, Error::Session(_)));
    }

    #[tokio::test]
    async fn test_enrichment_is_fault_isolated() {
        let mut enriched = site(3, 5);
        enriched.details.insert("0x00".into(), json!({ "gas": 21000, "nonce": "4" }));
        enriched.details.insert(
            "0x02".into(),
            json!({ "gas": ["not", "a", "gas value"], "block_number": 12 }),
        );
        let automation = Arc::new(ScriptedAutomation::new().with_site(URL, enriched));

        let result = pipeline(&automation, 5)
            .scrape_with_details(&explorer(), "0xaaa", 5)
            .await
            .unwrap();

        let txs = &result.transactions;
        assert_eq!(txs.len(), 3);
        assert_eq!(txs[0].details["gas"], json!("21000"));
        assert_eq!(txs[0].details["nonce"], json!("4"));
        assert!(txs[1].details.is_empty());
        assert_eq!(txs[2].details["block_number"], json!("12"));
        assert!(!txs[2].details.contains_key("gas"));
        assert_eq!(automation.active_sessions(), 0);
    }
}
