//! Deterministic, in-process automation
//!
//! Replays recorded explorer pages instead of driving a browser. Each site is
//! keyed by its base URL and describes what the explorer would show: the
//! transaction list (paged), address labels, per-transaction detail panels,
//! and any failures to inject. Loaded from YAML fixtures for
//! `investigate --fixture`, and used throughout the test suite.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ActOutcome, Automation, AutomationSession, ExtractionSchema};
use crate::pipeline::schema;
use crate::{Error, Result};

/// Recorded behaviour of one explorer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptedSite {
    /// Transaction rows in presentation order
    pub transactions: Vec<Value>,
    /// Rows per page
    pub page_size: usize,
    /// Address -> profile record (`category`, `tags`, `label`)
    pub labels: BTreeMap<String, Value>,
    /// Transaction hash -> detail record (`gas`, `nonce`, `block_number`, `method`)
    pub details: BTreeMap<String, Value>,
    /// Navigation to this site fails
    pub fail_navigation: bool,
    /// The search affordance cannot be found
    pub fail_search: bool,
    /// Pagination fails once this many pages have been advanced
    pub fail_pagination_after: Option<usize>,
    /// Extraction returns data that violates every schema
    pub malformed_extraction: bool,
    /// Artificial latency for every extraction, in milliseconds
    pub extract_delay_ms: u64,
}

impl Default for ScriptedSite {
    fn default() -> Self {
        Self {
            transactions: Vec::new(),
            page_size: 10,
            labels: BTreeMap::new(),
            details: BTreeMap::new(),
            fail_navigation: false,
            fail_search: false,
            fail_pagination_after: None,
            malformed_extraction: false,
            extract_delay_ms: 0,
        }
    }
}

impl ScriptedSite {
    fn page_count(&self) -> usize {
        self.transactions.len().div_ceil(self.page_size.max(1))
    }

    fn page(&self, index: usize) -> &[Value] {
        let size = self.page_size.max(1);
        let start = (index * size).min(self.transactions.len());
        let end = (start + size).min(self.transactions.len());
        &self.transactions[start..end]
    }

    /// Every term a search instruction could target, longest first
    fn search_terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = self
            .labels
            .keys()
            .chain(self.details.keys())
            .cloned()
            .collect();
        for tx in &self.transactions {
            for field in ["hash", "from", "to"] {
                if let Some(term) = tx.get(field).and_then(Value::as_str) {
                    terms.push(term.to_string());
                }
            }
        }
        terms.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        terms.dedup();
        terms
    }
}

/// YAML fixture: sites keyed by base URL
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    /// Recorded sites
    pub sites: BTreeMap<String, ScriptedSite>,
}

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Automation that replays [`ScriptedSite`]s
#[derive(Default)]
pub struct ScriptedAutomation {
    sites: Arc<BTreeMap<String, ScriptedSite>>,
    failing_opens: AtomicU32,
    counters: Arc<Counters>,
}

impl ScriptedAutomation {
    /// Automation with no sites
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Automation replaying a fixture
    #[must_use]
    pub fn from_fixture(fixture: Fixture) -> Self {
        Self {
            sites: Arc::new(fixture.sites),
            ..Self::default()
        }
    }

    /// Load a YAML fixture file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn from_fixture_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read fixture '{}': {e}", path.display()))
        })?;
        let fixture: Fixture = serde_yaml::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse fixture '{}': {e}", path.display()))
        })?;
        Ok(Self::from_fixture(fixture))
    }

    /// Add or replace a site
    #[must_use]
    pub fn with_site(mut self, url: &str, site: ScriptedSite) -> Self {
        Arc::make_mut(&mut self.sites).insert(url.to_string(), site);
        self
    }

    /// Fail the next `n` session opens
    pub fn fail_next_opens(&self, n: u32) {
        self.failing_opens.store(n, Ordering::SeqCst);
    }

    /// Fail every session open
    pub fn fail_all_opens(&self) {
        self.failing_opens.store(u32::MAX, Ordering::SeqCst);
    }

    /// Sessions opened so far
    #[must_use]
    pub fn opened_sessions(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet closed
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.opened_sessions() - self.counters.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Automation for ScriptedAutomation {
    async fn open_session(&self) -> Result<Box<dyn AutomationSession>> {
        let remaining = self.failing_opens.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.failing_opens.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(Error::Session("automation capacity exhausted".into()));
        }

        let n = self.counters.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(ScriptedSession {
            id: format!("scripted-{n}"),
            sites: Arc::clone(&self.sites),
            counters: Arc::clone(&self.counters),
            site: None,
            page: 0,
            focus: None,
            closed: false,
        }))
    }
}

struct ScriptedSession {
    id: String,
    sites: Arc<BTreeMap<String, ScriptedSite>>,
    counters: Arc<Counters>,
    site: Option<String>,
    page: usize,
    focus: Option<String>,
    closed: bool,
}

impl ScriptedSession {
    fn current(&self) -> Result<&ScriptedSite> {
        self.site
            .as_ref()
            .and_then(|key| self.sites.get(key))
            .ok_or_else(|| Error::Action("no page loaded".into()))
    }

    fn paginate(&mut self) -> Result<ActOutcome> {
        let site = self.current()?;
        if site.fail_pagination_after.is_some_and(|limit| self.page >= limit) {
            return Err(Error::Action("next page control did not respond".into()));
        }
        if self.page + 1 < site.page_count() {
            self.page += 1;
            Ok(ActOutcome::ok(format!("moved to page {}", self.page + 1)))
        } else {
            Ok(ActOutcome::declined("already on the last page"))
        }
    }

    fn search(&mut self, instruction: &str) -> Result<ActOutcome> {
        let site = self.current()?;
        if site.fail_search {
            return Err(Error::Action("search box not found".into()));
        }
        let term = site
            .search_terms()
            .into_iter()
            .find(|term| instruction.contains(term.as_str()));
        self.page = 0;
        let outcome = match &term {
            Some(t) => ActOutcome::ok(format!("searched for {t}")),
            None => ActOutcome::declined("nothing matched the search"),
        };
        self.focus = term;
        Ok(outcome)
    }
}

#[async_trait]
impl AutomationSession for ScriptedSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        let key = self
            .sites
            .iter()
            .filter(|(base, _)| url.starts_with(base.as_str()))
            .max_by_key(|(base, _)| base.len())
            .map(|(base, site)| (base.clone(), site.fail_navigation));

        match key {
            Some((_, true)) => Err(Error::Navigation(format!("{url}: connection reset"))),
            Some((base, false)) => {
                self.site = Some(base);
                self.page = 0;
                self.focus = None;
                Ok(())
            }
            None => Err(Error::Navigation(format!("{url}: no route to host"))),
        }
    }

    async fn act(&mut self, instruction: &str) -> Result<ActOutcome> {
        if instruction.to_ascii_lowercase().contains("next page") {
            self.paginate()
        } else {
            self.search(instruction)
        }
    }

    async fn extract(
        &mut self,
        _instruction: &str,
        schema: &ExtractionSchema,
    ) -> Result<Option<Value>> {
        let site = self.current()?.clone();
        if site.extract_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(site.extract_delay_ms)).await;
        }
        if site.malformed_extraction {
            return Ok(Some(json!({ "transactions": "<table unavailable>", "category": 42 })));
        }

        let focus = self.focus.as_deref();
        let data = match schema.name.as_str() {
            schema::TRANSACTIONS => Some(json!({ "transactions": site.page(self.page) })),
            schema::PAGINATION => {
                Some(json!({ "has_next_page": self.page + 1 < site.page_count() }))
            }
            schema::TRANSACTION_DETAILS => focus.and_then(|hash| site.details.get(hash)).cloned(),
            schema::ADDRESS_PROFILE => focus.and_then(|addr| site.labels.get(addr)).cloned(),
            _ => None,
        };
        Ok(data)
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| {
                json!({
                    "hash": format!("0xhash{i:02}"),
                    "from": "0xaaa",
                    "to": format!("0xb{i:02}"),
                })
            })
            .collect()
    }

    fn tx_schema(name: &str) -> ExtractionSchema {
        ExtractionSchema {
            name: name.to_string(),
            schema: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_pages_advance_and_stop() {
        let site = ScriptedSite {
            transactions: rows(12),
            page_size: 5,
            ..ScriptedSite::default()
        };
        let automation = ScriptedAutomation::new().with_site("https://scan.example", site);
        let mut session = automation.open_session().await.unwrap();
        session.navigate("https://scan.example/address/0xaaa").await.unwrap();

        let first = session.extract("", &tx_schema(schema::TRANSACTIONS)).await.unwrap().unwrap();
        assert_eq!(first["transactions"].as_array().unwrap().len(), 5);

        assert!(session.act("go to the next page").await.unwrap().success);
        assert!(session.act("go to the next page").await.unwrap().success);
        let last = session.extract("", &tx_schema(schema::TRANSACTIONS)).await.unwrap().unwrap();
        assert_eq!(last["transactions"].as_array().unwrap().len(), 2);

        assert!(!session.act("go to the next page").await.unwrap().success);
        let more = session.extract("", &tx_schema(schema::PAGINATION)).await.unwrap().unwrap();
        assert_eq!(more["has_next_page"], json!(false));

        session.close().await.unwrap();
        assert_eq!(automation.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_search_focuses_longest_term() {
        let mut site = ScriptedSite {
            transactions: rows(1),
            ..ScriptedSite::default()
        };
        site.labels
            .insert("0xb00".into(), json!({ "category": "cex", "tags": ["binance"] }));
        let automation = ScriptedAutomation::new().with_site("https://scan.example", site);
        let mut session = automation.open_session().await.unwrap();
        session.navigate("https://scan.example").await.unwrap();

        session.act("Search for address 0xb00 in the search bar").await.unwrap();
        let profile = session
            .extract("", &tx_schema(schema::ADDRESS_PROFILE))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile["category"], "cex");
    }

    #[tokio::test]
    async fn test_unknown_site_fails_navigation() {
        let automation = ScriptedAutomation::new();
        let mut session = automation.open_session().await.unwrap();
        let err = session.navigate("https://nowhere.example").await.unwrap_err();
        assert!(matches!(err, Error::Navigation(_)));
    }

    #[tokio::test]
    async fn test_fail_next_opens_counts_down() {
        let automation = ScriptedAutomation::new();
        automation.fail_next_opens(1);
        assert!(automation.open_session().await.is_err());
        assert!(automation.open_session().await.is_ok());
    }

    #[test]
    fn test_fixture_yaml() {
        let yaml = r#"
sites:
  "https://etherscan.io":
    page_size: 2
    transactions:
      - { hash: "0x01", from: "0xaaa", to: "0xbbb", value: "1 ETH" }
    labels:
      "0xbbb": { category: "bridge", tags: ["wormhole"] }
"#;
        let fixture: Fixture = serde_yaml::from_str(yaml).unwrap();
        let site = &fixture.sites["https://etherscan.io"];
        assert_eq!(site.page_size, 2);
        assert_eq!(site.transactions.len(), 1);
        assert!(!site.fail_search);
    }
}
