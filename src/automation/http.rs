//! HTTP client for a remote browser-automation service
//!
//! Wire protocol (JSON bodies, bearer auth when an API key is configured):
//!
//! | Call      | Request                                   | Response            |
//! |-----------|-------------------------------------------|---------------------|
//! | open      | `POST /sessions`                          | `{"id": "..."}`     |
//! | navigate  | `POST /sessions/{id}/navigate {url}`      | any 2xx             |
//! | act       | `POST /sessions/{id}/act {instruction}`   | `{success, message}`|
//! | extract   | `POST /sessions/{id}/extract {instruction, schema}` | `{"data": ...}` |
//! | close     | `DELETE /sessions/{id}`                   | any 2xx             |

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use super::{ActOutcome, Automation, AutomationSession, ExtractionSchema};
use crate::config::AutomationConfig;
use crate::{Error, Result};

#[derive(Deserialize)]
struct SessionCreated {
    id: String,
}

#[derive(Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    data: Option<Value>,
}

/// Automation backed by a remote HTTP service
pub struct HttpAutomation {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpAutomation {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the endpoint is not a valid URL.
    pub fn new(config: &AutomationConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| Error::Config(format!("Invalid automation endpoint: {e}")))?;

        let client = Client::builder()
            .timeout(config.call_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.as_str().trim_end_matches('/').to_string(),
            api_key: config.resolve_api_key(),
        })
    }
}

fn authorize(request: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
    match api_key {
        Some(key) => request.bearer_auth(key),
        None => request,
    }
}

#[async_trait]
impl Automation for HttpAutomation {
    async fn open_session(&self) -> Result<Box<dyn AutomationSession>> {
        let request = self.client.post(format!("{}/sessions", self.endpoint));
        let response = authorize(request, self.api_key.as_deref())
            .json(&json!({}))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::Session(e.to_string()))?;

        let created: SessionCreated = response
            .json()
            .await
            .map_err(|e| Error::Session(format!("Malformed session response: {e}")))?;

        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            base: format!("{}/sessions/{}", self.endpoint, created.id),
            id: created.id,
            api_key: self.api_key.clone(),
        }))
    }
}

struct HttpSession {
    client: Client,
    base: String,
    id: String,
    api_key: Option<String>,
}

impl HttpSession {
    async fn post(&self, path: &str, body: Value) -> reqwest::Result<reqwest::Response> {
        let request = self.client.post(format!("{}/{path}", self.base));
        authorize(request, self.api_key.as_deref())
            .json(&body)
            .send()
            .await?
            .error_for_status()
    }
}

#[async_trait]
impl AutomationSession for HttpSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.post("navigate", json!({ "url": url }))
            .await
            .map_err(|e| Error::Navigation(format!("{url}: {e}")))?;
        Ok(())
    }

    async fn act(&mut self, instruction: &str) -> Result<ActOutcome> {
        let response = self
            .post("act", json!({ "instruction": instruction }))
            .await
            .map_err(|e| Error::Action(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| Error::Action(format!("Malformed act response: {e}")))
    }

    async fn extract(
        &mut self,
        instruction: &str,
        schema: &ExtractionSchema,
    ) -> Result<Option<Value>> {
        let response = self
            .post(
                "extract",
                json!({ "instruction": instruction, "schema": schema.schema, "name": schema.name }),
            )
            .await
            .map_err(|e| Error::Extraction(e.to_string()))?;
        let body: ExtractResponse = response
            .json()
            .await
            .map_err(|e| Error::Extraction(format!("Malformed extract response: {e}")))?;
        Ok(body.data.filter(|v| !v.is_null()))
    }

    async fn close(&mut self) -> Result<()> {
        let request = self.client.delete(&self.base);
        authorize(request, self.api_key.as_deref())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
