//! Indicator feed client.
//!
//! Uses `ureq` for synchronous HTTP requests against the WHO Global Health
//! Observatory OData API (`GET {base}/{indicator}` → `{"value": [...]}`).
//! The feed boundary never fails a run: every error is logged and turned
//! into an empty row list.

use std::time::Duration;

use serde_json::Value;

use crate::error::{FeedError, FeedResult};

/// Default GHO API root.
pub const DEFAULT_BASE_URL: &str = "https://ghoapi.azureedge.net/api";

/// Source of raw indicator rows for a disease.
pub trait IndicatorFeed {
    /// Raw rows for `indicator_code`, or an empty list on any failure.
    fn fetch(&self, indicator_code: &str) -> Vec<Value>;
}

/// GHO OData client.
#[derive(Clone)]
pub struct GhoClient {
    base_url: String,
    agent: ureq::Agent,
}

impl GhoClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { base_url, agent }
    }

    pub fn indicator_url(&self, indicator_code: &str) -> String {
        format!("{}/{}", self.base_url, indicator_code)
    }

    /// Fetch the `value` array, surfacing what went wrong.
    pub fn try_fetch(&self, indicator_code: &str) -> FeedResult<Vec<Value>> {
        let url = self.indicator_url(indicator_code);
        let response = match self.agent.get(&url).call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(status, _)) => {
                return Err(FeedError::Status { url, status });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(FeedError::Request {
                    url,
                    message: transport.to_string(),
                });
            }
        };

        let body: Value = response.into_json().map_err(|e| FeedError::Body {
            url: url.clone(),
            message: e.to_string(),
        })?;
        Ok(extract_values(body))
    }
}

impl std::fmt::Debug for GhoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GhoClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Default for GhoClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, Duration::from_secs(15))
    }
}

impl IndicatorFeed for GhoClient {
    fn fetch(&self, indicator_code: &str) -> Vec<Value> {
        match self.try_fetch(indicator_code) {
            Ok(rows) => {
                tracing::debug!(indicator = indicator_code, rows = rows.len(), "indicator fetched");
                rows
            }
            Err(e) => {
                tracing::warn!(indicator = indicator_code, error = %e, "indicator fetch failed, skipping");
                Vec::new()
            }
        }
    }
}

/// Pull the `value` array out of an OData body; anything else is empty.
fn extract_values(body: Value) -> Vec<Value> {
    match body {
        Value::Object(mut map) => match map.remove("value") {
            Some(Value::Array(rows)) => rows,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}
