//! Web capabilities - bounded page fetch and SearXNG-compatible search.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{str_arg, Args, Capability, CapabilitySchema, ParamType};
use crate::config::CapabilityLimits;
use crate::error::CapabilityError;

const USER_AGENT: &str = concat!("plexus-agent/", env!("CARGO_PKG_VERSION"));

fn http_client(timeout: Duration) -> Result<reqwest::Client, CapabilityError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| CapabilityError::Network(format!("Failed to create HTTP client: {}", e)))
}

fn map_request_error(e: reqwest::Error, timeout: Duration) -> CapabilityError {
    if e.is_timeout() {
        CapabilityError::Timeout(timeout.as_secs())
    } else {
        CapabilityError::Network(e.to_string())
    }
}

/// Map a non-success HTTP status to a failure. 5xx is treated as transient.
fn status_error(status: reqwest::StatusCode, url: &str) -> Option<CapabilityError> {
    if status.is_success() {
        None
    } else if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
        Some(CapabilityError::NotFound(url.to_string()))
    } else if status.is_server_error() {
        Some(CapabilityError::Network(format!("{} returned HTTP {}", url, status.as_u16())))
    } else {
        Some(CapabilityError::Execution(format!("{} returned HTTP {}", url, status.as_u16())))
    }
}

/// Fetch a URL over http(s), bounded by a timeout and a body size ceiling.
pub struct WebFetch {
    schema: CapabilitySchema,
    timeout: Duration,
    max_bytes: usize,
}

impl WebFetch {
    pub fn new(limits: &CapabilityLimits) -> Self {
        Self {
            schema: CapabilitySchema::new(
                "web_fetch",
                "Fetch a web page or API response over HTTP(S) and return its text body.",
            )
            .param("url", ParamType::String, "http:// or https:// URL", true),
            timeout: Duration::from_secs(limits.fetch_timeout_secs),
            max_bytes: limits.max_fetch_bytes,
        }
    }
}

#[async_trait]
impl Capability for WebFetch {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn invoke(&self, args: Args) -> Result<Map<String, Value>, CapabilityError> {
        let url = str_arg(&args, "url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(CapabilityError::invalid("url", "only http and https URLs are supported"));
        }

        let client = http_client(self.timeout)?;
        let mut response = client
            .get(url)
            .send()
            .await
            .map_err(|e| map_request_error(e, self.timeout))?;

        let status = response.status();
        if let Some(err) = status_error(status, url) {
            return Err(err);
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| map_request_error(e, self.timeout))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(CapabilityError::OutputTooLarge {
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(url = %url, status = status.as_u16(), bytes = body.len(), "Fetched URL");

        let mut payload = Map::new();
        payload.insert("url".into(), json!(url));
        payload.insert("status".into(), json!(status.as_u16()));
        payload.insert("contentType".into(), json!(content_type));
        payload.insert("content".into(), json!(String::from_utf8_lossy(&body)));
        Ok(payload)
    }
}

/// Query a SearXNG-compatible JSON endpoint.
pub struct WebSearch {
    schema: CapabilitySchema,
    endpoint: Option<String>,
    timeout: Duration,
}

impl WebSearch {
    pub fn new(limits: &CapabilityLimits) -> Self {
        Self {
            schema: CapabilitySchema::new(
                "web_search",
                "Search the web. Returns result titles, URLs and snippets.",
            )
            .param("query", ParamType::String, "Search query", true)
            .param("max_results", ParamType::Integer, "Maximum results (default 5)", false),
            endpoint: limits.search_endpoint.clone(),
            timeout: Duration::from_secs(limits.fetch_timeout_secs),
        }
    }

    fn endpoint(&self) -> Option<String> {
        self.endpoint
            .clone()
            .or_else(|| {
                std::env::var("SEARXNG_URL")
                    .ok()
                    .map(|u| format!("{}/search", u.trim_end_matches('/')))
            })
    }
}

#[async_trait]
impl Capability for WebSearch {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn invoke(&self, args: Args) -> Result<Map<String, Value>, CapabilityError> {
        let query = str_arg(&args, "query")?;
        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(5) as usize;

        let endpoint = self.endpoint().ok_or_else(|| {
            CapabilityError::Network(
                "No search endpoint configured (set capabilities.search_endpoint or SEARXNG_URL)"
                    .into(),
            )
        })?;
        let url = format!("{}?q={}&format=json", endpoint, urlencoding::encode(query));

        let client = http_client(self.timeout)?;
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_request_error(e, self.timeout))?;
        if !response.status().is_success() {
            return Err(CapabilityError::Network(format!(
                "search endpoint returned HTTP {}",
                response.status().as_u16()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| CapabilityError::Network(format!("invalid search response: {}", e)))?;

        let results = parse_search_results(&body, max_results);

        let mut payload = Map::new();
        payload.insert("query".into(), json!(query));
        payload.insert("results".into(), Value::Array(results));
        Ok(payload)
    }
}

fn parse_search_results(body: &Value, max_results: usize) -> Vec<Value> {
    body.get("results")
        .and_then(|r| r.as_array())
        .map(|results| {
            results
                .iter()
                .take(max_results)
                .map(|r| {
                    json!({
                        "title": r.get("title").and_then(|t| t.as_str()).unwrap_or(""),
                        "url": r.get("url").and_then(|u| u.as_str()).unwrap_or(""),
                        "snippet": r.get("content").and_then(|c| c.as_str()).unwrap_or(""),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn search_results_are_trimmed_and_reshaped() {
        let body = json!({"results": [
            {"title": "one", "url": "https://a", "content": "first"},
            {"title": "two", "url": "https://b"},
            {"title": "three", "url": "https://c"},
        ]});
        let results = parse_search_results(&body, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["snippet"], "first");
        assert_eq!(results[1]["snippet"], "");
    }

    #[test]
    fn only_success_statuses_pass() {
        use reqwest::StatusCode;
        let url = "https://example.com/page";

        assert!(status_error(StatusCode::OK, url).is_none());
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, url),
            Some(CapabilityError::NotFound(_))
        ));
        assert_eq!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, url).unwrap().kind(),
            ErrorKind::Transient
        );
        let forbidden = status_error(StatusCode::FORBIDDEN, url).unwrap();
        assert_eq!(forbidden.kind(), ErrorKind::Execution);
        assert!(forbidden.to_string().contains("HTTP 403"));
    }

    #[tokio::test]
    async fn fetch_rejects_non_http_schemes() {
        let args = json!({"url": "file:///etc/passwd"}).as_object().cloned().unwrap();
        let err = WebFetch::new(&CapabilityLimits::default())
            .invoke(args)
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidArgument { .. }));
    }
}
