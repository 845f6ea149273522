//! # HTTP Transport
//!
//! Posts built operations to a nodeql server over HTTPS (rustls).
//!
//! ## Wire Format
//!
//! - `POST {address}/graphql/{branch}[?at=...]` with body `{"query", "variables"}`
//! - `X-NODEQL-KEY` carries the API token when one is configured
//! - `X-Nodeql-Tracker` carries the operation tracker when enabled
//!
//! Failures are mapped onto [`TransportError`] and returned as-is. Nothing
//! here retries.

use crate::config::AppConfig;
use nodeql_core::{AsyncTransport, GraphQlRequest, Transport, TransportError};
use serde_json::Value;
use tracing::{debug, info};

/// Header carrying the API token.
pub const API_KEY_HEADER: &str = "X-NODEQL-KEY";

/// Header carrying the operation tracker.
pub const TRACKER_HEADER: &str = "X-Nodeql-Tracker";

// =============================================================================
// SHARED SETTINGS
// =============================================================================

/// Connection settings shared by both transports.
#[derive(Clone)]
struct Endpoint {
    address: String,
    api_token: Option<String>,
    echo_queries: bool,
    insert_tracker: bool,
}

// Manual Debug keeps the token out of logs.
impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address)
            .field("api_token", &self.api_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Endpoint {
    fn from_config(config: &AppConfig) -> Self {
        Self {
            address: config.address.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            echo_queries: config.echo_graphql_queries,
            insert_tracker: config.insert_tracker,
        }
    }

    fn url(&self, request: &GraphQlRequest) -> String {
        let mut url = format!("{}/graphql", self.address);
        if !request.branch.is_empty() {
            url.push('/');
            url.push_str(&request.branch);
        }
        if let Some(at) = &request.at {
            url.push_str("?at=");
            url.push_str(at);
        }
        url
    }

    /// Headers for `request`, as `(name, value)` pairs.
    fn headers(&self, request: &GraphQlRequest) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Some(token) = &self.api_token {
            headers.push((API_KEY_HEADER, token.clone()));
        }
        if self.insert_tracker
            && let Some(tracker) = &request.tracker
        {
            headers.push((TRACKER_HEADER, tracker.clone()));
        }
        headers
    }

    fn trace(&self, request: &GraphQlRequest, url: &str) {
        if self.echo_queries {
            info!(url, tracker = ?request.tracker, query = %request.query, "Sending GraphQL operation");
        } else {
            debug!(url, tracker = ?request.tracker, "Sending GraphQL operation");
        }
    }
}

/// Map a reqwest failure that happened before a status was received.
fn request_error(url: &str, err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(url.to_string())
    } else if err.is_connect() || err.is_request() {
        TransportError::ConnectionFailed(url.to_string())
    } else {
        TransportError::Decode(err.to_string())
    }
}

/// Turn a status and raw body into the `data` member, or an error.
pub fn interpret_response(status: u16, body: &str) -> Result<Value, TransportError> {
    if status == 401 || status == 403 {
        return Err(TransportError::Unauthorized(body.to_string()));
    }
    if !(200..300).contains(&status) {
        return Err(TransportError::Status {
            status,
            body: body.to_string(),
        });
    }

    let payload: Value =
        serde_json::from_str(body).map_err(|e| TransportError::Decode(e.to_string()))?;
    if let Some(errors) = payload.get("errors").and_then(Value::as_array)
        && !errors.is_empty()
    {
        let messages = errors
            .iter()
            .map(|error| {
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string())
            })
            .collect();
        return Err(TransportError::GraphQl { messages });
    }
    payload
        .get("data")
        .filter(|data| !data.is_null())
        .cloned()
        .ok_or_else(|| TransportError::Decode("response has no data member".into()))
}

// =============================================================================
// ASYNC TRANSPORT
// =============================================================================

/// Cooperative HTTP transport for [`nodeql_core::AsyncClient`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Endpoint,
}

impl HttpTransport {
    pub fn new(config: &AppConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: Endpoint::from_config(config),
        })
    }
}

impl AsyncTransport for HttpTransport {
    async fn execute(&self, request: &GraphQlRequest) -> Result<Value, TransportError> {
        let url = self.endpoint.url(request);
        self.endpoint.trace(request, &url);

        let mut builder = self.client.post(&url).json(request);
        for (name, value) in self.endpoint.headers(request) {
            builder = builder.header(name, value);
        }
        let response = builder.send().await.map_err(|e| request_error(&url, &e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| request_error(&url, &e))?;
        interpret_response(status, &body)
    }
}

// =============================================================================
// BLOCKING TRANSPORT
// =============================================================================

/// Blocking HTTP transport for [`nodeql_core::Client`].
///
/// Must not be used from inside an async runtime.
#[derive(Debug, Clone)]
pub struct BlockingHttpTransport {
    client: reqwest::blocking::Client,
    endpoint: Endpoint,
}

impl BlockingHttpTransport {
    pub fn new(config: &AppConfig) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: Endpoint::from_config(config),
        })
    }
}

impl Transport for BlockingHttpTransport {
    fn execute(&self, request: &GraphQlRequest) -> Result<Value, TransportError> {
        let url = self.endpoint.url(request);
        self.endpoint.trace(request, &url);

        let mut builder = self.client.post(&url).json(request);
        for (name, value) in self.endpoint.headers(request) {
            builder = builder.header(name, value);
        }
        let response = builder.send().map_err(|e| request_error(&url, &e))?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|e| request_error(&url, &e))?;
        interpret_response(status, &body)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint(token: Option<&str>, insert_tracker: bool) -> Endpoint {
        Endpoint::from_config(&AppConfig {
            address: "https://nodeql.example.com/".into(),
            api_token: token.map(str::to_string),
            insert_tracker,
            ..AppConfig::default()
        })
    }

    #[test]
    fn url_carries_branch_and_time() {
        let request = GraphQlRequest::new("query { x }", "feature-1");
        assert_eq!(
            endpoint(None, false).url(&request),
            "https://nodeql.example.com/graphql/feature-1"
        );
        let request = request.with_at(Some("2026-01-01T00:00:00Z".into()));
        assert_eq!(
            endpoint(None, false).url(&request),
            "https://nodeql.example.com/graphql/feature-1?at=2026-01-01T00:00:00Z"
        );
    }

    #[test]
    fn tracker_header_only_when_enabled() {
        let request = GraphQlRequest::new("query { x }", "main").with_tracker("query-infrasite-page1");
        assert!(endpoint(None, false).headers(&request).is_empty());
        assert_eq!(
            endpoint(Some("k"), true).headers(&request),
            vec![
                (API_KEY_HEADER, "k".to_string()),
                (TRACKER_HEADER, "query-infrasite-page1".to_string())
            ]
        );
    }

    #[test]
    fn debug_hides_the_token() {
        let rendered = format!("{:?}", endpoint(Some("super-secret"), false));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn response_mapping() {
        assert_eq!(
            interpret_response(200, r#"{"data": {"ok": true}}"#).unwrap(),
            json!({"ok": true})
        );
        assert!(matches!(
            interpret_response(403, "denied"),
            Err(TransportError::Unauthorized(_))
        ));
        assert!(matches!(
            interpret_response(502, "bad gateway"),
            Err(TransportError::Status { status: 502, .. })
        ));
        assert!(matches!(
            interpret_response(200, "not json"),
            Err(TransportError::Decode(_))
        ));

        let err = interpret_response(
            200,
            r#"{"data": null, "errors": [{"message": "first"}, {"message": "second"}]}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            TransportError::GraphQl {
                messages: vec!["first".into(), "second".into()]
            }
        );
    }
}
