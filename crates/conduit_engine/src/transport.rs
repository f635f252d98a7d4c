//! Wire seam between adapters and the network.
//!
//! Adapters build [`TransportRequest`]s (including their own auth headers) and
//! interpret [`TransportResponse`]s; the [`Transport`] only moves JSON. Tests
//! swap in scripted transports at this seam.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::error::{HandlerError, HandlerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outbound request relative to the transport's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    /// Path appended to the base URL; empty targets the base URL itself.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Json>,
}

impl TransportRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Json) -> Self {
        Self::new(HttpMethod::Post, path).with_body(body)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Json) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Status plus decoded JSON body. Non-JSON bodies arrive as a JSON string.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Json,
}

impl TransportResponse {
    pub fn new(status: u16, body: Json) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Json) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the body of a 2xx response, or classifies the failure.
    ///
    /// 401/403 are credential problems, 408/429/5xx are transient, and any
    /// other status is a non-retryable rejection.
    pub fn into_success(self) -> HandlerResult<Json> {
        if self.is_success() {
            return Ok(self.body);
        }
        let detail = error_detail(&self.body);
        Err(match self.status {
            401 | 403 => HandlerError::configuration(format!(
                "credentials rejected (status {}): {detail}",
                self.status
            )),
            408 | 429 | 500..=599 => HandlerError::connection(format!(
                "service unavailable (status {}): {detail}",
                self.status
            )),
            status => HandlerError::RemoteRejected { status, detail },
        })
    }
}

/// Picks the most specific error message the common service formats carry.
fn error_detail(body: &Json) -> String {
    let candidates = [
        body.pointer("/error_message"),
        body.pointer("/error/message"),
        body.pointer("/errorMessage"),
        body.pointer("/message"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(Json::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| match body {
            Json::String(text) => text.clone(),
            Json::Null => "no response body".to_string(),
            other => other.to_string(),
        })
}

/// Moves one JSON request to the service and back.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> HandlerResult<TransportResponse>;
}

/// `reqwest`-backed transport rooted at a base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> HandlerResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("conduit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| HandlerError::configuration(format!("http client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            self.base_url.clone()
        } else if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> HandlerResult<TransportResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self
            .client
            .request(method, self.url(&request.path))
            .query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(|err| {
            HandlerError::connection(format!("{} {}: {err}", request.method, request.path))
        })?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| HandlerError::connection(format!("reading response body: {err}")))?;
        let body = if text.trim().is_empty() {
            Json::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Json::String(text))
        };
        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn status_classes_map_to_error_kinds() {
        let cases = [
            (401, ErrorKind::ConfigurationError),
            (429, ErrorKind::ConnectionError),
            (503, ErrorKind::ConnectionError),
            (400, ErrorKind::RemoteRejected),
        ];
        for (status, kind) in cases {
            let err = TransportResponse::new(status, json!({"error_message": "nope"}))
                .into_success()
                .unwrap_err();
            assert_eq!(err.kind(), kind, "status {status}");
            assert!(err.to_string().contains("nope"), "{err}");
        }
    }

    #[test]
    fn nested_error_messages_are_extracted() {
        let err = TransportResponse::new(400, json!({"error": {"message": "bad timeMin"}}))
            .into_success()
            .unwrap_err();
        assert!(err.to_string().contains("bad timeMin"), "{err}");
    }

    #[test]
    fn http_transport_joins_paths() {
        let transport = HttpTransport::new("https://sandbox.plaid.com/").expect("client");
        assert_eq!(transport.url("/accounts/get"), "https://sandbox.plaid.com/accounts/get");
        assert_eq!(transport.url(""), "https://sandbox.plaid.com");
    }
}
