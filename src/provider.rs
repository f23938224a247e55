// 🤖 Extraction Provider - capability boundary to the external AI service
//
// The provider is opaque: raw bytes + mime type in, structured receipt fields out.
// Everything about validation lives in extraction.rs, not here.

use crate::extraction::FailureClass;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// REQUEST / RESPONSE
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    pub file_name: &'a str,
    pub mime_type: &'a str,
    pub bytes: &'a [u8],
}

/// Fields as reported by the provider, before any validation.
/// Numeric fields may arrive as JSON numbers or strings, so they stay untyped here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderFields {
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub tax: Option<serde_json::Value>,
    #[serde(default)]
    pub tax_percentage: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub confidence: Option<serde_json::Value>,
}

// ============================================================================
// PROVIDER ERRORS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderErrorKind {
    Timeout,
    Auth,
    Network,
    RateLimited,
    Server,
    /// Response arrived but could not be decoded
    Malformed,
    Other,
}

impl ProviderErrorKind {
    pub fn failure_class(&self) -> FailureClass {
        match self {
            ProviderErrorKind::Timeout
            | ProviderErrorKind::Auth
            | ProviderErrorKind::Network
            | ProviderErrorKind::RateLimited
            | ProviderErrorKind::Server => FailureClass::Api,
            ProviderErrorKind::Malformed => FailureClass::Parsing,
            ProviderErrorKind::Other => FailureClass::Unknown,
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Auth => "authentication failed",
            ProviderErrorKind::Network => "network error",
            ProviderErrorKind::RateLimited => "rate limited",
            ProviderErrorKind::Server => "provider error",
            ProviderErrorKind::Malformed => "malformed response",
            ProviderErrorKind::Other => "unexpected error",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        ProviderError {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        ProviderError::new(
            ProviderErrorKind::Timeout,
            format!("no response within {}s", after.as_secs()),
        )
    }
}

// ============================================================================
// CAPABILITY TRAIT
// ============================================================================

/// Single-method capability so a deterministic fake can stand in for tests.
/// Implementations must give up after `timeout` and report `ProviderErrorKind::Timeout`.
pub trait ExtractionProvider {
    fn extract(
        &self,
        request: &ExtractionRequest<'_>,
        timeout: Duration,
    ) -> Result<ProviderFields, ProviderError>;

    /// Name for logs
    fn name(&self) -> &str {
        "provider"
    }
}

// ============================================================================
// HTTP PROVIDER
// ============================================================================

/// POSTs the raw file to an HTTP endpoint and expects `ProviderFields` as JSON
pub struct HttpProvider {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpProvider {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| ProviderError::new(ProviderErrorKind::Other, e.to_string()))?;

        Ok(HttpProvider {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ExtractionProvider for HttpProvider {
    fn extract(
        &self,
        request: &ExtractionRequest<'_>,
        timeout: Duration,
    ) -> Result<ProviderFields, ProviderError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .header(reqwest::header::CONTENT_TYPE, request.mime_type)
            .header("X-File-Name", request.file_name)
            .body(request.bytes.to_vec());

        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().map_err(|e| transport_error(e, timeout))?;
        let status = response.status();
        let body = response.text().map_err(|e| transport_error(e, timeout))?;

        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body));
        }

        serde_json::from_str::<ProviderFields>(&body)
            .map_err(|e| ProviderError::new(ProviderErrorKind::Malformed, e.to_string()))
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(timeout)
    } else if err.is_connect() || err.is_request() {
        ProviderError::new(ProviderErrorKind::Network, err.to_string())
    } else if err.is_decode() || err.is_body() {
        ProviderError::new(ProviderErrorKind::Malformed, err.to_string())
    } else {
        ProviderError::new(ProviderErrorKind::Other, err.to_string())
    }
}

fn status_error(status: u16, body: &str) -> ProviderError {
    let snippet: String = body.chars().take(200).collect();
    let kind = match status {
        401 | 403 => ProviderErrorKind::Auth,
        408 | 504 => ProviderErrorKind::Timeout,
        429 => ProviderErrorKind::RateLimited,
        _ => ProviderErrorKind::Server,
    };
    ProviderError::new(kind, format!("HTTP {}: {}", status, snippet))
}

// ============================================================================
// MOCK PROVIDER
// ============================================================================

/// Deterministic provider for tests and dry runs.
///
/// Responses are keyed by file name; unknown files get the default response.
#[derive(Debug, Clone)]
pub struct MockProvider {
    default_response: Result<ProviderFields, ProviderError>,
    responses: Arc<Mutex<HashMap<String, Result<ProviderFields, ProviderError>>>>,
    calls: Arc<Mutex<Vec<(String, Duration)>>>,
}

impl MockProvider {
    pub fn new(default_fields: ProviderFields) -> Self {
        MockProvider {
            default_response: Ok(default_fields),
            responses: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Provider that fails every file unless a response is registered
    pub fn failing(error: ProviderError) -> Self {
        MockProvider {
            default_response: Err(error),
            responses: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn add_response(&mut self, file_name: impl Into<String>, fields: ProviderFields) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(file_name.into(), Ok(fields));
        }
    }

    pub fn add_error(&mut self, file_name: impl Into<String>, error: ProviderError) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(file_name.into(), Err(error));
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// File names in the order they were sent to the provider
    pub fn called_files(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|c| c.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn last_timeout(&self) -> Option<Duration> {
        self.calls
            .lock()
            .ok()
            .and_then(|c| c.last().map(|(_, timeout)| *timeout))
    }
}

impl ExtractionProvider for MockProvider {
    fn extract(
        &self,
        request: &ExtractionRequest<'_>,
        timeout: Duration,
    ) -> Result<ProviderFields, ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((request.file_name.to_string(), timeout));
        }

        let registered = self
            .responses
            .lock()
            .ok()
            .and_then(|responses| responses.get(request.file_name).cloned());

        registered.unwrap_or_else(|| self.default_response.clone())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> ExtractionRequest<'_> {
        ExtractionRequest {
            file_name: name,
            mime_type: "image/jpeg",
            bytes: b"\xFF\xD8\xFFdata",
        }
    }

    #[test]
    fn test_error_kinds_map_to_failure_classes() {
        assert_eq!(ProviderErrorKind::Timeout.failure_class(), FailureClass::Api);
        assert_eq!(ProviderErrorKind::Auth.failure_class(), FailureClass::Api);
        assert_eq!(ProviderErrorKind::Malformed.failure_class(), FailureClass::Parsing);
        assert_eq!(ProviderErrorKind::Other.failure_class(), FailureClass::Unknown);
    }

    #[test]
    fn test_status_error_classification() {
        assert_eq!(status_error(401, "").kind, ProviderErrorKind::Auth);
        assert_eq!(status_error(504, "").kind, ProviderErrorKind::Timeout);
        assert_eq!(status_error(429, "").kind, ProviderErrorKind::RateLimited);
        assert_eq!(status_error(500, "boom").kind, ProviderErrorKind::Server);
        assert!(status_error(500, "boom").message.contains("boom"));
    }

    #[test]
    fn test_provider_fields_from_json() {
        let fields: ProviderFields = serde_json::from_str(
            r#"{"amount": "12.50", "currency": "EUR", "date": "2024-03-02", "confidence": 88}"#,
        )
        .unwrap();

        assert_eq!(fields.currency.as_deref(), Some("EUR"));
        assert_eq!(fields.confidence, Some(serde_json::json!(88)));
        assert!(fields.tax.is_none());
    }

    #[test]
    fn test_provider_fields_accept_string_typed_optionals() {
        let fields: ProviderFields = serde_json::from_str(
            r#"{"amount":"12.50","currency":"EUR","date":"2024-03-02","tax_percentage":"19%","confidence":"88"}"#,
        )
        .unwrap();

        assert_eq!(fields.tax_percentage, Some(serde_json::json!("19%")));
        assert_eq!(fields.confidence, Some(serde_json::json!("88")));
    }

    #[test]
    fn test_mock_provider_routes_by_file_name() {
        let mut provider = MockProvider::new(ProviderFields::default());
        provider.add_response(
            "special.jpg",
            ProviderFields {
                currency: Some("USD".to_string()),
                ..Default::default()
            },
        );
        provider.add_error("broken.jpg", ProviderError::timeout(Duration::from_secs(5)));

        let special = provider.extract(&request("special.jpg"), Duration::from_secs(5)).unwrap();
        assert_eq!(special.currency.as_deref(), Some("USD"));

        let broken = provider.extract(&request("broken.jpg"), Duration::from_secs(5));
        assert_eq!(broken.unwrap_err().kind, ProviderErrorKind::Timeout);

        let other = provider.extract(&request("other.jpg"), Duration::from_secs(7)).unwrap();
        assert_eq!(other, ProviderFields::default());

        assert_eq!(provider.call_count(), 3);
        assert_eq!(provider.last_timeout(), Some(Duration::from_secs(7)));
        assert_eq!(provider.called_files(), vec!["special.jpg", "broken.jpg", "other.jpg"]);
    }
}
