//! Operation descriptors and upstream responses.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest `Retry-After` hint honored; larger hints are clamped to it.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// HTTP methods used by the Azure DevOps REST API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Parse a method name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// GET, PUT and DELETE are idempotent under HTTP semantics.
    #[must_use]
    pub fn default_idempotency(&self) -> Idempotency {
        match self {
            Self::Get | Self::Put | Self::Delete => Idempotency::Retryable,
            Self::Post | Self::Patch => Idempotency::NonRetryable,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an operation may be resent after an ambiguous failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Idempotency {
    /// Safe to resend after any transient failure.
    #[default]
    Retryable,
    /// Resent only when the upstream explicitly refused it unprocessed (429).
    NonRetryable,
}

/// A ready-to-send description of one upstream call.
///
/// `path` is relative to the organization URL; resolving it and attaching
/// credentials is the transport's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub idempotency: Idempotency,
}

impl OperationDescriptor {
    /// Creates a descriptor whose idempotency follows the method's HTTP semantics.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            idempotency: method.default_idempotency(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Post, path).with_body(body)
    }

    /// Adds a query parameter, replacing any existing value for the same name.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_query(name, value);
        self
    }

    pub fn set_query(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.query.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value,
            None => self.query.push((name, value)),
        }
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_idempotency(mut self, idempotency: Idempotency) -> Self {
        self.idempotency = idempotency;
        self
    }
}

/// `METHOD path`, used in logs and error context.
impl fmt::Display for OperationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// What a transport hands back: status, headers and the raw body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Convenience for transports and tests: a response with a JSON body.
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string().into_bytes(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The `Retry-After` hint in (possibly fractional) seconds, at most
    /// [`MAX_RETRY_AFTER`].
    ///
    /// Unparseable, negative or non-finite values are ignored.
    pub fn retry_after(&self) -> Option<Duration> {
        let raw = self.header("retry-after")?;
        let secs: f64 = raw.trim().parse().ok()?;
        if secs.is_finite() && secs >= 0.0 {
            let hint = Duration::try_from_secs_f64(secs).unwrap_or(MAX_RETRY_AFTER);
            Some(hint.min(MAX_RETRY_AFTER))
        } else {
            None
        }
    }
}

/// A successful upstream response with its body parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub payload: Value,
}

impl ApiResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_parsing_and_idempotency() {
        assert_eq!(HttpMethod::parse("get"), Some(HttpMethod::Get));
        assert_eq!(HttpMethod::parse("PATCH"), Some(HttpMethod::Patch));
        assert_eq!(HttpMethod::parse("TRACE"), None);

        assert_eq!(
            OperationDescriptor::get("_apis/projects").idempotency,
            Idempotency::Retryable
        );
        assert_eq!(
            OperationDescriptor::post("_apis/wit/wiql", json!({})).idempotency,
            Idempotency::NonRetryable
        );
    }

    /// # Query Replacement
    ///
    /// Tests that setting an existing query parameter replaces it in place.
    ///
    /// ## Test Scenario
    /// - Adds `$top` and `continuationToken`, then overwrites the token
    ///
    /// ## Expected Outcome
    /// - Only one token entry exists and parameter order is preserved
    #[test]
    fn test_query_replacement() {
        let mut op = OperationDescriptor::get("_apis/git/repositories")
            .with_query("$top", "100")
            .with_query("continuationToken", "t1");
        op.set_query("continuationToken", "t2");

        assert_eq!(op.query.len(), 2);
        assert_eq!(op.query_value("continuationToken"), Some("t2"));
        assert_eq!(op.query[0].0, "$top");
        assert_eq!(op.to_string(), "GET _apis/git/repositories");
    }

    /// # Retry-After Parsing
    ///
    /// Tests header lookup and retry-after hint parsing.
    #[test]
    fn test_retry_after_parsing() {
        let response = RawResponse::new(429).with_header("Retry-After", "3");
        assert_eq!(response.retry_after(), Some(Duration::from_secs(3)));

        let fractional = RawResponse::new(429).with_header("retry-after", " 1.5 ");
        assert_eq!(fractional.retry_after(), Some(Duration::from_millis(1500)));

        let http_date =
            RawResponse::new(429).with_header("Retry-After", "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(http_date.retry_after(), None);

        let negative = RawResponse::new(429).with_header("Retry-After", "-4");
        assert_eq!(negative.retry_after(), None);

        let huge = RawResponse::new(429).with_header("Retry-After", "10000000000000000000");
        assert_eq!(huge.retry_after(), Some(MAX_RETRY_AFTER));
        let beyond_duration = RawResponse::new(429).with_header("Retry-After", "1e300");
        assert_eq!(beyond_duration.retry_after(), Some(MAX_RETRY_AFTER));

        assert_eq!(RawResponse::new(429).retry_after(), None);
    }
}
