//! `reqwest`-backed transport for the Azure DevOps REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT,
};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::credential::PatCredential;
use super::request::{HttpMethod, OperationDescriptor, RawResponse};
use super::transport::Transport;
use crate::error::{ConfigError, TransportError};
use crate::utils::Throttler;

/// Azure DevOps REST API version sent when an operation does not name one.
pub const DEFAULT_API_VERSION: &str = "7.1";

/// Settings for [`ReqwestTransport`].
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Organization root, e.g. `https://dev.azure.com/my-org/`.
    pub organization_url: Url,
    pub pat: Option<SecretString>,
    pub timeout: Duration,
    /// Requests allowed in flight at once; 0 disables the cap.
    pub max_in_flight: usize,
    pub api_version: String,
}

impl TransportSettings {
    pub fn new(organization_url: Url) -> Self {
        Self {
            organization_url,
            pat: None,
            timeout: Duration::from_secs(30),
            max_in_flight: 10,
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

/// Sends operation descriptors over HTTPS.
///
/// Resolves each descriptor path against the organization URL and attaches
/// the PAT as Basic authentication. It also adds `api-version` when the
/// operation does not carry one.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Url,
    api_version: String,
    throttler: Throttler,
}

impl ReqwestTransport {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the organization URL cannot be
    /// a base URL or the client cannot be constructed.
    pub fn new(settings: TransportSettings) -> Result<Self, ConfigError> {
        let mut base_url = settings.organization_url;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::invalid(
                "base_url",
                format!("{base_url} cannot be used as a base URL"),
            ));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(pat) = settings.pat {
            let auth = PatCredential::new(pat).authorization_value();
            let mut value = HeaderValue::from_str(auth.expose_secret())
                .map_err(|e| ConfigError::invalid("pat", e.to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("devops-pacer/", env!("CARGO_PKG_VERSION"))),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ConfigError::invalid("transport", e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_version: settings.api_version,
            throttler: Throttler::new(settings.max_in_flight),
        })
    }

    /// Resolves an operation path against the organization URL.
    pub fn resolve_url(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidRequest(format!("{path}: {e}")))
    }

    fn build_request(
        &self,
        operation: &OperationDescriptor,
    ) -> Result<reqwest::RequestBuilder, TransportError> {
        let url = self.resolve_url(&operation.path)?;
        let method = match operation.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut request = self.client.request(method, url).query(&operation.query);
        if operation.query_value("api-version").is_none() {
            request = request.query(&[("api-version", self.api_version.as_str())]);
        }

        for (name, value) in &operation.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidRequest(format!("header {name}: {e}")))?;
            request = request.header(name, value);
        }

        if let Some(body) = &operation.body {
            // Work item updates use JSON Patch; anything else is plain JSON.
            let content_type = if operation.method == HttpMethod::Patch && body.is_array() {
                "application/json-patch+json"
            } else {
                "application/json"
            };
            let has_content_type = operation
                .headers
                .iter()
                .any(|(n, _)| n.eq_ignore_ascii_case("content-type"));
            if !has_content_type {
                request = request.header(CONTENT_TYPE, content_type);
            }
            request = request.body(body.to_string());
        }

        Ok(request)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Connection(err.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, operation: &OperationDescriptor) -> Result<RawResponse, TransportError> {
        let request = self.build_request(operation)?;

        self.throttler
            .execute(|| async move {
                let response = request.send().await.map_err(map_reqwest_error)?;
                let status = response.status().as_u16();
                let headers = response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|v| (name.as_str().to_string(), v.to_string()))
                    })
                    .collect();
                let body = response.bytes().await.map_err(map_reqwest_error)?;

                Ok::<_, TransportError>(RawResponse {
                    status,
                    headers,
                    body: body.to_vec(),
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport(url: &str) -> ReqwestTransport {
        let mut settings = TransportSettings::new(Url::parse(url).unwrap());
        settings.pat = Some(SecretString::from("pat".to_string()));
        ReqwestTransport::new(settings).unwrap()
    }

    /// # URL Resolution
    ///
    /// Tests that operation paths resolve under the organization, with or
    /// without a trailing slash on the base or a leading slash on the path.
    #[test]
    fn test_resolve_url() {
        let transport = transport("https://dev.azure.com/my-org");
        assert_eq!(
            transport.resolve_url("_apis/projects").unwrap().as_str(),
            "https://dev.azure.com/my-org/_apis/projects"
        );
        assert_eq!(
            transport
                .resolve_url("/my-project/_apis/git/repositories")
                .unwrap()
                .as_str(),
            "https://dev.azure.com/my-org/my-project/_apis/git/repositories"
        );
    }

    /// # Request Building
    ///
    /// Tests that the default api-version and JSON Patch content type are applied.
    ///
    /// ## Test Scenario
    /// - Builds a PATCH with an array body and no api-version
    /// - Builds a GET that names its own api-version
    ///
    /// ## Expected Outcome
    /// - api-version is added only when missing
    /// - JSON Patch bodies use the json-patch content type
    #[test]
    fn test_build_request() {
        let transport = transport("https://dev.azure.com/my-org/");

        let patch = OperationDescriptor::new(HttpMethod::Patch, "p/_apis/wit/workitems/1")
            .with_body(json!([{"op": "add", "path": "/fields/System.State", "value": "Done"}]));
        let request = transport.build_request(&patch).unwrap().build().unwrap();
        assert_eq!(request.url().query(), Some("api-version=7.1"));
        assert_eq!(
            request.headers().get(CONTENT_TYPE).unwrap(),
            "application/json-patch+json"
        );

        let get = OperationDescriptor::get("_apis/projects").with_query("api-version", "7.0");
        let request = transport.build_request(&get).unwrap().build().unwrap();
        assert_eq!(request.url().query(), Some("api-version=7.0"));
    }

    #[test]
    fn test_invalid_header_is_invalid_request() {
        let transport = transport("https://dev.azure.com/my-org/");
        let op = OperationDescriptor::get("_apis/projects").with_header("bad header", "x");
        let err = transport.build_request(&op).err().unwrap();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }
}
