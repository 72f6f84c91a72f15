//! Client facade over the pacing core.

use std::sync::Arc;

use futures::stream::BoxStream;
use serde_json::Value;
use tracing::info;

use super::http::ReqwestTransport;
use super::request::{ApiResponse, OperationDescriptor};
use super::transport::Transport;
use crate::config::ResolvedConfig;
use crate::core::{
    CursorPage, PageRequest, PaginationWalker, RateLimitConfig, RateLimitStatus, RequestExecutor,
    RequestStats,
};
use crate::error::{ApiError, ConfigError};

/// Azure DevOps API client for one organization.
///
/// Every call made through a client, or any of its clones, shares one token
/// bucket. A throttled response seen by one caller therefore slows down all
/// of them.
///
/// # Example
///
/// ```rust,no_run
/// use devops_pacer::api::{AzureDevOpsClient, ReqwestTransport, TransportSettings};
/// use devops_pacer::core::RateLimitConfig;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let url = url::Url::parse("https://dev.azure.com/my-org/")?;
/// let transport = Arc::new(ReqwestTransport::new(TransportSettings::new(url))?);
/// let client = AzureDevOpsClient::with_transport(transport, &RateLimitConfig::default());
///
/// let repos = client
///     .get_json("my-project/_apis/git/repositories", &[])
///     .await?;
/// println!("{}", repos["count"]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AzureDevOpsClient {
    walker: PaginationWalker,
    page_size: Option<u32>,
}

impl AzureDevOpsClient {
    /// Creates a client around any transport.
    pub fn with_transport(transport: Arc<dyn Transport>, config: &RateLimitConfig) -> Self {
        Self {
            walker: PaginationWalker::new(RequestExecutor::new(transport, config)),
            page_size: None,
        }
    }

    /// Creates a client backed by [`ReqwestTransport`] from resolved configuration.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built from the transport settings.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, ConfigError> {
        let transport = ReqwestTransport::new(config.transport.clone())?;
        info!(
            organization = %config.organization,
            requests_per_second = config.rate_limit.requests_per_second(),
            burst_capacity = config.rate_limit.burst_capacity(),
            "created Azure DevOps client"
        );
        Ok(Self::with_transport(Arc::new(transport), &config.rate_limit)
            .with_page_size(config.page_size))
    }

    /// Default `$top` for requests built by [`list_request`](Self::list_request).
    #[must_use]
    pub fn with_page_size(mut self, page_size: Option<u32>) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn executor(&self) -> &RequestExecutor {
        self.walker.executor()
    }

    pub fn walker(&self) -> &PaginationWalker {
        &self.walker
    }

    /// Wraps `template` in a page request using the client's default page size.
    pub fn page_request(&self, template: OperationDescriptor) -> PageRequest {
        let request = PageRequest::new(template);
        match self.page_size {
            Some(size) => request.with_page_size(size),
            None => request,
        }
    }

    /// A GET listing request for `path`.
    pub fn list_request(&self, path: impl Into<String>) -> PageRequest {
        self.page_request(OperationDescriptor::get(path))
    }

    /// Executes one operation with rate limiting and retry.
    pub async fn execute(&self, operation: &OperationDescriptor) -> Result<ApiResponse, ApiError> {
        self.executor().execute(operation).await
    }

    /// GETs `path` with the given query parameters and returns the JSON payload.
    pub async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ApiError> {
        let operation = query
            .iter()
            .fold(OperationDescriptor::get(path), |op, (name, value)| {
                op.with_query(*name, *value)
            });
        Ok(self.execute(&operation).await?.payload)
    }

    pub fn pages(&self, request: PageRequest) -> BoxStream<'static, Result<CursorPage, ApiError>> {
        self.walker.pages(request)
    }

    pub fn paginate(&self, request: PageRequest) -> BoxStream<'static, Result<Value, ApiError>> {
        self.walker.paginate(request)
    }

    pub async fn collect_all(&self, request: PageRequest) -> Result<Vec<Value>, ApiError> {
        self.walker.collect_all(request).await
    }

    /// Current limiter state.
    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.executor().limiter().snapshot()
    }

    /// Requests sent in the last minute, by method and endpoint.
    pub fn request_stats(&self) -> RequestStats {
        self.executor().request_stats()
    }

    /// Verifies credentials and reachability with the cheapest listing call.
    pub async fn test_connection(&self) -> Result<(), ApiError> {
        self.get_json("_apis/projects", &[("$top", "1")]).await?;
        Ok(())
    }
}
