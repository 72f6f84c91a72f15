//! Retrying request executor.
//!
//! Every outbound call goes through [`RequestExecutor::execute`]: acquire a
//! token, send, classify, and on a transient failure back off and try again
//! until the retry budget runs out.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use super::{BackoffPolicy, RateLimitConfig, RequestLog, RequestStats, TokenBucketLimiter};
use crate::api::{ApiResponse, Idempotency, OperationDescriptor, RawResponse, Transport};
use crate::error::{
    ApiError, FailureKind, PermanentKind, TransientKind, TransportError,
};

/// Classified result of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(ApiResponse),
    Transient {
        kind: TransientKind,
        status: Option<u16>,
        retry_after: Option<Duration>,
    },
    Permanent {
        kind: PermanentKind,
        status: Option<u16>,
        message: String,
    },
}

impl Outcome {
    /// Classifies what the transport returned.
    ///
    /// Only 429 responses carry a retry-after hint; 5xx and network failures
    /// fall back to exponential backoff.
    pub fn classify(result: Result<RawResponse, TransportError>) -> Self {
        let raw = match result {
            Ok(raw) => raw,
            Err(err) => {
                return match err.kind() {
                    FailureKind::Transient(kind) => Self::Transient {
                        kind,
                        status: None,
                        retry_after: None,
                    },
                    FailureKind::Permanent(kind) => Self::Permanent {
                        kind,
                        status: None,
                        message: err.to_string(),
                    },
                };
            }
        };

        match FailureKind::from_status(raw.status) {
            None => Self::Success(ApiResponse {
                status: raw.status,
                payload: parse_payload(&raw.body),
                headers: raw.headers,
            }),
            Some(FailureKind::Transient(kind)) => Self::Transient {
                kind,
                status: Some(raw.status),
                retry_after: if kind == TransientKind::Throttled {
                    raw.retry_after()
                } else {
                    None
                },
            },
            Some(FailureKind::Permanent(kind)) => Self::Permanent {
                kind,
                status: Some(raw.status),
                message: error_message(&raw.body, raw.status),
            },
        }
    }
}

/// One try of one operation.
#[derive(Debug, Clone)]
pub struct RequestAttempt<'a> {
    /// Zero-based attempt number.
    pub number: u32,
    pub operation: &'a OperationDescriptor,
    pub outcome: Outcome,
}

/// Empty bodies become `null`; bodies that are not JSON are wrapped as `{"text": ...}`.
fn parse_payload(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(body).unwrap_or_else(|_| {
        serde_json::json!({ "text": String::from_utf8_lossy(body) })
    })
}

/// Pulls the upstream's explanation out of an Azure DevOps error body.
fn error_message(body: &[u8], status: u16) -> String {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error").and_then(|e| e.get("message")))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"))
}

/// Executes operations with rate limiting and bounded retry.
///
/// Cheap to clone; clones share the same limiter and transport.
///
/// # Example
///
/// ```rust,no_run
/// use devops_pacer::api::{OperationDescriptor, ReqwestTransport, TransportSettings};
/// use devops_pacer::core::{RateLimitConfig, RequestExecutor};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let url = url::Url::parse("https://dev.azure.com/my-org/")?;
/// let transport = Arc::new(ReqwestTransport::new(TransportSettings::new(url))?);
/// let executor = RequestExecutor::new(transport, &RateLimitConfig::default());
///
/// let response = executor.execute(&OperationDescriptor::get("_apis/projects")).await?;
/// println!("{}", response.payload);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RequestExecutor {
    limiter: Arc<TokenBucketLimiter>,
    backoff: BackoffPolicy,
    transport: Arc<dyn Transport>,
    log: Arc<RequestLog>,
}

impl RequestExecutor {
    /// Creates an executor with its own limiter.
    pub fn new(transport: Arc<dyn Transport>, config: &RateLimitConfig) -> Self {
        Self::with_limiter(
            transport,
            Arc::new(TokenBucketLimiter::from_config(config)),
            BackoffPolicy::from_config(config),
        )
    }

    /// Creates an executor around an existing limiter, e.g. one shared with
    /// other executors for the same organization.
    pub fn with_limiter(
        transport: Arc<dyn Transport>,
        limiter: Arc<TokenBucketLimiter>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            limiter,
            backoff,
            transport,
            log: Arc::new(RequestLog::new()),
        }
    }

    pub fn limiter(&self) -> &Arc<TokenBucketLimiter> {
        &self.limiter
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Requests sent by this executor and its clones in the last minute.
    pub fn request_stats(&self) -> RequestStats {
        self.log.stats()
    }

    async fn attempt<'a>(&self, number: u32, operation: &'a OperationDescriptor) -> RequestAttempt<'a> {
        self.limiter.acquire().await;
        self.log.record(operation);
        debug!(operation = %operation, attempt = number, "sending request");
        let result = self.transport.send(operation).await;
        RequestAttempt {
            number,
            operation,
            outcome: Outcome::classify(result),
        }
    }

    /// Executes one logical operation.
    ///
    /// Returns the parsed payload on 2xx. Otherwise returns one of:
    /// - [`ApiError::Permanent`]: the upstream rejected the request; sent exactly once
    /// - [`ApiError::Exhausted`]: transient failures outlasted `max_retries`
    /// - [`ApiError::Transient`]: a non-retryable operation hit a transient
    ///   failure other than throttling
    ///
    /// Dropping the returned future cancels whichever wait or request is in
    /// progress.
    pub async fn execute(&self, operation: &OperationDescriptor) -> Result<ApiResponse, ApiError> {
        let mut number = 0;
        loop {
            let attempt = self.attempt(number, operation).await;

            let (kind, status, retry_after) = match attempt.outcome {
                Outcome::Success(response) => {
                    if attempt.number > 0 {
                        debug!(
                            operation = %operation,
                            attempts = attempt.number + 1,
                            "request succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Outcome::Permanent {
                    kind,
                    status,
                    message,
                } => {
                    debug!(operation = %operation, %kind, ?status, "permanent failure");
                    return Err(ApiError::Permanent {
                        kind,
                        status,
                        message,
                        operation: operation.to_string(),
                    });
                }
                Outcome::Transient {
                    kind,
                    status,
                    retry_after,
                } => (kind, status, retry_after),
            };

            if let Some(hint) = retry_after {
                match Instant::now().checked_add(hint) {
                    Some(until) => self.limiter.defer_until(until),
                    None => warn!(
                        operation = %operation,
                        ?hint,
                        "retry-after hint out of range, not deferring"
                    ),
                }
            }

            if operation.idempotency == Idempotency::NonRetryable
                && kind != TransientKind::Throttled
            {
                warn!(operation = %operation, %kind, ?status, "transient failure on non-retryable operation");
                return Err(ApiError::Transient {
                    kind,
                    status,
                    attempts: attempt.number + 1,
                    operation: operation.to_string(),
                });
            }

            if !self
                .backoff
                .should_retry(attempt.number, FailureKind::Transient(kind))
            {
                warn!(
                    operation = %operation,
                    %kind,
                    ?status,
                    attempts = attempt.number + 1,
                    "retries exhausted"
                );
                return Err(ApiError::Exhausted {
                    last_kind: kind,
                    last_status: status,
                    attempts: attempt.number + 1,
                    operation: operation.to_string(),
                });
            }

            let delay = self.backoff.next_delay(attempt.number, retry_after);
            warn!(
                operation = %operation,
                %kind,
                ?status,
                attempt = attempt.number,
                delay_ms = delay.as_millis() as u64,
                "transient failure, retrying"
            );
            sleep(delay).await;
            number += 1;
        }
    }
}
