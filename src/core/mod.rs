//! Request pacing core.
//!
//! Everything between "I want to call this endpoint" and "here is the
//! response" lives here:
//!
//! - Immutable rate-limit and retry configuration
//! - Token bucket admission control shared by all callers of a client
//! - Exponential backoff with jitter and server hints
//! - The retrying executor that ties them together
//! - Lazy continuation-token and offset pagination on top of the executor
//! - A one-minute log of sent requests for diagnostics
//!
//! Nothing in this module builds URLs or touches credentials; that is the
//! [`Transport`](crate::api::Transport)'s job.

pub mod backoff;
pub mod executor;
pub mod limiter;
pub mod pagination;
pub mod rate_limit;
pub mod stats;

pub use backoff::BackoffPolicy;
pub use executor::{Outcome, RequestAttempt, RequestExecutor};
pub use limiter::{RateLimitStatus, TokenBucketLimiter};
pub use pagination::{
    ContinuationStyle, CursorPage, DEFAULT_OFFSET_PAGE_SIZE, PageRequest, PaginationWalker,
    extract_continuation_token, extract_items,
};
pub use rate_limit::RateLimitConfig;
pub use stats::{RequestLog, RequestStats, STATS_WINDOW};

use crate::error::{ApiError, PacerError};

/// Process exit codes for the CLI.
///
/// These codes are meant for scripts and CI jobs, so each failure class that
/// a caller might react to differently gets its own value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// The command completed successfully.
    Success = 0,

    /// Unclassified error.
    GeneralError = 1,

    /// Configuration is missing or invalid.
    Configuration = 2,

    /// The upstream rejected the request (4xx). Retrying will not help.
    Rejected = 3,

    /// The upstream stayed unavailable after all retries.
    Unavailable = 4,

    /// A paginated listing needed more pages than allowed.
    PageLimit = 5,
}

impl ExitCode {
    /// Returns the numeric exit code value.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns a human-readable description of the exit code.
    pub fn description(self) -> &'static str {
        match self {
            ExitCode::Success => "Command completed successfully",
            ExitCode::GeneralError => "General error occurred",
            ExitCode::Configuration => "Configuration is missing or invalid",
            ExitCode::Rejected => "Request was rejected by Azure DevOps",
            ExitCode::Unavailable => "Azure DevOps remained unavailable after retries",
            ExitCode::PageLimit => "Listing exceeded the page limit",
        }
    }
}

impl From<&ApiError> for ExitCode {
    fn from(error: &ApiError) -> Self {
        match error {
            ApiError::Permanent { .. } => ExitCode::Rejected,
            ApiError::Transient { .. } | ApiError::Exhausted { .. } => ExitCode::Unavailable,
            ApiError::PaginationLimitExceeded { .. } => ExitCode::PageLimit,
        }
    }
}

impl From<&PacerError> for ExitCode {
    fn from(error: &PacerError) -> Self {
        match error {
            PacerError::Api(api) => api.into(),
            PacerError::Config(_) => ExitCode::Configuration,
            PacerError::Other(other) => other
                .downcast_ref::<ApiError>()
                .map(ExitCode::from)
                .or_else(|| {
                    other
                        .downcast_ref::<crate::error::ConfigError>()
                        .map(|_| ExitCode::Configuration)
                })
                .unwrap_or(ExitCode::GeneralError),
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.code())
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, PermanentKind, TransientKind};

    /// # Exit Code Values
    ///
    /// Verifies that all exit codes have the correct numeric values.
    ///
    /// ## Test Scenario
    /// - Checks each exit code variant against its expected value
    ///
    /// ## Expected Outcome
    /// - All exit codes map to their documented numeric values
    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::GeneralError.code(), 1);
        assert_eq!(ExitCode::Configuration.code(), 2);
        assert_eq!(ExitCode::Rejected.code(), 3);
        assert_eq!(ExitCode::Unavailable.code(), 4);
        assert_eq!(ExitCode::PageLimit.code(), 5);
    }

    /// # Exit Codes From Errors
    ///
    /// Verifies each error class maps to its exit code.
    ///
    /// ## Test Scenario
    /// - Converts permanent, exhausted, page-limit, config and anyhow-wrapped errors
    ///
    /// ## Expected Outcome
    /// - Wrapped errors are classified by their underlying type
    #[test]
    fn test_exit_code_from_errors() {
        let permanent = ApiError::Permanent {
            kind: PermanentKind::NotFound,
            status: Some(404),
            message: "gone".into(),
            operation: "GET x".into(),
        };
        let exhausted = ApiError::Exhausted {
            last_kind: TransientKind::Throttled,
            last_status: Some(429),
            attempts: 4,
            operation: "GET x".into(),
        };
        assert_eq!(ExitCode::from(&permanent), ExitCode::Rejected);
        assert_eq!(ExitCode::from(&exhausted), ExitCode::Unavailable);
        assert_eq!(
            ExitCode::from(&ApiError::PaginationLimitExceeded { max: 1, retrieved: 10 }),
            ExitCode::PageLimit
        );

        let config = PacerError::from(ConfigError::invalid("burst_capacity", "must be at least 1"));
        assert_eq!(ExitCode::from(&config), ExitCode::Configuration);

        let wrapped = PacerError::Other(anyhow::Error::new(exhausted).context("listing projects"));
        assert_eq!(ExitCode::from(&wrapped), ExitCode::Unavailable);

        let other = PacerError::Other(anyhow::anyhow!("stdout closed"));
        assert_eq!(ExitCode::from(&other), ExitCode::GeneralError);
    }

    #[test]
    fn test_exit_code_display() {
        assert_eq!(
            format!("{}", ExitCode::Success),
            ExitCode::Success.description()
        );
        let _: std::process::ExitCode = ExitCode::PageLimit.into();
    }
}
