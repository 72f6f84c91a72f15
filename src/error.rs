//! Unified error handling for devops-pacer.
//!
//! Every outbound call resolves to exactly one of three outcomes: a payload,
//! a permanent rejection, or an exhausted retry budget. The enums in this
//! module make those outcomes pattern-matchable instead of string-matchable.
//!
//! ## Error Categories
//!
//! - [`ApiError`]: the result of executing or paginating an upstream operation
//! - [`TransportError`]: failures reported by the transport before any status was received
//! - [`ConfigError`]: errors from configuration loading and validation
//!
//! ## Example
//!
//! ```rust
//! use devops_pacer::error::{ApiError, PermanentKind};
//!
//! fn describe(err: &ApiError) -> &'static str {
//!     match err {
//!         ApiError::Permanent { kind: PermanentKind::NotFound, .. } => "missing",
//!         ApiError::Permanent { .. } => "rejected",
//!         ApiError::Exhausted { .. } => "gave up",
//!         _ => "other",
//!     }
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the devops-pacer library.
#[derive(Error, Debug)]
pub enum PacerError {
    /// An upstream operation failed.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// An error occurred while loading or validating configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A generic error for cases not covered by specific error types.
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Failures expected to clear up if the same request is sent again later.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// The upstream answered 429 or otherwise signalled throttling.
    #[error("throttled")]
    Throttled,
    /// The upstream answered with a 5xx status.
    #[error("server error")]
    ServerError,
    /// The request timed out before a response arrived.
    #[error("timeout")]
    Timeout,
    /// The connection could not be established or was reset.
    #[error("connection failure")]
    Connection,
}

/// Failures that will not resolve by resending the identical request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentKind {
    /// 401: missing, invalid or expired credentials.
    #[error("authentication failed")]
    Authentication,
    /// 403: credentials are valid but lack permission.
    #[error("authorization denied")]
    Authorization,
    /// 400, 409, 422: the request content was rejected.
    #[error("validation failed")]
    Validation,
    /// 404: the resource does not exist.
    #[error("resource not found")]
    NotFound,
    /// Any other non-success status outside the transient set.
    #[error("request rejected")]
    Rejected,
    /// The request could not be built or sent as described.
    #[error("invalid request")]
    InvalidRequest,
}

impl PermanentKind {
    /// Maps a non-success, non-transient HTTP status to its rejection reason.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Authentication,
            403 => Self::Authorization,
            404 => Self::NotFound,
            400 | 409 | 422 => Self::Validation,
            _ => Self::Rejected,
        }
    }
}

/// Classification of one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient(TransientKind),
    Permanent(PermanentKind),
}

impl FailureKind {
    /// Classifies an HTTP status. Returns `None` for 2xx.
    #[must_use]
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            429 => Some(Self::Transient(TransientKind::Throttled)),
            500..=599 => Some(Self::Transient(TransientKind::ServerError)),
            other => Some(Self::Permanent(PermanentKind::from_status(other))),
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(kind) => write!(f, "transient ({kind})"),
            Self::Permanent(kind) => write!(f, "permanent ({kind})"),
        }
    }
}

/// Errors produced by executing or paginating an upstream operation.
///
/// `operation` is the `METHOD path` summary of the descriptor that failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// A transient failure that was not retried because the operation is not
    /// safe to resend.
    #[error("{operation}: {kind} on attempt {attempts}{}", fmt_status(.status))]
    Transient {
        kind: TransientKind,
        status: Option<u16>,
        attempts: u32,
        operation: String,
    },

    /// The upstream rejected the request. Never retried.
    #[error("{operation}: {kind}{}: {message}", fmt_status(.status))]
    Permanent {
        kind: PermanentKind,
        status: Option<u16>,
        message: String,
        operation: String,
    },

    /// Transient failures persisted past the retry budget.
    #[error("{operation}: retries exhausted after {attempts} attempt(s), last failure {last_kind}{}", fmt_status(.last_status))]
    Exhausted {
        last_kind: TransientKind,
        last_status: Option<u16>,
        attempts: u32,
        operation: String,
    },

    /// A paginated walk needed more pages than the configured maximum.
    #[error("Exceeded maximum pages ({max}) while paginating, retrieved {retrieved} items")]
    PaginationLimitExceeded {
        /// Maximum allowed pages.
        max: usize,
        /// Number of items retrieved before the limit was hit.
        retrieved: usize,
    },
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl ApiError {
    /// The last HTTP status observed, if any response was received.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Permanent { status, .. } => *status,
            Self::Exhausted { last_status, .. } => *last_status,
            Self::PaginationLimitExceeded { .. } => None,
        }
    }

    /// Number of transport calls made for the failing operation.
    #[must_use]
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Transient { attempts, .. } | Self::Exhausted { attempts, .. } => Some(*attempts),
            Self::Permanent { .. } => Some(1),
            Self::PaginationLimitExceeded { .. } => None,
        }
    }

    #[must_use]
    pub fn permanent_kind(&self) -> Option<PermanentKind> {
        match self {
            Self::Permanent { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Failures reported by a transport before an HTTP status was received.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::Transient(TransientKind::Timeout),
            Self::Connection(_) => FailureKind::Transient(TransientKind::Connection),
            Self::InvalidRequest(_) => FailureKind::Permanent(PermanentKind::InvalidRequest),
        }
    }
}

/// Errors that can occur during configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required configuration field is missing.
    #[error("{field} is required (use --{flag}, {env_var} env var, or config file)")]
    MissingRequired {
        /// Name of the missing field.
        field: String,
        /// Command-line flag for this field.
        flag: String,
        /// Environment variable name for this field.
        env_var: String,
    },

    /// Failed to read the configuration file.
    #[error("Failed to read config file at {path}: {message}")]
    FileReadError { path: PathBuf, message: String },

    /// Failed to parse the configuration file.
    #[error("Failed to parse config file at {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    /// An invalid value was provided for a configuration field.
    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        /// Name of the field with invalid value.
        field: String,
        /// Description of why the value is invalid.
        message: String,
    },

    /// Failed to create config directory.
    #[error("Failed to create config directory at {path}: {message}")]
    DirectoryCreationError { path: PathBuf, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Type alias for Results using PacerError.
pub type PacerResult<T> = std::result::Result<T, PacerError>;
