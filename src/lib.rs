//! # devops-pacer
//!
//! Rate limiting, retry and pagination for the Azure DevOps REST API.
//!
//! - A token bucket admits every outbound request and is shared by all
//!   clones of a client
//! - Transient failures (429, 5xx, timeouts, dropped connections) are
//!   retried with exponential backoff; server retry-after hints win
//! - Permanent failures (401, 403, 404, validation) surface immediately
//!   as typed errors
//! - Continuation-token listings are exposed as lazy streams
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use devops_pacer::{AzureDevOpsClient, Config};
//! use futures::TryStreamExt;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_from_file()?
//!     .merge(Config::load_from_env())
//!     .resolve()?;
//! let client = AzureDevOpsClient::from_config(&config)?;
//!
//! let mut repos = client.paginate(client.list_request("my-project/_apis/git/repositories"));
//! while let Some(repo) = repos.try_next().await? {
//!     println!("{}", repo["name"]);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod models;
pub mod parsed_property;
pub mod utils;

// Re-export commonly used types for convenience
pub use api::AzureDevOpsClient;
pub use config::{Config, ResolvedConfig};
pub use error::{ApiError, PacerError, PacerResult};
pub use models::Args;

/// Version string shown by `--version`, including the build's git revision.
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");
