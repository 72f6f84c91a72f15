//! Azure DevOps REST API surface.
//!
//! This module holds everything that knows about HTTP:
//!
//! - [`OperationDescriptor`] and the response types exchanged with a transport
//! - The [`Transport`] trait and its `reqwest` implementation
//! - PAT authentication
//! - [`AzureDevOpsClient`], the facade that wires a transport to the pacing core
//!
//! ## Example
//!
//! ```rust,no_run
//! use devops_pacer::{AzureDevOpsClient, Config};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let resolved = Config::load_from_env().resolve()?;
//! let client = AzureDevOpsClient::from_config(&resolved)?;
//!
//! let projects = client
//!     .collect_all(client.list_request("_apis/projects"))
//!     .await?;
//! println!("Found {} projects", projects.len());
//! # Ok(())
//! # }
//! ```

mod client;
mod credential;
mod http;
mod request;
mod transport;

pub use client::AzureDevOpsClient;
pub use credential::PatCredential;
pub use http::{DEFAULT_API_VERSION, ReqwestTransport, TransportSettings};
pub use request::{
    ApiResponse, HttpMethod, Idempotency, MAX_RETRY_AFTER, OperationDescriptor, RawResponse,
};
pub use transport::Transport;
