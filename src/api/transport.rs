//! The outbound call contract.
//!
//! This trait is the seam between the request core and the network. It enables:
//! - Scripted transports for unit tests
//! - Alternative HTTP stacks
//! - Recording or replaying traffic

use async_trait::async_trait;

use super::request::{OperationDescriptor, RawResponse};
use crate::error::TransportError;

/// Sends one operation and returns whatever the upstream answered.
///
/// A transport reports every HTTP status as `Ok`, including 4xx and 5xx.
/// Classifying statuses belongs to the executor. `Err` is reserved for
/// failures where no status was received.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, operation: &OperationDescriptor) -> Result<RawResponse, TransportError>;
}
