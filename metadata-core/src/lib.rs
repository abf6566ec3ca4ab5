//! metadata-core: Shared infrastructure for the metadata service.
pub mod config;
pub mod error;
pub mod grpc;
pub mod observability;
pub mod retry;

pub use prost;
pub use tokio;
pub use tonic;
pub use tracing;
