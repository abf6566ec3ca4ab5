//! gRPC client infrastructure for talking to the authorization service.
//!
//! This module provides:
//! - The shared authorization channel and its per-service stubs
//! - Identity header resolution for outbound calls
//! - Interceptors attaching identity and trace context
//! - Error conversion between `AppError` and `tonic::Status`

pub mod authz_channel;
pub mod credentials;
pub mod error;
pub mod headers;
pub mod interceptors;

pub use authz_channel::{
    ConnectionManager, ConnectionState, PlaintextTransport, ServiceKind, ServiceStub, Transport,
};
pub use credentials::{
    BackgroundTaskGuard, BackgroundTasks, CallContext, CredentialContext, ServiceAccount,
};
pub use error::IntoStatus;
pub use headers::HeaderSet;
pub use interceptors::AttachHeaders;
