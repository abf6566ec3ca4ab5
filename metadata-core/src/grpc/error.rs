//! Error conversion utilities between `AppError` and `tonic::Status`.
//!
//! | AppError | gRPC Status |
//! |----------|-------------|
//! | `Unavailable` | `UNAVAILABLE` |
//! | `InvalidArgument` | `INVALID_ARGUMENT` |
//! | `Internal` | `INTERNAL` |
//! | `DatabaseError` | `INTERNAL` |
//! | `ConfigError` | `INTERNAL` |

use tonic::{Code, Status};

use crate::error::AppError;

/// Extension trait for converting types into `tonic::Status`.
pub trait IntoStatus {
    /// Convert into a `tonic::Status`.
    fn into_status(self) -> Status;
}

impl IntoStatus for AppError {
    fn into_status(self) -> Status {
        match self {
            AppError::Unavailable(msg) => Status::unavailable(msg),
            AppError::InvalidArgument(msg) => Status::invalid_argument(msg),
            // Channel shutdown failures carry their cause to the caller.
            AppError::Internal(err) => Status::internal(err.to_string()),
            AppError::DatabaseError(err) => {
                tracing::error!(error = %err, "Database error");
                Status::internal("Database error")
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                Status::internal("Configuration error")
            }
        }
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        err.into_status()
    }
}

/// Convert a `tonic::Status` returned by the authorization service into an `AppError`.
impl From<Status> for AppError {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::Unavailable | Code::DeadlineExceeded => {
                AppError::Unavailable(status.message().to_string())
            }
            Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
                AppError::InvalidArgument(status.message().to_string())
            }
            _ => AppError::Internal(anyhow::anyhow!(
                "Authorization service returned {:?}: {}",
                status.code(),
                status.message()
            )),
        }
    }
}
