//! Error types for recordkit.

use crate::record::RecordId;
use thiserror::Error;

/// Result type for configuration construction.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for structural recordset operations.
pub type RecordsetResult<T> = Result<T, RecordsetError>;

/// Result type returned by every CRUD function.
///
/// `Ok` carries the service's envelope (which may itself describe a failed
/// operation); `Err` is an unhandled fault on the call path.
pub type ServiceResult<T> = Result<crate::ResultEnvelope<T>, ServiceError>;

/// A configuration violates the slot invariants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A `create` function was supplied without an `update` function.
    #[error("a creatable entity must be updatable: create is set but update is missing")]
    CreateRequiresUpdate,

    /// An `update` function was supplied without a `read` function.
    #[error("an updatable entity must be readable: update is set but read is missing")]
    UpdateRequiresRead,
}

/// A fault raised by a CRUD function instead of returning an envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the call can be retried.
        retryable: bool,
    },

    /// The response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The service does not implement the requested operation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// Any other fault.
    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if re-invoking the same operation may succeed.
    ///
    /// Nothing in recordkit retries on its own; this is for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Transport {
                retryable: true,
                ..
            }
        )
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Decode(err.to_string())
    }
}

/// Structural invariant violations on a recordset.
///
/// These indicate programming errors, not user-triggered conditions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordsetError {
    /// The record does not belong to the recordset's collection.
    #[error("record {record} is not a member of this recordset")]
    NotAMember {
        /// The offending record.
        record: RecordId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ServiceError::transport_retryable("connection reset").is_retryable());
        assert!(!ServiceError::transport_fatal("bad certificate").is_retryable());
        assert!(!ServiceError::Decode("eof".into()).is_retryable());
        assert!(!ServiceError::Unsupported("create").is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ConfigError::UpdateRequiresRead;
        assert!(err.to_string().contains("update is set but read is missing"));

        let err = ServiceError::Other("boom".into());
        assert_eq!(err.to_string(), "boom");

        let err = RecordsetError::NotAMember {
            record: RecordId::from_raw(7),
        };
        assert_eq!(err.to_string(), "record #7 is not a member of this recordset");
    }

    #[test]
    fn json_errors_become_decode_faults() {
        let err: ServiceError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, ServiceError::Decode(_)));
    }
}
