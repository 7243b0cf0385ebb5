//! Error types for the backlog cache.

use thiserror::Error;

use crate::v1::ServiceError;

/// Errors surfaced by the backlog cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BacklogError {
  /// A configured asset type or attribute does not exist in the remote schema.
  #[error("configuration error: {0}")]
  Configuration(String),

  /// The remote store could not be reached or answered with an error.
  #[error("VersionOne unavailable: {0}")]
  RemoteUnavailable(String),

  /// A remote call exceeded the request timeout on every attempt.
  #[error("VersionOne timed out: {0}")]
  Timeout(String),

  /// A returned asset is missing a required attribute.
  #[error("asset {oid} has no value for required attribute {attribute}")]
  DataIntegrity { oid: String, attribute: String },
}

impl BacklogError {
  /// Whether the error came from the remote side (as opposed to bad data or config).
  pub fn is_remote(&self) -> bool {
    matches!(self, Self::RemoteUnavailable(_) | Self::Timeout(_))
  }
}

impl From<ServiceError> for BacklogError {
  fn from(err: ServiceError) -> Self {
    match err {
      ServiceError::UnknownAssetType(_)
      | ServiceError::UnknownAttribute { .. }
      | ServiceError::InvalidConfig(_) => Self::Configuration(err.to_string()),
      ServiceError::Timeout(_) => Self::Timeout(err.to_string()),
      ServiceError::Http(_) | ServiceError::Status { .. } | ServiceError::InvalidResponse(_) => {
        Self::RemoteUnavailable(err.to_string())
      }
    }
  }
}
