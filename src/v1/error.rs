//! Error types for the VersionOne client.

use thiserror::Error;

/// Errors that can occur when talking to a VersionOne instance.
#[derive(Debug, Error)]
pub enum ServiceError {
  /// The meta API does not know this asset type.
  #[error("unknown asset type: {0}")]
  UnknownAssetType(String),

  /// The asset type has no attribute with this name (or path).
  #[error("unknown attribute: {asset_type}.{attribute}")]
  UnknownAttribute {
    asset_type: String,
    attribute: String,
  },

  /// HTTP request failed before a response arrived.
  #[error("HTTP error: {0}")]
  Http(reqwest::Error),

  /// Server answered with a non-success status.
  #[error("VersionOne returned HTTP {status}: {body}")]
  Status { status: u16, body: String },

  /// Request did not complete within the configured timeout.
  #[error("request timed out: {0}")]
  Timeout(String),

  /// Response could not be parsed.
  #[error("invalid response: {0}")]
  InvalidResponse(String),

  /// Client could not be constructed.
  #[error("invalid client configuration: {0}")]
  InvalidConfig(String),
}

impl ServiceError {
  /// Classify a reqwest failure, pulling timeouts out as their own kind.
  pub fn from_reqwest(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      Self::Timeout(err.to_string())
    } else {
      Self::Http(err)
    }
  }

  /// Whether the failure is worth retrying.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Timeout(_) => true,
      Self::Http(e) => e.is_connect() || e.is_request(),
      Self::Status { status, .. } => *status == 429 || *status >= 500,
      _ => false,
    }
  }
}
