//! Errors surfaced by the remote budgeting API transport.
//!
//! The cache layer never inspects or rewrites these; they travel unchanged
//! from the transport to whoever called the cache.

use thiserror::Error;

/// A transport-level failure talking to the budgeting API.
///
/// `Clone` so that a single failed single-flight load can be delivered to
/// every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
  #[error("unauthorized: {0}")]
  Unauthorized(String),
  #[error("forbidden: {0}")]
  Forbidden(String),
  #[error("not found: {0}")]
  NotFound(String),
  #[error("rate limited: {0}")]
  RateLimited(String),
  #[error("server error ({status}): {message}")]
  Server { status: u16, message: String },
  #[error("request failed: {0}")]
  Network(String),
  #[error("failed to decode response: {0}")]
  Decode(String),
}

impl ApiError {
  /// Map a non-success HTTP status to an error kind.
  pub fn from_status(status: u16, message: impl Into<String>) -> Self {
    let message = message.into();
    match status {
      401 => Self::Unauthorized(message),
      403 => Self::Forbidden(message),
      404 => Self::NotFound(message),
      429 => Self::RateLimited(message),
      _ => Self::Server { status, message },
    }
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_decode() {
      Self::Decode(err.to_string())
    } else {
      Self::Network(err.to_string())
    }
  }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_mapping() {
    assert!(matches!(ApiError::from_status(401, "x"), ApiError::Unauthorized(_)));
    assert!(matches!(ApiError::from_status(403, "x"), ApiError::Forbidden(_)));
    assert!(matches!(ApiError::from_status(404, "x"), ApiError::NotFound(_)));
    assert!(matches!(ApiError::from_status(429, "x"), ApiError::RateLimited(_)));
    assert_eq!(
      ApiError::from_status(503, "down"),
      ApiError::Server {
        status: 503,
        message: "down".to_string()
      }
    );
  }
}
