//! Error types shared across the hubframe workspace.

use thiserror::Error;

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Adapter error taxonomy.
///
/// The router maps any of these to an `evt.error.report` on the bus; the
/// variant decides how far a command got before failing.
#[derive(Debug, Error)]
pub enum Error {
    /// Payload could not be decoded (wrong value type, malformed property).
    #[error("decode error: {0}")]
    Decode(String),

    /// No service at the addressed topic, or the service is of another type.
    #[error("not found: {0}")]
    NotFound(String),

    /// Value rejected against the service specification.
    #[error("validation error: {0}")]
    Validation(String),

    /// Command requires an optional capability the controller lacks.
    #[error("capability not supported: {0}")]
    Capability(String),

    /// The vendor controller returned an error.
    #[error("vendor error: {0}")]
    Vendor(String),

    /// The bus rejected a publish.
    #[error("publish error: {0}")]
    Publish(String),

    /// Persistent storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A synchronous request did not complete in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Anything else.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl Error {
    /// Convenience constructor for vendor-side failures.
    pub fn vendor(msg: impl Into<String>) -> Self {
        Error::Vendor(msg.into())
    }

    /// Convenience constructor for validation failures.
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}
