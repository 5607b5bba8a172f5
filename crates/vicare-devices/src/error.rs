//! Error types for device sessions and the remote client.

use thiserror::Error;

/// Result type for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Result type for remote API calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Errors returned by a [`RemoteClient`](crate::remote::RemoteClient).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// HTTP 401: the token is missing, expired or revoked.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP 429: the account exceeded its request quota.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// HTTP 404: unknown installation, device or feature.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Connection, TLS or timeout failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response body did not match the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether re-authenticating is the only way out.
    pub fn is_authentication(&self) -> bool {
        matches!(self, RemoteError::Unauthorized(_))
    }

    /// Build from a non-success status code and response body.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => RemoteError::Unauthorized(message),
            404 => RemoteError::NotFound(message),
            429 => RemoteError::RateLimited(message),
            _ => RemoteError::Http { status, message },
        }
    }
}

/// Device error types.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// A feature path or capability name is missing from the capability table.
    #[error("Configuration lookup failed: {0}")]
    ConfigLookup(String),

    /// Network or API failure while polling.
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(RemoteError),

    /// The remote rejected our credentials.
    #[error("Authentication failed: {0}")]
    Authentication(RemoteError),

    /// Adding, removing or configuring a capability failed.
    #[error("Provisioning failed for {capability}: {message}")]
    Provisioning { capability: String, message: String },

    /// A remote command was rejected.
    #[error("Command {command} on {feature} failed: {source}")]
    CommandExecution {
        feature: String,
        command: String,
        #[source]
        source: RemoteError,
    },

    /// The device host refused an operation.
    #[error("Host error: {0}")]
    Host(String),

    /// Persisted state could not be read or written.
    #[error("Storage error: {0}")]
    Storage(#[from] vicare_storage::StorageError),

    /// A value cannot be used for the requested capability or command.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl From<RemoteError> for DeviceError {
    fn from(e: RemoteError) -> Self {
        if e.is_authentication() {
            DeviceError::Authentication(e)
        } else {
            DeviceError::RemoteUnavailable(e)
        }
    }
}

impl DeviceError {
    pub fn is_authentication(&self) -> bool {
        match self {
            DeviceError::Authentication(_) => true,
            DeviceError::CommandExecution { source, .. } => source.is_authentication(),
            _ => false,
        }
    }
}
