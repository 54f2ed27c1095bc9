//! Error types for promsearch

use std::fmt;

/// Result type alias for promsearch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for promsearch
#[derive(Debug)]
pub enum Error {
    /// Payload could not be snappy-decompressed
    CorruptPayload(String),
    /// Decompressed payload is not a valid protobuf message
    MalformedRequest(String),
    /// Read request shape the adapter does not serve
    UnsupportedQueryShape(String),
    /// Backend returned zero matching documents
    NoDataFound,
    /// Backend could not be reached or refused a partition/bulk call
    BackendUnavailable(String),
    /// Backend answered with an unexpected status
    Backend { status: u16, reason: String },
    /// Backend document missing a reserved field or holding the wrong type
    MalformedDocument(String),
    /// HTTP client errors
    Http(reqwest::Error),
    /// IO errors
    Io(std::io::Error),
    /// Serialization errors
    Serialization(String),
    /// Configuration errors
    Config(String),
    /// Timeout
    Timeout,
    /// Internal error
    Internal(String),
}

impl Error {
    /// Whether the error was caused by the remote caller (4xx family).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::CorruptPayload(_) | Error::MalformedRequest(_) | Error::UnsupportedQueryShape(_)
        )
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CorruptPayload(msg) => write!(f, "Corrupt payload: {}", msg),
            Error::MalformedRequest(msg) => write!(f, "Malformed request: {}", msg),
            Error::UnsupportedQueryShape(msg) => write!(f, "Unsupported query shape: {}", msg),
            Error::NoDataFound => write!(f, "Found no metrics"),
            Error::BackendUnavailable(msg) => write!(f, "Backend unavailable: {}", msg),
            Error::Backend { status, reason } => {
                write!(f, "Backend error (status {}): {}", status, reason)
            }
            Error::MalformedDocument(msg) => write!(f, "Malformed document: {}", msg),
            Error::Http(e) => write!(f, "HTTP error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else if e.is_connect() {
            Error::BackendUnavailable(e.to_string())
        } else {
            Error::Http(e)
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<snap::Error> for Error {
    fn from(e: snap::Error) -> Self {
        Error::CorruptPayload(e.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        Error::MalformedRequest(e.to_string())
    }
}
