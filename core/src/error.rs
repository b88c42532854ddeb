//! Error types for the dispatcher.
//!
//! # Design
//! Errors are split by when they surface. `ValidationError` is returned
//! synchronously from the builder and from `dispatch_*` before anything is
//! submitted. `TransportError` covers everything that happens after
//! submission, including non-2xx responses, and reaches the caller either as
//! the `Err` of `dispatch_sync` or inside `Outcome::Error`.

use std::path::PathBuf;

use thiserror::Error;

/// A request descriptor that cannot be turned into a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("request url is empty")]
    MissingUrl,

    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A flat key/value list had an odd number of entries.
    #[error("key/value list must have an even number of entries, got {0}")]
    OddKeyValueCount(usize),

    /// More than one of params, text, bytes and file was supplied for a POST.
    #[error("exactly one of params, content, bytes or file may be set for a post, found {0}")]
    ConflictingBody(String),

    #[error("{kind} requests cannot carry a {body} body")]
    BodyNotAllowed { kind: &'static str, body: &'static str },

    #[error("upload requires at least one file part")]
    MissingFiles,

    #[error("download requires a destination directory and file name")]
    MissingDestination,
}

/// Failures after a request has been handed to the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level failure reported by the transport.
    #[error("transport failure: {0}")]
    Io(String),

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// A local file could not be read (upload) or written (download).
    #[error("file error at {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The call was cancelled while its response was being streamed.
    #[error("call cancelled")]
    Cancelled,

    /// The transport panicked while running an async call.
    #[error("transport panicked: {0}")]
    Panicked(String),
}

impl TransportError {
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TransportError::File {
            path: path.into(),
            source,
        }
    }

    /// HTTP status carried by this error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Any failure of a dispatched call.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispatchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            DispatchError::Transport(e) => e.status(),
            DispatchError::Validation(_) => None,
        }
    }
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },

    #[error("cannot start worker pool: {0}")]
    Runtime(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_displays_code_and_body() {
        let err = TransportError::Status {
            status: 404,
            body: "missing".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 404: missing");
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn dispatch_error_is_transparent() {
        let err = DispatchError::from(ValidationError::MissingUrl);
        assert_eq!(err.to_string(), "request url is empty");
        assert_eq!(err.status(), None);
    }

    #[test]
    fn file_error_names_path() {
        let err = TransportError::file(
            "/tmp/nope.bin",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().starts_with("file error at /tmp/nope.bin"));
        assert_eq!(err.status(), None);
    }
}
