use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::error::DispatchError;
use crate::http::HttpRequest;

/// What a successful call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Response body of a get, post or upload.
    Body(Vec<u8>),
    /// Where a download was written.
    File(PathBuf),
}

impl Payload {
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Body(bytes) => Some(bytes),
            Payload::File(_) => None,
        }
    }

    /// Body as UTF-8 text, lossily; the path for downloads.
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            Payload::Body(bytes) => String::from_utf8_lossy(bytes),
            Payload::File(path) => path.to_string_lossy(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Payload::File(path) => Some(path),
            Payload::Body(_) => None,
        }
    }
}

/// Result of one asynchronous call, handed to its callback.
#[derive(Debug)]
pub enum Outcome {
    Success(Payload),
    /// `request` is the wire request when one was built before the failure.
    Error {
        request: Option<HttpRequest>,
        error: DispatchError,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn into_result(self) -> Result<Payload, DispatchError> {
        match self {
            Outcome::Success(payload) => Ok(payload),
            Outcome::Error { error, .. } => Err(error),
        }
    }
}

/// Completion callback. Runs once, on the thread driving the `EventLoop`.
pub type Callback = Box<dyn FnOnce(Outcome) + Send + 'static>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[test]
    fn body_payload_exposes_bytes_and_text() {
        let payload = Payload::Body(b"hello".to_vec());
        assert_eq!(payload.bytes(), Some(b"hello".as_slice()));
        assert_eq!(payload.text(), "hello");
        assert!(payload.path().is_none());
    }

    #[test]
    fn file_payload_exposes_path() {
        let payload = Payload::File(PathBuf::from("/tmp/a.bin"));
        assert_eq!(payload.path(), Some(Path::new("/tmp/a.bin")));
        assert_eq!(payload.text(), "/tmp/a.bin");
        assert!(payload.bytes().is_none());
    }

    #[test]
    fn error_outcome_converts_to_err() {
        let outcome = Outcome::Error {
            request: None,
            error: TransportError::Io("reset".to_string()).into(),
        };
        assert!(!outcome.is_success());
        assert!(outcome.into_result().is_err());
    }
}
