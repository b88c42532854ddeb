//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Results cross the boundary as one `FfiOutcome` envelope: an error code,
//! an optional message, the HTTP status when there was one, and either a
//! body buffer or a file path. Request descriptors cross as JSON and are
//! decoded into `DescriptorJson` here, keeping `lib.rs` focused on the
//! `extern "C"` surface.

use std::collections::BTreeMap;
use std::ffi::{c_void, CString};
use std::os::raw::c_char;
use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use tagdispatch_core::{
    DispatchError, Dispatcher, EventLoop, FilePart, FileSource, Outcome, Payload, RequestBuilder, RequestDescriptor,
    RequestKind, TransportError, ValidationError,
};

/// Opaque handle to a dispatcher and its event loop. C callers receive a
/// pointer to this and pass it back into every `td_*` function.
pub struct FfiDispatcher {
    pub(crate) inner: Dispatcher,
    pub(crate) event_loop: EventLoop,
}

/// Completion callback. Runs on the thread that calls `td_poll`. The
/// callee owns `outcome` and must release it with `td_free_outcome`.
pub type FfiCallback = extern "C" fn(call_id: u64, outcome: *mut FfiOutcome, user_data: *mut c_void);

/// Caller-supplied context handed back untouched to the callback.
pub(crate) struct UserData(pub(crate) *mut c_void);

// The pointer is only dereferenced by the C callback, on the polling thread.
unsafe impl Send for UserData {}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    Validation = 1,
    Http = 2,
    Transport = 3,
    File = 4,
    Cancelled = 5,
    InvalidJson = 6,
    NullArg = 7,
    Panic = 8,
}

/// Result envelope for sync dispatches and async callbacks.
///
/// On success `error_code` is `Ok` and `error_message` is null. A get, post
/// or upload fills `payload`/`payload_len`; a download fills `file_path`.
/// On failure `payload` and `file_path` are null, and `http_status` is set
/// when the server answered with a non-2xx status.
#[repr(C)]
pub struct FfiOutcome {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub http_status: u16,
    pub payload: *mut u8,
    pub payload_len: usize,
    pub file_path: *mut c_char,
}

/// Copy `s` into a C string the caller frees with `td_free_string`.
/// Interior NULs are dropped.
pub(crate) fn c_string(s: &str) -> *mut c_char {
    CString::new(s.replace('\0', "")).unwrap_or_default().into_raw()
}

impl FfiOutcome {
    fn empty(error_code: FfiErrorCode) -> Self {
        FfiOutcome {
            error_code,
            error_message: std::ptr::null_mut(),
            http_status: 0,
            payload: std::ptr::null_mut(),
            payload_len: 0,
            file_path: std::ptr::null_mut(),
        }
    }

    pub(crate) fn from_result(result: Result<Payload, DispatchError>) -> *mut Self {
        let outcome = match result {
            Ok(Payload::Body(bytes)) => {
                let mut outcome = Self::empty(FfiErrorCode::Ok);
                outcome.payload_len = bytes.len();
                if !bytes.is_empty() {
                    outcome.payload = Box::into_raw(bytes.into_boxed_slice()) as *mut u8;
                }
                outcome
            }
            Ok(Payload::File(path)) => {
                let mut outcome = Self::empty(FfiErrorCode::Ok);
                outcome.file_path = c_string(&path.to_string_lossy());
                outcome
            }
            Err(err) => {
                let mut outcome = Self::empty(error_code(&err));
                outcome.http_status = err.status().unwrap_or(0);
                outcome.error_message = c_string(&err.to_string());
                outcome
            }
        };
        Box::into_raw(Box::new(outcome))
    }

    pub(crate) fn from_outcome(outcome: Outcome) -> *mut Self {
        Self::from_result(outcome.into_result())
    }

    pub(crate) fn error(code: FfiErrorCode, msg: &str) -> *mut Self {
        let mut outcome = Self::empty(code);
        outcome.error_message = c_string(msg);
        Box::into_raw(Box::new(outcome))
    }

    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::error(FfiErrorCode::NullArg, &format!("null argument: {name}"))
    }
}

fn error_code(err: &DispatchError) -> FfiErrorCode {
    match err {
        DispatchError::Validation(_) => FfiErrorCode::Validation,
        DispatchError::Transport(TransportError::Status { .. }) => FfiErrorCode::Http,
        DispatchError::Transport(TransportError::File { .. }) => FfiErrorCode::File,
        DispatchError::Transport(TransportError::Cancelled) => FfiErrorCode::Cancelled,
        DispatchError::Transport(TransportError::Io(_)) => FfiErrorCode::Transport,
        DispatchError::Transport(TransportError::Panicked(_)) => FfiErrorCode::Panic,
    }
}

// ---------------------------------------------------------------------------
// Descriptor JSON
// ---------------------------------------------------------------------------

/// Binary values travel as standard base64 strings.
fn base64_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    BASE64.decode(encoded.as_bytes()).map_err(de::Error::custom)
}

fn optional_base64_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
    base64_bytes(deserializer).map(Some)
}

/// A file part is either read from `path` or carried inline as base64 `data`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum FileSourceJson {
    Path {
        path: PathBuf,
    },
    Data {
        #[serde(deserialize_with = "base64_bytes")]
        data: Vec<u8>,
    },
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileJson {
    field: String,
    #[serde(flatten)]
    source: FileSourceJson,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
}

impl From<FileJson> for FilePart {
    fn from(file: FileJson) -> Self {
        let mut part = match file.source {
            FileSourceJson::Path { path } => FilePart::new(file.field, path),
            FileSourceJson::Data { data } => FilePart {
                field: file.field,
                source: FileSource::Bytes(data),
                file_name: None,
                content_type: None,
            },
        };
        if let Some(name) = file.file_name {
            part = part.with_file_name(name);
        }
        if let Some(content_type) = file.content_type {
            part = part.with_content_type(content_type);
        }
        part
    }
}

/// A request descriptor as C callers write it, e.g.
/// `{"kind":"get","url":"http://host/path","tag":"home","params":{"q":"x"}}`.
/// A post body may be `bytes` (base64) and an upload file may carry `data`
/// (base64) instead of a `path`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DescriptorJson {
    kind: RequestKind,
    url: String,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    params: BTreeMap<String, String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    files: Vec<FileJson>,
    #[serde(default)]
    content: Option<String>,
    /// Raw post body, base64 encoded.
    #[serde(default, deserialize_with = "optional_base64_bytes")]
    bytes: Option<Vec<u8>>,
    #[serde(default)]
    file: Option<PathBuf>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    dest_dir: Option<PathBuf>,
    #[serde(default)]
    dest_file_name: Option<String>,
}

impl DescriptorJson {
    pub(crate) fn into_descriptor(self) -> Result<RequestDescriptor, ValidationError> {
        let mut builder = RequestBuilder::new(self.url)
            .headers(self.headers)
            .files(self.files.into_iter().map(FilePart::from).collect());
        if let Some(tag) = self.tag {
            builder = builder.tag(tag);
        }
        for (key, value) in self.params {
            builder = builder.add_param(key, value);
        }
        if let Some(content) = self.content {
            builder = builder.content(content);
        }
        if let Some(bytes) = self.bytes {
            builder = builder.bytes(bytes);
        }
        if let Some(file) = self.file {
            builder = builder.file(file);
        }
        if let Some(media_type) = self.media_type {
            builder = builder.media_type(media_type);
        }
        if let Some(dir) = self.dest_dir {
            builder = builder.dest_dir(dir);
        }
        if let Some(name) = self.dest_file_name {
            builder = builder.dest_file_name(name);
        }
        match self.kind {
            RequestKind::Get => builder.get(),
            RequestKind::Post => builder.post(),
            RequestKind::Upload => builder.upload(),
            RequestKind::Download => builder.download(),
        }
    }
}
