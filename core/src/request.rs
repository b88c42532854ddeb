//! Request descriptors and the builder that produces them.
//!
//! # Design
//! A `RequestDescriptor` is plain data describing one call before it runs.
//! The four request kinds share a single shape; what differs is how the body
//! is built, which lives in `encode`. `RequestBuilder` mirrors the fluent
//! style callers are used to and validates on each terminal method, so a
//! descriptor that leaves the builder is always dispatchable.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::params::Params;
use crate::tag::Tag;

/// What a request does, which decides how its body is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Get,
    Post,
    Upload,
    Download,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Get => "get",
            RequestKind::Post => "post",
            RequestKind::Upload => "upload",
            RequestKind::Download => "download",
        }
    }
}

/// Where the bytes of a file part come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSource {
    /// Read from disk when the request is encoded.
    Path(PathBuf),
    /// Already in memory.
    Bytes(Vec<u8>),
}

/// One file in a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePart {
    /// Form field name.
    pub field: String,
    pub source: FileSource,
    /// Overrides the file name sent in the part; defaults to the path's base name.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Overrides the guessed or configured upload content type.
    #[serde(default)]
    pub content_type: Option<String>,
}

impl FilePart {
    pub fn new(field: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        FilePart {
            field: field.into(),
            source: FileSource::Path(path.into()),
            file_name: None,
            content_type: None,
        }
    }

    /// An in-memory part sent as `file_name`.
    pub fn from_bytes(field: impl Into<String>, bytes: impl Into<Vec<u8>>, file_name: impl Into<String>) -> Self {
        FilePart {
            field: field.into(),
            source: FileSource::Bytes(bytes.into()),
            file_name: Some(file_name.into()),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            FileSource::Path(path) => Some(path),
            FileSource::Bytes(_) => None,
        }
    }

    pub fn file_name(&self) -> String {
        self.file_name
            .clone()
            .or_else(|| self.path().and_then(base_name))
            .unwrap_or_else(|| "nofilename".to_string())
    }

    /// The part's content, reading it from disk for path sources.
    pub fn read(&self) -> std::io::Result<Cow<'_, [u8]>> {
        match &self.source {
            FileSource::Path(path) => std::fs::read(path).map(Cow::Owned),
            FileSource::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
        }
    }
}

/// Request body. At most one representation is ever populated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    #[default]
    None,
    Text {
        content: String,
        media_type: Option<String>,
    },
    Bytes {
        bytes: Vec<u8>,
        media_type: Option<String>,
    },
    File {
        path: PathBuf,
        media_type: Option<String>,
    },
    Multipart(Vec<FilePart>),
}

impl Body {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Body::None => "empty",
            Body::Text { .. } => "text",
            Body::Bytes { .. } => "bytes",
            Body::File { .. } => "file",
            Body::Multipart(_) => "multipart",
        }
    }
}

/// Where a download is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub dir: PathBuf,
    pub file_name: String,
}

impl Destination {
    pub fn new(dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Destination {
            dir: dir.into(),
            file_name: file_name.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

/// Caller-side definition of one HTTP call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub kind: RequestKind,
    pub url: String,
    /// `None` means the dispatcher's default tag.
    pub tag: Option<Tag>,
    pub params: Params,
    pub headers: BTreeMap<String, String>,
    pub body: Body,
    pub destination: Option<Destination>,
}

impl RequestDescriptor {
    pub fn new(kind: RequestKind, url: impl Into<String>) -> Self {
        RequestDescriptor {
            kind,
            url: url.into(),
            tag: None,
            params: Params::new(),
            headers: BTreeMap::new(),
            body: Body::None,
            destination: None,
        }
    }

    /// Check the per-kind invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.trim().is_empty() {
            return Err(ValidationError::MissingUrl);
        }
        url::Url::parse(&self.url).map_err(|e| ValidationError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        match (self.kind, &self.body) {
            (RequestKind::Get | RequestKind::Download, Body::None) => {}
            (RequestKind::Get | RequestKind::Download, body) => {
                return Err(ValidationError::BodyNotAllowed {
                    kind: self.kind.as_str(),
                    body: body.kind_name(),
                })
            }
            (RequestKind::Post, Body::Multipart(_)) => {
                return Err(ValidationError::BodyNotAllowed {
                    kind: "post",
                    body: "multipart",
                })
            }
            (RequestKind::Post, Body::None) => {}
            (RequestKind::Post, body) => {
                if self.params.has_fields() {
                    return Err(ValidationError::ConflictingBody(format!(
                        "params and {}",
                        body.kind_name()
                    )));
                }
            }
            (RequestKind::Upload, Body::Multipart(parts)) if !parts.is_empty() => {}
            (RequestKind::Upload, Body::None | Body::Multipart(_)) => {
                return Err(ValidationError::MissingFiles)
            }
            (RequestKind::Upload, body) => {
                return Err(ValidationError::BodyNotAllowed {
                    kind: "upload",
                    body: body.kind_name(),
                })
            }
        }

        if self.kind == RequestKind::Download {
            match &self.destination {
                Some(dest) if !dest.file_name.is_empty() => {}
                _ => return Err(ValidationError::MissingDestination),
            }
        }
        Ok(())
    }
}

/// Fluent builder for `RequestDescriptor`.
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    url: String,
    tag: Option<Tag>,
    params: Params,
    headers: BTreeMap<String, String>,
    files: Vec<FilePart>,
    media_type: Option<String>,
    content: Option<String>,
    bytes: Option<Vec<u8>>,
    file: Option<PathBuf>,
    dest_dir: Option<PathBuf>,
    dest_file_name: Option<String>,
}

impl RequestBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        RequestBuilder {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Replace all params.
    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn add_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.put(key, value);
        self
    }

    /// Replace all headers.
    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn add_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Replace the upload file parts.
    pub fn files(mut self, files: Vec<FilePart>) -> Self {
        self.files = files;
        self
    }

    pub fn file_part(mut self, field: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.files.push(FilePart::new(field, path));
        self
    }

    /// Upload in-memory `bytes` under `field`, sent as `file_name`.
    pub fn bytes_part(
        mut self,
        field: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
        file_name: impl Into<String>,
    ) -> Self {
        self.files.push(FilePart::from_bytes(field, bytes, file_name));
        self
    }

    /// Text body for a post.
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Raw byte body for a post.
    pub fn bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.bytes = Some(bytes.into());
        self
    }

    /// File whose contents become the body of a post.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Media type of a text, bytes or file post body.
    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn dest_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dest_dir = Some(dir.into());
        self
    }

    pub fn dest_file_name(mut self, name: impl Into<String>) -> Self {
        self.dest_file_name = Some(name.into());
        self
    }

    pub fn get(self) -> Result<RequestDescriptor, ValidationError> {
        self.finish(RequestKind::Get, Body::None, None)
    }

    pub fn post(mut self) -> Result<RequestDescriptor, ValidationError> {
        let mut present = Vec::new();
        if self.params.has_fields() {
            present.push("params");
        }
        if self.content.is_some() {
            present.push("content");
        }
        if self.bytes.is_some() {
            present.push("bytes");
        }
        if self.file.is_some() {
            present.push("file");
        }
        if present.len() > 1 {
            return Err(ValidationError::ConflictingBody(present.join(" and ")));
        }

        let media_type = self.media_type.take();
        let body = if let Some(content) = self.content.take() {
            Body::Text { content, media_type }
        } else if let Some(bytes) = self.bytes.take() {
            Body::Bytes { bytes, media_type }
        } else if let Some(path) = self.file.take() {
            Body::File { path, media_type }
        } else {
            Body::None
        };
        self.finish(RequestKind::Post, body, None)
    }

    pub fn upload(mut self) -> Result<RequestDescriptor, ValidationError> {
        let mut parts = std::mem::take(&mut self.files);
        parts.extend(self.params.files().cloned());
        self.finish(RequestKind::Upload, Body::Multipart(parts), None)
    }

    /// Download into `dest_dir/dest_file_name`. Without an explicit file
    /// name the last path segment of the url is used.
    pub fn download(mut self) -> Result<RequestDescriptor, ValidationError> {
        let file_name = self
            .dest_file_name
            .take()
            .or_else(|| last_segment(&self.url));
        let destination = match (self.dest_dir.take(), file_name) {
            (Some(dir), Some(file_name)) => Some(Destination::new(dir, file_name)),
            _ => None,
        };
        self.finish(RequestKind::Download, Body::None, destination)
    }

    fn finish(
        self,
        kind: RequestKind,
        body: Body,
        destination: Option<Destination>,
    ) -> Result<RequestDescriptor, ValidationError> {
        let descriptor = RequestDescriptor {
            kind,
            url: self.url,
            tag: self.tag,
            params: self.params,
            headers: self.headers,
            body,
            destination,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

fn base_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn last_segment(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    Some(segment.to_string())
}
