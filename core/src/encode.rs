//! Body strategies: one function per `RequestKind` turning a validated
//! descriptor into an `HttpRequest`.
//!
//! Strategies may read files, so the dispatcher runs them on a worker for
//! async calls.

use std::collections::BTreeMap;
use std::path::Path;

use url::{form_urlencoded, Url};

use crate::error::{DispatchError, TransportError, ValidationError};
use crate::http::{HttpMethod, HttpRequest};
use crate::multipart::Multipart;
use crate::params::Params;
use crate::request::{Body, RequestDescriptor, RequestKind};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const TEXT_CONTENT_TYPE: &str = "text/plain;charset=utf-8";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Dispatcher-wide inputs to every strategy.
#[derive(Debug, Clone, Copy)]
pub struct EncodeContext<'a> {
    pub default_headers: &'a BTreeMap<String, String>,
    /// Content type of upload file parts that do not set their own.
    pub upload_content_type: &'a str,
}

pub type BodyStrategy = fn(&RequestDescriptor, &EncodeContext<'_>) -> Result<HttpRequest, DispatchError>;

pub fn strategy(kind: RequestKind) -> BodyStrategy {
    match kind {
        RequestKind::Get => encode_get,
        RequestKind::Post => encode_post,
        RequestKind::Upload => encode_upload,
        RequestKind::Download => encode_get,
    }
}

/// Build the wire request for `descriptor` with its kind's strategy.
pub fn encode(descriptor: &RequestDescriptor, ctx: &EncodeContext<'_>) -> Result<HttpRequest, DispatchError> {
    strategy(descriptor.kind)(descriptor, ctx)
}

fn encode_get(descriptor: &RequestDescriptor, ctx: &EncodeContext<'_>) -> Result<HttpRequest, DispatchError> {
    Ok(HttpRequest {
        method: HttpMethod::Get,
        url: url_with_query(&descriptor.url, &descriptor.params)?,
        headers: assemble_headers(descriptor, ctx, None),
        body: None,
    })
}

fn encode_post(descriptor: &RequestDescriptor, ctx: &EncodeContext<'_>) -> Result<HttpRequest, DispatchError> {
    let (content_type, body) = match &descriptor.body {
        Body::None => {
            let form = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(descriptor.params.fields())
                .finish();
            (FORM_CONTENT_TYPE.to_string(), form.into_bytes())
        }
        Body::Text { content, media_type } => (
            media_type.clone().unwrap_or_else(|| TEXT_CONTENT_TYPE.to_string()),
            content.clone().into_bytes(),
        ),
        Body::Bytes { bytes, media_type } => (
            media_type.clone().unwrap_or_else(|| OCTET_STREAM.to_string()),
            bytes.clone(),
        ),
        Body::File { path, media_type } => (
            media_type.clone().unwrap_or_else(|| OCTET_STREAM.to_string()),
            std::fs::read(path).map_err(|e| TransportError::file(path, e))?,
        ),
        Body::Multipart(_) => {
            return Err(ValidationError::BodyNotAllowed {
                kind: "post",
                body: "multipart",
            }
            .into())
        }
    };
    Ok(HttpRequest {
        method: HttpMethod::Post,
        url: parse_url(&descriptor.url)?.to_string(),
        headers: assemble_headers(descriptor, ctx, Some(content_type)),
        body: Some(body),
    })
}

fn encode_upload(descriptor: &RequestDescriptor, ctx: &EncodeContext<'_>) -> Result<HttpRequest, DispatchError> {
    let parts = match &descriptor.body {
        Body::Multipart(parts) if !parts.is_empty() => parts,
        _ => return Err(ValidationError::MissingFiles.into()),
    };

    let mut form = Multipart::new();
    for part in parts {
        let data = part
            .read()
            .map_err(|e| TransportError::file(part.path().unwrap_or(Path::new(&part.field)), e))?;
        let file_name = part.file_name();
        let content_type = part_content_type(part.content_type.as_deref(), &file_name, ctx.upload_content_type);
        form.add_file(part.field.as_str(), file_name, content_type, data.into_owned());
    }
    for (key, value) in descriptor.params.fields() {
        form.add_field(key, value);
    }

    Ok(HttpRequest {
        method: HttpMethod::Post,
        url: parse_url(&descriptor.url)?.to_string(),
        headers: assemble_headers(descriptor, ctx, Some(form.content_type())),
        body: Some(form.encode()),
    })
}

// Explicit type first, then a guess from the file name's extension, then
// the configured default.
fn part_content_type(explicit: Option<&str>, file_name: &str, fallback: &str) -> String {
    match explicit {
        Some(content_type) => content_type.to_string(),
        None => mime_guess::from_path(file_name)
            .first()
            .map_or_else(|| fallback.to_string(), |mime| mime.to_string()),
    }
}

/// Append the string fields of `params` to `url` as a percent-encoded query.
pub fn url_with_query(url: &str, params: &Params) -> Result<String, ValidationError> {
    let mut url = parse_url(url)?;
    if params.fields().next().is_some() {
        url.query_pairs_mut().extend_pairs(params.fields());
    }
    Ok(url.to_string())
}

fn parse_url(url: &str) -> Result<Url, ValidationError> {
    Url::parse(url).map_err(|e| ValidationError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

// Defaults first, then the descriptor's own headers; later names replace
// earlier ones case-insensitively. The strategy's content type only applies
// when nobody set one.
fn assemble_headers(
    descriptor: &RequestDescriptor,
    ctx: &EncodeContext<'_>,
    content_type: Option<String>,
) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();
    for (name, value) in ctx.default_headers.iter().chain(descriptor.headers.iter()) {
        headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        headers.push((name.clone(), value.clone()));
    }
    if let Some(content_type) = content_type {
        if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
            headers.push(("Content-Type".to_string(), content_type));
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::request::{FilePart, RequestBuilder};

    fn no_defaults() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn ctx(defaults: &BTreeMap<String, String>) -> EncodeContext<'_> {
        EncodeContext {
            default_headers: defaults,
            upload_content_type: OCTET_STREAM,
        }
    }

    #[test]
    fn get_appends_params_as_query() {
        let d = RequestBuilder::new("http://x/y")
            .add_param("a", "1")
            .add_param("b", "2")
            .get()
            .unwrap();
        let defaults = no_defaults();
        let req = encode(&d, &ctx(&defaults)).unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://x/y?a=1&b=2");
        assert!(req.body.is_none());
    }

    #[test]
    fn get_percent_encodes_query() {
        let d = RequestBuilder::new("http://x/y")
            .add_param("q", "a b&c=d")
            .get()
            .unwrap();
        let defaults = no_defaults();
        let req = encode(&d, &ctx(&defaults)).unwrap();
        assert_eq!(req.url, "http://x/y?q=a+b%26c%3Dd");
    }

    #[test]
    fn get_keeps_existing_query() {
        let d = RequestBuilder::new("http://x/y?z=9").add_param("a", "1").get().unwrap();
        let defaults = no_defaults();
        let req = encode(&d, &ctx(&defaults)).unwrap();
        assert_eq!(req.url, "http://x/y?z=9&a=1");
    }

    #[test]
    fn get_without_params_leaves_url_alone() {
        let d = RequestBuilder::new("http://x/y").get().unwrap();
        let defaults = no_defaults();
        let req = encode(&d, &ctx(&defaults)).unwrap();
        assert_eq!(req.url, "http://x/y");
    }

    #[test]
    fn post_params_become_form_body() {
        let d = RequestBuilder::new("http://x/y")
            .add_param("user", "ann")
            .add_param("note", "a b")
            .post()
            .unwrap();
        let defaults = no_defaults();
        let req = encode(&d, &ctx(&defaults)).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.header("content-type"), Some(FORM_CONTENT_TYPE));
        assert_eq!(req.body.as_deref(), Some(b"note=a+b&user=ann".as_slice()));
    }

    #[test]
    fn post_text_uses_given_media_type() {
        let d = RequestBuilder::new("http://x/y")
            .content("{}")
            .media_type("application/json")
            .post()
            .unwrap();
        let defaults = no_defaults();
        let req = encode(&d, &ctx(&defaults)).unwrap();
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.body.as_deref(), Some(b"{}".as_slice()));
    }

    #[test]
    fn post_missing_file_is_a_file_error() {
        let d = RequestBuilder::new("http://x/y")
            .file("/definitely/not/here.bin")
            .post()
            .unwrap();
        let defaults = no_defaults();
        let err = encode(&d, &ctx(&defaults)).unwrap_err();
        assert!(matches!(err, DispatchError::Transport(TransportError::File { .. })));
    }

    #[test]
    fn upload_has_one_file_part_and_one_field_part() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"payload").unwrap();
        let d = RequestBuilder::new("http://x/up")
            .add_param("field", "v")
            .file_part("doc", file.path())
            .upload()
            .unwrap();
        let defaults = no_defaults();
        let req = encode(&d, &ctx(&defaults)).unwrap();

        let content_type = req.header("content-type").unwrap().to_string();
        let boundary = content_type.strip_prefix("multipart/form-data; boundary=").unwrap();
        let body = String::from_utf8(req.body.unwrap()).unwrap();
        let parts: Vec<&str> = body
            .split(&format!("--{boundary}"))
            .filter(|p| p.starts_with("\r\nContent-Disposition"))
            .collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts.iter().filter(|p| p.contains("filename=")).count(), 1);
        assert!(parts[0].contains("name=\"doc\""));
        assert!(parts[0].contains("Content-Type: application/octet-stream"));
        assert!(parts[0].contains("payload"));
        assert!(parts[1].contains("name=\"field\"\r\n\r\nv\r\n"));
    }

    #[test]
    fn upload_part_type_is_explicit_then_guessed_then_default() {
        let d = RequestBuilder::new("http://x/up")
            .files(vec![
                FilePart::from_bytes("a", b"1".to_vec(), "a.png").with_content_type("image/x-custom"),
                FilePart::from_bytes("b", b"2".to_vec(), "b.json"),
                FilePart::from_bytes("c", b"3".to_vec(), "c.unknownext"),
            ])
            .upload()
            .unwrap();
        let defaults = no_defaults();
        let req = encode(&d, &ctx(&defaults)).unwrap();
        let body = String::from_utf8(req.body.unwrap()).unwrap();
        assert!(body.contains("filename=\"a.png\"\r\nContent-Type: image/x-custom\r\n"));
        assert!(body.contains("filename=\"b.json\"\r\nContent-Type: application/json\r\n"));
        assert!(body.contains("filename=\"c.unknownext\"\r\nContent-Type: application/octet-stream\r\n"));
    }

    #[test]
    fn upload_sends_in_memory_params_file() {
        let mut params = Params::new();
        params.put("kind", "avatar").put_bytes("pic", b"img".to_vec(), "me.png", "image/png");
        let d = RequestBuilder::new("http://x/up").params(params).upload().unwrap();
        let defaults = no_defaults();
        let req = encode(&d, &ctx(&defaults)).unwrap();
        let body = String::from_utf8(req.body.unwrap()).unwrap();
        assert!(body.contains("name=\"pic\"; filename=\"me.png\"\r\nContent-Type: image/png\r\n\r\nimg\r\n"));
        assert!(body.contains("name=\"kind\"\r\n\r\navatar\r\n"));
    }

    #[test]
    fn descriptor_headers_override_defaults() {
        let defaults = BTreeMap::from([
            ("Authorization".to_string(), "Client-ID default".to_string()),
            ("X-App".to_string(), "demo".to_string()),
        ]);
        let d = RequestBuilder::new("http://x/y")
            .add_header("authorization", "Bearer t")
            .get()
            .unwrap();
        let req = encode(&d, &ctx(&defaults)).unwrap();
        assert_eq!(req.header("Authorization"), Some("Bearer t"));
        assert_eq!(req.header("x-app"), Some("demo"));
        assert_eq!(req.headers.len(), 2);
    }

    #[test]
    fn caller_content_type_wins() {
        let d = RequestBuilder::new("http://x/y")
            .add_param("a", "1")
            .add_header("Content-Type", "application/x-custom")
            .post()
            .unwrap();
        let defaults = no_defaults();
        let req = encode(&d, &ctx(&defaults)).unwrap();
        assert_eq!(req.header("content-type"), Some("application/x-custom"));
        assert_eq!(req.headers.len(), 1);
    }

    #[test]
    fn download_is_a_get_with_query() {
        let d = RequestBuilder::new("http://x/files/a.bin")
            .add_param("v", "2")
            .dest_dir("/tmp")
            .download()
            .unwrap();
        let defaults = no_defaults();
        let req = encode(&d, &ctx(&defaults)).unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://x/files/a.bin?v=2");
    }
}
