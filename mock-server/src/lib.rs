//! In-process HTTP server used by the integration tests.
//!
//! Every route reflects what it received so tests can assert on the exact
//! request the dispatcher put on the wire: query strings, form bodies,
//! multipart parts, and streamed downloads. `/files/{name}?ms=N` trickles
//! the file out in chunks so a download can be cancelled part way.

use std::{collections::BTreeMap, convert::Infallible, time::Duration};

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Path, Query},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

/// Reflection of a request received on `/echo`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub content_type: Option<String>,
    pub body: String,
}

/// One file part received on `/upload`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: String,
}

/// Everything `/upload` found in a multipart body.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UploadSummary {
    pub files: Vec<UploadedFile>,
    pub fields: BTreeMap<String, String>,
}

#[derive(Deserialize)]
pub struct SlowParams {
    #[serde(default)]
    pub ms: u64,
}

pub fn app() -> Router {
    Router::new()
        .route("/echo", get(echo).post(echo))
        .route("/form", post(form))
        .route("/upload", post(upload))
        .route("/files/{name}", get(download))
        .route("/status/{code}", get(status).post(status))
        .route("/slow", get(slow))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("mock server listening on {addr}");
    }
    axum::serve(listener, app()).await
}

/// Deterministic payload served by `/files/{name}`.
///
/// Large enough to span several reads so downloads are actually streamed.
pub fn file_bytes(name: &str) -> Vec<u8> {
    let line = format!("{name}: the quick brown fox jumps over the lazy dog\n");
    line.repeat(2048).into_bytes()
}

async fn echo(
    method: Method,
    uri: Uri,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Echo> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let headers = headers
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
        .collect();
    Json(Echo {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        query,
        headers,
        content_type,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn form(Form(fields): Form<BTreeMap<String, String>>) -> Json<BTreeMap<String, String>> {
    Json(fields)
}

async fn upload(mut multipart: Multipart) -> Result<Json<UploadSummary>, StatusCode> {
    let mut summary = UploadSummary::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
        let data = String::from_utf8_lossy(&data).into_owned();
        match file_name {
            Some(file_name) => summary.files.push(UploadedFile {
                name,
                file_name,
                content_type,
                data,
            }),
            None => {
                summary.fields.insert(name, data);
            }
        }
    }
    Ok(Json(summary))
}

/// Chunk size of a throttled `/files/{name}?ms=` response.
pub const FILE_CHUNK: usize = 16 * 1024;

async fn download(Path(name): Path<String>, Query(params): Query<SlowParams>) -> Response {
    let headers = [(header::CONTENT_TYPE, "application/octet-stream")];
    let bytes = file_bytes(&name);
    if params.ms == 0 {
        return (headers, bytes).into_response();
    }

    // Throttled: each chunk waits `ms` before it is sent.
    let delay = Duration::from_millis(params.ms);
    let chunks: Vec<Bytes> = bytes.chunks(FILE_CHUNK).map(Bytes::copy_from_slice).collect();
    let stream = stream::iter(chunks).then(move |chunk| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, Infallible>(chunk)
    });
    (headers, Body::from_stream(stream)).into_response()
}

async fn status(Path(code): Path<u16>) -> (StatusCode, String) {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, format!("status {}", status.as_u16()))
}

async fn slow(Query(params): Query<SlowParams>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(params.ms)).await;
    "done"
}
