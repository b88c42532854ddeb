//! The HTTP client capability the dispatcher drives.
//!
//! # Design
//! The dispatcher never opens connections itself. A `Transport` executes one
//! request at a time on whatever thread calls it, and reports non-2xx
//! responses as data rather than errors. Connection reuse, TLS and timeouts
//! all belong to the implementation. `UreqTransport` is the default, built on
//! a shared `ureq::Agent`.

use std::io::{self, Write};
use std::time::Duration;

use ureq::Agent;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::tag::Tag;

pub trait Transport: Send + Sync + 'static {
    /// Execute `request` and buffer the whole response.
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Execute `request`, streaming a 2xx body into `sink`.
    ///
    /// On success the returned response has an empty body. For any other
    /// status nothing is written and the body is returned buffered.
    fn execute_to(&self, request: &HttpRequest, sink: &mut dyn Write) -> Result<HttpResponse, TransportError> {
        let mut response = self.execute(request)?;
        if response.is_success() {
            sink.write_all(&response.body).map_err(sink_error)?;
            response.body.clear();
        }
        Ok(response)
    }

    /// Hint that calls tagged `tag` are no longer wanted.
    fn cancel(&self, _tag: &Tag) {}
}

/// Error a sink raises to abort a stream because its call was cancelled.
#[derive(Debug)]
pub(crate) struct CancelledWrite;

impl std::fmt::Display for CancelledWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("call cancelled")
    }
}

impl std::error::Error for CancelledWrite {}

impl CancelledWrite {
    pub(crate) fn io_error() -> io::Error {
        io::Error::new(io::ErrorKind::Other, CancelledWrite)
    }
}

/// Map a failed write into the sink.
pub(crate) fn sink_error(e: io::Error) -> TransportError {
    if e.get_ref().is_some_and(|inner| inner.is::<CancelledWrite>()) {
        TransportError::Cancelled
    } else {
        TransportError::Io(format!("writing response body: {e}"))
    }
}

/// Default transport backed by `ureq`.
#[derive(Clone)]
pub struct UreqTransport {
    agent: Agent,
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqTransport").finish_non_exhaustive()
    }
}

impl UreqTransport {
    pub fn new(config: &TransportConfig) -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(config.connect_timeout_secs.map(Duration::from_secs))
            .timeout_recv_body(config.read_timeout_secs.map(Duration::from_secs))
            .build()
            .new_agent();
        UreqTransport { agent }
    }

    fn call(&self, request: &HttpRequest) -> Result<ureq::http::Response<ureq::Body>, TransportError> {
        let result = match request.method {
            HttpMethod::Get => {
                let mut builder = self.agent.get(request.url.as_str());
                for (name, value) in &request.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder.call()
            }
            HttpMethod::Post => {
                let mut builder = self.agent.post(request.url.as_str());
                for (name, value) in &request.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                match &request.body {
                    Some(body) => builder.send(body.as_slice()),
                    None => builder.send_empty(),
                }
            }
        };
        result.map_err(|e| TransportError::Io(e.to_string()))
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(&TransportConfig::default())
    }
}

fn response_headers(response: &ureq::http::Response<ureq::Body>) -> Vec<(String, String)> {
    response
        .headers()
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
        .collect()
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut response = self.call(request)?;
        let status = response.status().as_u16();
        let headers = response_headers(&response);
        let body = response
            .body_mut()
            .with_config()
            .limit(u64::MAX)
            .read_to_vec()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        log::debug!("{} {} -> {status}", request.method.as_str(), request.url);
        Ok(HttpResponse { status, headers, body })
    }

    fn execute_to(&self, request: &HttpRequest, sink: &mut dyn Write) -> Result<HttpResponse, TransportError> {
        let mut response = self.call(request)?;
        let status = response.status().as_u16();
        let headers = response_headers(&response);
        let mut result = HttpResponse {
            status,
            headers,
            body: Vec::new(),
        };
        let mut reader = response.body_mut().as_reader();
        if result.is_success() {
            copy(&mut reader, sink)?;
        } else {
            io::copy(&mut reader, &mut result.body).map_err(|e| TransportError::Io(e.to_string()))?;
        }
        log::debug!("{} {} -> {status} (streamed)", request.method.as_str(), request.url);
        Ok(result)
    }
}

// `io::copy` folds read and write failures together; a cancelled sink must
// stay distinguishable from a broken connection.
fn copy(reader: &mut dyn io::Read, sink: &mut dyn Write) -> Result<u64, TransportError> {
    let mut buf = [0u8; 16 * 1024];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::Io(e.to_string())),
        };
        sink.write_all(&buf[..n]).map_err(sink_error)?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(HttpResponse);

    impl Transport for Canned {
        fn execute(&self, _request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            Ok(self.0.clone())
        }
    }

    fn request() -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: "http://x/".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[test]
    fn default_execute_to_streams_success_body() {
        let transport = Canned(HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: b"abc".to_vec(),
        });
        let mut sink = Vec::new();
        let resp = transport.execute_to(&request(), &mut sink).unwrap();
        assert_eq!(sink, b"abc");
        assert!(resp.body.is_empty());
    }

    #[test]
    fn default_execute_to_keeps_error_body() {
        let transport = Canned(HttpResponse {
            status: 500,
            headers: Vec::new(),
            body: b"boom".to_vec(),
        });
        let mut sink = Vec::new();
        let resp = transport.execute_to(&request(), &mut sink).unwrap();
        assert!(sink.is_empty());
        assert_eq!(resp.body, b"boom");
    }

    #[test]
    fn cancelled_write_means_cancelled() {
        let err = sink_error(CancelledWrite::io_error());
        assert!(matches!(err, TransportError::Cancelled));
        let err = sink_error(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[test]
    fn copy_stops_on_cancelled_sink() {
        struct Refuse;
        impl Write for Refuse {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(CancelledWrite::io_error())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let mut reader: &[u8] = b"data";
        let err = copy(&mut reader, &mut Refuse).unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }

    #[test]
    fn unreachable_host_is_io_error() {
        let transport = UreqTransport::new(&TransportConfig {
            connect_timeout_secs: Some(1),
            read_timeout_secs: Some(1),
        });
        let mut req = request();
        req.url = "http://127.0.0.1:1/".to_string();
        let err = transport.execute(&req).unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }
}
