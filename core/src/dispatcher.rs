//! The tagged request dispatcher.
//!
//! # Design
//! - The transport is injected, so tests can substitute a double.
//! - Async calls run on a bounded blocking pool owned by the dispatcher.
//!   Each call is registered under its tag before it is submitted and
//!   unregistered when it completes or is cancelled.
//! - Outcomes travel back through a channel to the `EventLoop` returned
//!   alongside the dispatcher; callbacks never run on a worker.
//! - Cancellation is best-effort. A worker already inside the transport is
//!   not interrupted, except that downloads stop at their next write. Its
//!   outcome is discarded, and no callback fires for a call cancelled before
//!   the event loop delivered it.
//! - Sync calls run on the caller's thread and are never registered.

use std::any::Any;
use std::io::{self, BufWriter, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::call::{CallHandle, CallId, CallShared};
use crate::config::{Config, DispatcherConfig};
use crate::encode::{encode, EncodeContext};
use crate::error::{ConfigError, DispatchError, TransportError, ValidationError};
use crate::event_loop::{Completion, EventLoop};
use crate::http::{HttpRequest, HttpResponse};
use crate::outcome::{Callback, Outcome, Payload};
use crate::registry::CallRegistry;
use crate::request::{Destination, RequestDescriptor, RequestKind};
use crate::tag::Tag;
use crate::transport::{sink_error, CancelledWrite, Transport, UreqTransport};

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    registry: Arc<CallRegistry>,
    config: Arc<DispatcherConfig>,
    completions: Sender<Completion>,
    handle: Handle,
    runtime: Option<Runtime>,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher over `transport` and the event loop that will
    /// deliver its callbacks.
    pub fn new<T: Transport>(transport: T, config: DispatcherConfig) -> Result<(Self, EventLoop), ConfigError> {
        Self::with_transport(Arc::new(transport), config)
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        config: DispatcherConfig,
    ) -> Result<(Self, EventLoop), ConfigError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.worker_threads.max(1))
            .thread_name("tagdispatch-worker")
            .build()
            .map_err(ConfigError::Runtime)?;
        let (tx, rx) = mpsc::channel();
        let dispatcher = Dispatcher {
            transport,
            registry: Arc::new(CallRegistry::new()),
            config: Arc::new(config),
            completions: tx,
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            next_id: AtomicU64::new(1),
        };
        Ok((dispatcher, EventLoop::new(rx)))
    }

    /// Dispatcher over the default `ureq` transport.
    pub fn from_config(config: &Config) -> Result<(Self, EventLoop), ConfigError> {
        Self::new(UreqTransport::new(&config.transport), config.dispatcher.clone())
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    fn resolve_tag(&self, descriptor: &RequestDescriptor) -> Tag {
        descriptor
            .tag
            .clone()
            .unwrap_or_else(|| Tag::new(self.config.default_tag.as_str()))
    }

    /// Validate `descriptor`, register it under its tag and submit it to the
    /// worker pool. `callback` later runs exactly once on the event loop,
    /// unless the call is cancelled first.
    pub fn dispatch_async<F>(&self, descriptor: RequestDescriptor, callback: F) -> Result<CallHandle, ValidationError>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        descriptor.validate()?;
        let id = CallId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let call = Arc::new(CallShared::new(id, self.resolve_tag(&descriptor)));
        self.registry.insert(call.clone());
        call.mark_dispatched();
        log::debug!(
            "dispatching {} {} as call {id} ({})",
            descriptor.kind.as_str(),
            descriptor.url,
            call.tag
        );

        let job = Job {
            call: call.clone(),
            descriptor,
            callback: Box::new(callback),
            transport: self.transport.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            completions: self.completions.clone(),
        };
        self.handle.spawn_blocking(move || job.run());

        Ok(CallHandle {
            shared: call,
            registry: self.registry.clone(),
            transport: self.transport.clone(),
        })
    }

    /// Build and execute `descriptor` on the calling thread.
    pub fn dispatch_sync(&self, descriptor: &RequestDescriptor) -> Result<Payload, DispatchError> {
        descriptor.validate()?;
        let ctx = encode_context(&self.config);
        perform(self.transport.as_ref(), descriptor, &ctx, None).into_result()
    }

    /// Cancel every active call tagged `tag`. Unknown tags are a no-op.
    /// Returns how many calls were cancelled.
    pub fn cancel(&self, tag: &Tag) -> usize {
        let calls = self.registry.take_tag(tag);
        if calls.is_empty() {
            return 0;
        }
        let cancelled = calls.iter().filter(|call| call.cancel()).count();
        self.transport.cancel(tag);
        log::info!("cancelled {cancelled} call(s) tagged {tag}");
        cancelled
    }

    /// Cancel every active call.
    pub fn cancel_all(&self) -> usize {
        let calls = self.registry.take_all();
        let mut tags: Vec<&Tag> = calls.iter().map(|call| &call.tag).collect();
        tags.sort();
        tags.dedup();
        for tag in tags {
            self.transport.cancel(tag);
        }
        let cancelled = calls.iter().filter(|call| call.cancel()).count();
        if cancelled > 0 {
            log::info!("cancelled all {cancelled} active call(s)");
        }
        cancelled
    }

    /// Number of active calls tagged `tag`.
    pub fn active_calls(&self, tag: &Tag) -> usize {
        self.registry.len_for(tag)
    }

    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Cancel everything and stop the worker pool without waiting for calls
    /// still inside the transport.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.cancel_all();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn encode_context(config: &DispatcherConfig) -> EncodeContext<'_> {
    EncodeContext {
        default_headers: &config.default_headers,
        upload_content_type: &config.upload_content_type,
    }
}

/// One async call travelling to a worker.
struct Job {
    call: Arc<CallShared>,
    descriptor: RequestDescriptor,
    callback: Callback,
    transport: Arc<dyn Transport>,
    registry: Arc<CallRegistry>,
    config: Arc<DispatcherConfig>,
    completions: Sender<Completion>,
}

impl Job {
    fn run(self) {
        let Job {
            call,
            descriptor,
            callback,
            transport,
            registry,
            config,
            completions,
        } = self;

        if call.is_cancelled() {
            log::debug!("call {} cancelled before it started", call.id);
            return;
        }
        let ctx = encode_context(&config);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            perform(transport.as_ref(), &descriptor, &ctx, Some(call.as_ref()))
        }))
        .unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            log::error!("transport panicked in call {}: {message}", call.id);
            Outcome::Error {
                request: None,
                error: TransportError::Panicked(message).into(),
            }
        });
        registry.remove(&call.tag, call.id);

        if !call.mark_completed() {
            log::debug!("discarding outcome of cancelled call {}", call.id);
            return;
        }
        let id = call.id;
        let completion = Completion {
            call,
            callback,
            outcome,
        };
        if completions.send(completion).is_err() {
            log::warn!("event loop is gone, dropping outcome of call {id}");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Encode and execute one descriptor. `call` is set for async calls so a
/// download can notice cancellation mid-stream.
fn perform(
    transport: &dyn Transport,
    descriptor: &RequestDescriptor,
    ctx: &EncodeContext<'_>,
    call: Option<&CallShared>,
) -> Outcome {
    let request = match encode(descriptor, ctx) {
        Ok(request) => request,
        Err(error) => return Outcome::Error { request: None, error },
    };
    let result = match (descriptor.kind, &descriptor.destination) {
        (RequestKind::Download, Some(destination)) => download(transport, &request, destination, call),
        _ => transport
            .execute(&request)
            .and_then(check_status)
            .map(|response| Payload::Body(response.body)),
    };
    match result {
        Ok(payload) => Outcome::Success(payload),
        Err(error) => Outcome::Error {
            request: Some(request),
            error: error.into(),
        },
    }
}

fn check_status(response: HttpResponse) -> Result<HttpResponse, TransportError> {
    if response.is_success() {
        return Ok(response);
    }
    Err(TransportError::Status {
        status: response.status,
        body: response.text(),
    })
}

fn download(
    transport: &dyn Transport,
    request: &HttpRequest,
    destination: &Destination,
    call: Option<&CallShared>,
) -> Result<Payload, TransportError> {
    std::fs::create_dir_all(&destination.dir).map_err(|e| TransportError::file(&destination.dir, e))?;
    let path = destination.path();
    // The destination is only replaced once the whole body has arrived.
    let staging = tempfile::Builder::new()
        .prefix(".tagdispatch-")
        .suffix(".part")
        .tempfile_in(&destination.dir)
        .map_err(|e| TransportError::file(&destination.dir, e))?;
    let mut sink = CancellableWriter {
        inner: BufWriter::new(staging.as_file()),
        call,
    };

    let result = transport
        .execute_to(request, &mut sink)
        .and_then(check_status)
        .and_then(|_| sink.flush().map_err(sink_error));
    drop(sink);

    match result {
        Ok(_) => {
            staging
                .persist(&path)
                .map_err(|e| TransportError::file(&path, e.error))?;
            Ok(Payload::File(path))
        }
        Err(e) => {
            if let Err(close) = staging.close() {
                log::warn!("cannot remove partial download in {}: {close}", destination.dir.display());
            }
            Err(e)
        }
    }
}

/// Refuses further writes once its call has been cancelled.
struct CancellableWriter<'a, W> {
    inner: W,
    call: Option<&'a CallShared>,
}

impl<W: Write> CancellableWriter<'_, W> {
    fn check(&self) -> io::Result<()> {
        match self.call {
            Some(call) if call.is_cancelled() => Err(CancelledWrite::io_error()),
            _ => Ok(()),
        }
    }
}

impl<W: Write> Write for CancellableWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check()?;
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::request::RequestBuilder;

    /// Answers every request with a fixed response and records what it saw.
    struct Recording {
        response: HttpResponse,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Recording {
        fn new(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Recording {
                response: HttpResponse {
                    status,
                    headers: Vec::new(),
                    body: body.as_bytes().to_vec(),
                },
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for Recording {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(self.response.clone())
        }
    }

    fn dispatcher(transport: Arc<Recording>) -> (Dispatcher, EventLoop) {
        Dispatcher::with_transport(transport, DispatcherConfig::default()).unwrap()
    }

    #[test]
    fn sync_get_returns_body() {
        let transport = Recording::new(200, "hello");
        let (dispatcher, _loop) = dispatcher(transport.clone());
        let d = RequestBuilder::new("http://x/y").add_param("a", "1").get().unwrap();

        let payload = dispatcher.dispatch_sync(&d).unwrap();
        assert_eq!(payload.text(), "hello");
        assert_eq!(transport.seen.lock().unwrap()[0].url, "http://x/y?a=1");
        assert_eq!(dispatcher.active_count(), 0);
    }

    #[test]
    fn sync_non_success_is_status_error() {
        let (dispatcher, _loop) = dispatcher(Recording::new(404, "missing"));
        let d = RequestBuilder::new("http://x/y").get().unwrap();

        let err = dispatcher.dispatch_sync(&d).unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "HTTP 404: missing");
    }

    #[test]
    fn sync_rejects_invalid_descriptor() {
        let (dispatcher, _loop) = dispatcher(Recording::new(200, ""));
        let d = RequestDescriptor::new(RequestKind::Get, "");

        let err = dispatcher.dispatch_sync(&d).unwrap_err();
        assert!(matches!(err, DispatchError::Validation(ValidationError::MissingUrl)));
    }

    #[test]
    fn async_rejects_invalid_descriptor_synchronously() {
        let (dispatcher, _loop) = dispatcher(Recording::new(200, ""));
        let d = RequestDescriptor::new(RequestKind::Upload, "http://x/up");

        let err = dispatcher.dispatch_async(d, |_| panic!("must not run")).unwrap_err();
        assert_eq!(err, ValidationError::MissingFiles);
        assert_eq!(dispatcher.active_count(), 0);
    }

    #[test]
    fn untagged_call_uses_configured_default() {
        let transport = Recording::new(200, "");
        let config = DispatcherConfig {
            default_tag: "bg".to_string(),
            ..DispatcherConfig::default()
        };
        let (dispatcher, event_loop) = Dispatcher::with_transport(transport, config).unwrap();
        let d = RequestBuilder::new("http://x/y").get().unwrap();

        let handle = dispatcher.dispatch_async(d, |_| {}).unwrap();
        assert_eq!(handle.tag(), &Tag::new("bg"));
        event_loop.run_until(|| dispatcher.active_count() == 0, std::time::Duration::from_secs(5));
    }

    #[test]
    fn cancel_unknown_tag_is_a_no_op() {
        let (dispatcher, _loop) = dispatcher(Recording::new(200, ""));
        assert_eq!(dispatcher.cancel(&Tag::new("nobody")), 0);
        assert_eq!(dispatcher.cancel_all(), 0);
    }

    #[test]
    fn cancellable_writer_refuses_after_cancel() {
        let call = CallShared::new(CallId(1), Tag::default());
        call.mark_dispatched();
        let mut writer = CancellableWriter {
            inner: Vec::new(),
            call: Some(&call),
        };
        writer.write_all(b"ab").unwrap();
        call.cancel();
        let err = writer.write_all(b"cd").unwrap_err();
        assert!(matches!(sink_error(err), TransportError::Cancelled));
        assert_eq!(writer.inner, b"ab");
    }

    #[test]
    fn sync_download_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, _loop) = dispatcher(Recording::new(200, "file body"));
        let d = RequestBuilder::new("http://x/files/a.txt")
            .dest_dir(dir.path().join("nested"))
            .download()
            .unwrap();

        let payload = dispatcher.dispatch_sync(&d).unwrap();
        let path = dir.path().join("nested").join("a.txt");
        assert_eq!(payload, Payload::File(path.clone()));
        assert_eq!(std::fs::read(&path).unwrap(), b"file body");
    }

    #[test]
    fn failed_download_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, _loop) = dispatcher(Recording::new(500, "boom"));
        let d = RequestBuilder::new("http://x/files/a.txt")
            .dest_dir(dir.path())
            .download()
            .unwrap();

        let err = dispatcher.dispatch_sync(&d).unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_download_keeps_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("a.txt");
        std::fs::write(&existing, "precious user data").unwrap();
        let (dispatcher, _loop) = dispatcher(Recording::new(404, "missing"));
        let d = RequestBuilder::new("http://x/files/a.txt")
            .dest_dir(dir.path())
            .download()
            .unwrap();

        let err = dispatcher.dispatch_sync(&d).unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "precious user data");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn successful_download_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("a.txt");
        std::fs::write(&existing, "old contents that are longer").unwrap();
        let (dispatcher, _loop) = dispatcher(Recording::new(200, "new"));
        let d = RequestBuilder::new("http://x/files/a.txt")
            .dest_dir(dir.path())
            .download()
            .unwrap();

        dispatcher.dispatch_sync(&d).unwrap();
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
