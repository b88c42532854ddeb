//! Tagged request dispatcher over a pluggable HTTP transport.
//!
//! # Overview
//! Callers describe a GET, POST, upload or download with `RequestBuilder`,
//! then hand the descriptor to a `Dispatcher`. Async calls run on a bounded
//! worker pool, are tracked under a caller-chosen `Tag` so a whole group can
//! be cancelled at once, and report back through the `EventLoop` on the
//! thread that drives it. Sync calls block the caller and bypass the tag
//! registry.
//!
//! # Design
//! - The dispatcher owns no connection logic; a `Transport` does the HTTP.
//!   `UreqTransport` is the default, tests inject doubles.
//! - Request kinds share one descriptor shape. A per-kind strategy in
//!   `encode` builds the wire request.
//! - Each call's lifecycle is a single atomic state, which gives exactly one
//!   callback per call, or none when it is cancelled before delivery.
//!
//! ```no_run
//! use std::time::Duration;
//! use tagdispatch_core::{Config, Dispatcher, Outcome, RequestBuilder, Tag};
//!
//! let (dispatcher, event_loop) = Dispatcher::from_config(&Config::default())?;
//! let request = RequestBuilder::new("http://localhost:3000/echo")
//!     .tag("home")
//!     .add_param("page", "1")
//!     .get()?;
//! dispatcher.dispatch_async(request, |outcome| match outcome {
//!     Outcome::Success(payload) => println!("{}", payload.text()),
//!     Outcome::Error { error, .. } => eprintln!("{error}"),
//! })?;
//! event_loop.run_timeout(Duration::from_secs(10));
//! dispatcher.cancel(&Tag::new("home"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod call;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod encode;
pub mod error;
pub mod event_loop;
pub mod http;
pub mod multipart;
pub mod outcome;
pub mod params;
pub mod registry;
pub mod request;
pub mod tag;
pub mod transport;

pub use call::{CallHandle, CallId, CallState};
pub use client::Client;
pub use config::{Config, DispatcherConfig, TransportConfig};
pub use dispatcher::Dispatcher;
pub use error::{ConfigError, DispatchError, TransportError, ValidationError};
pub use event_loop::EventLoop;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use outcome::{Callback, Outcome, Payload};
pub use params::Params;
pub use request::{Body, Destination, FilePart, FileSource, RequestBuilder, RequestDescriptor, RequestKind};
pub use tag::Tag;
pub use transport::{Transport, UreqTransport};
