//! One-call helpers over a `Dispatcher` for the common request shapes.
//!
//! Each helper builds a descriptor, dispatches it asynchronously and returns
//! the handle. Anything more specific goes through `RequestBuilder` and the
//! dispatcher directly.

use std::path::{Path, PathBuf};

use crate::call::CallHandle;
use crate::dispatcher::Dispatcher;
use crate::error::ValidationError;
use crate::outcome::Outcome;
use crate::params::Params;
use crate::request::RequestBuilder;
use crate::tag::Tag;

#[derive(Clone, Copy)]
pub struct Client<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> Client<'a> {
    pub fn new(dispatcher: &'a Dispatcher) -> Self {
        Client { dispatcher }
    }

    pub fn dispatcher(&self) -> &'a Dispatcher {
        self.dispatcher
    }

    pub fn get<F>(&self, url: &str, callback: F) -> Result<CallHandle, ValidationError>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let descriptor = RequestBuilder::new(url).get()?;
        self.dispatcher.dispatch_async(descriptor, callback)
    }

    /// Form post of `params`. Without a tag the dispatcher's default applies.
    pub fn post<F>(
        &self,
        url: &str,
        params: Option<&Params>,
        tag: Option<Tag>,
        callback: F,
    ) -> Result<CallHandle, ValidationError>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let mut builder = RequestBuilder::new(url);
        if let Some(params) = params {
            builder = builder.params(params.clone());
        }
        if let Some(tag) = tag {
            builder = builder.tag(tag);
        }
        self.dispatcher.dispatch_async(builder.post()?, callback)
    }

    /// Multipart upload of `file` under `field`, with `params` as extra fields.
    pub fn post_file<F>(
        &self,
        url: &str,
        params: Option<&Params>,
        field: &str,
        file: impl Into<PathBuf>,
        callback: F,
    ) -> Result<CallHandle, ValidationError>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let mut builder = RequestBuilder::new(url).file_part(field, file);
        if let Some(params) = params {
            builder = builder.params(params.clone());
        }
        self.dispatcher.dispatch_async(builder.upload()?, callback)
    }

    /// Download `url` into `dir/file_name`; the success payload is the path.
    pub fn download<F>(
        &self,
        url: &str,
        dir: impl AsRef<Path>,
        file_name: &str,
        callback: F,
    ) -> Result<CallHandle, ValidationError>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let descriptor = RequestBuilder::new(url)
            .dest_dir(dir.as_ref())
            .dest_file_name(file_name)
            .download()?;
        self.dispatcher.dispatch_async(descriptor, callback)
    }

    pub fn cancel(&self, tag: &Tag) -> usize {
        self.dispatcher.cancel(tag)
    }
}
