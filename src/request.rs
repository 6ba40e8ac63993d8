//! The inbound request as the transport hands it to the dispatcher.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;

use crate::fault::Fault;

/// A request before routing: method, raw target, headers, and the body bytes
/// (or the failure that interrupted reading them).
#[derive(Debug)]
pub struct IncomingRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Result<Bytes, Fault>,
}

impl IncomingRequest {
    /// `target` is the raw request target, path plus optional `?query`.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_owned())),
            None => (target, None),
        };
        Self {
            method,
            path: path.to_owned(),
            query,
            headers: HeaderMap::new(),
            body: Ok(Bytes::new()),
        }
    }

    pub(crate) fn from_parts(
        method: Method,
        target: &str,
        headers: HeaderMap,
        body: Result<Bytes, Fault>,
    ) -> Self {
        let mut request = Self::new(method, target);
        request.headers = headers;
        request.body = body;
        request
    }

    /// Appends a header. Invalid names or values are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Ok(body.into());
        self
    }

    /// Marks the body as interrupted mid-read.
    pub fn aborted(mut self, fault: Fault) -> Self {
        self.body = Err(fault);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}
