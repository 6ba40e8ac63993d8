//! The per-request input handed to every handler, and the builder that
//! assembles it.
//!
//! `Input` is a cheap handle; each handler in a chain gets a clone of the same
//! request state. It is created fresh for every request and dropped with it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use http::{HeaderMap, Method};
use serde_json::Value;
use tracing::Span;

use crate::body::{self, Body};
use crate::config::Config;
use crate::cookies;
use crate::fault::Fault;
use crate::funnel::ErrorFunnel;
use crate::response::Response;

/// Names owned by the framework. A flash or exposed entry under one of these
/// names is shadowed by the framework field and never returned by
/// [`Input::value`].
pub const RESERVED: &[&str] = &[
    "body", "config", "cookies", "flash", "headers", "log", "next", "params", "query", "res",
];

/// Method and path of the request being served, as the client sent them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    pub method: Method,
    pub path: String,
}

// ── Flash ─────────────────────────────────────────────────────────────────────

/// Scratch space for passing data between handlers of one request.
#[derive(Debug, Default)]
pub struct Flash {
    entries: Mutex<HashMap<String, Value>>,
}

impl Flash {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `value`, returning what was there before.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.lock().insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }
}

// ── Exposed ───────────────────────────────────────────────────────────────────

/// Application-wide values shared with every request.
///
/// This is one process-wide map, not a per-request copy. The lock only keeps
/// access memory-safe: writes from concurrent requests land in whatever order
/// the scheduler runs them. Populate it at startup through
/// [`App::expose`](crate::App::expose) and treat it as read-mostly.
#[derive(Debug, Clone, Default)]
pub struct Exposed {
    values: Arc<RwLock<HashMap<String, Value>>>,
}

impl Exposed {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value)
    }
}

// ── Input ─────────────────────────────────────────────────────────────────────

struct Inner {
    meta: RequestMeta,
    headers: HeaderMap,
    query: HashMap<String, String>,
    params: HashMap<String, String>,
    body: Body,
    cookies: HashMap<String, String>,
    flash: Flash,
    exposed: Exposed,
    config: Arc<Config>,
    res: Response,
    log: Span,
}

/// The request context.
#[derive(Clone)]
pub struct Input {
    inner: Arc<Inner>,
}

impl Input {
    pub fn method(&self) -> &Method {
        &self.inner.meta.method
    }

    pub fn path(&self) -> &str {
        &self.inner.meta.path
    }

    pub fn meta(&self) -> &RequestMeta {
        &self.inner.meta
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First value of a query parameter.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.inner.query.get(key).map(String::as_str)
    }

    pub fn queries(&self) -> &HashMap<String, String> {
        &self.inner.query
    }

    /// A named path parameter.
    ///
    /// For a route `/users/:id`, `input.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.inner.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.inner.params
    }

    pub fn body(&self) -> &Body {
        &self.inner.body
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.inner.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.inner.cookies
    }

    pub fn flash(&self) -> &Flash {
        &self.inner.flash
    }

    pub fn exposed(&self) -> &Exposed {
        &self.inner.exposed
    }

    /// The configuration snapshot the application was started with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn res(&self) -> &Response {
        &self.inner.res
    }

    /// The request span. Events recorded inside it carry `method` and `path`.
    ///
    /// The chain already runs inside this span; use it explicitly only for
    /// work moved off the request future.
    pub fn log(&self) -> &Span {
        &self.inner.log
    }

    /// Looks a name up the way the merged context resolves it: flash entries
    /// shadow exposed values, and framework-reserved names resolve to nothing
    /// here (use the dedicated accessor instead).
    pub fn value(&self, key: &str) -> Option<Value> {
        if RESERVED.contains(&key) {
            return None;
        }
        self.inner.flash.get(key).or_else(|| self.inner.exposed.get(key))
    }

    pub(crate) fn funnel(&self, fault: &Fault) {
        ErrorFunnel::new(self.inner.config.mode).handle(fault, &self.inner.meta, &self.inner.res);
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Input")
            .field("method", &self.inner.meta.method)
            .field("path", &self.inner.meta.path)
            .field("params", &self.inner.params)
            .field("query", &self.inner.query)
            .finish_non_exhaustive()
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Application state every request context is built from.
#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) exposed: Exposed,
    pub(crate) config: Arc<Config>,
}

/// Request-derived pieces of a context.
pub(crate) struct Parts {
    pub(crate) meta: RequestMeta,
    pub(crate) headers: HeaderMap,
    pub(crate) query: Option<String>,
    pub(crate) params: HashMap<String, String>,
    pub(crate) body: Body,
}

/// Assembles a fresh [`Input`]: shared state first, then a new flash map,
/// then request-derived fields, then the framework's own handles.
pub(crate) fn build(parts: Parts, shared: &Shared, res: Response, log: Span) -> Input {
    let query = body::parse_query(parts.query.as_deref());
    let cookies = parse_cookies(&parts.headers);
    Input {
        inner: Arc::new(Inner {
            exposed: shared.exposed.clone(),
            config: Arc::clone(&shared.config),
            flash: Flash::default(),
            meta: parts.meta,
            headers: parts.headers,
            query,
            params: parts.params,
            body: parts.body,
            cookies,
            res,
            log,
        }),
    }
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let joined = headers
        .get_all(http::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");
    if joined.is_empty() {
        HashMap::new()
    } else {
        cookies::parse(&joined)
    }
}
