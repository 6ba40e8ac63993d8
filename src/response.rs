//! The response façade handlers write through, and the transport seam it
//! finalizes into.
//!
//! A [`Response`] is a cheap handle: every handler in a chain holds a clone of
//! the same per-request state. Status and headers can be shaped freely until
//! one of the finalizers (`end`, `send`, `text`, `json`, `bytes`, `error`)
//! hands the response to the [`Transport`]. After that the façade is frozen;
//! further writes are dropped with a warning.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use serde::Serialize;
use tracing::warn;

use crate::context::RequestMeta;
use crate::cookies::{self, CookieError, SetCookie};
use crate::fault::Fault;
use crate::funnel::ErrorFunnel;

// ── Transport seam ────────────────────────────────────────────────────────────

/// A response as it leaves the framework.
#[derive(Debug, Clone)]
pub struct Finalized {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Accepts exactly one finalized response per request.
///
/// The hyper server implements this over a oneshot channel; tests implement it
/// with a recorder. Implementations must not panic.
pub trait Transport: Send {
    fn finalize(self: Box<Self>, response: Finalized);
}

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    FormData,     // application/x-www-form-urlencoded
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    MsgPack,      // application/msgpack
    OctetStream,  // application/octet-stream
    Pdf,          // application/pdf
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::FormData    => "application/x-www-form-urlencoded",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::MsgPack     => "application/msgpack",
            Self::OctetStream => "application/octet-stream",
            Self::Pdf         => "application/pdf",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }

    /// Maps the short names handlers use (`json`, `text`, `bin`, ...).
    pub fn from_short(kind: &str) -> Option<Self> {
        let kind = kind.trim().to_ascii_lowercase();
        Some(match kind.as_str() {
            "csv"                          => Self::Csv,
            "sse" | "event-stream"         => Self::EventStream,
            "form" | "urlencoded"          => Self::FormData,
            "html"                         => Self::Html,
            "json"                         => Self::Json,
            "msgpack"                      => Self::MsgPack,
            "bin" | "binary" | "octet-stream" => Self::OctetStream,
            "pdf"                          => Self::Pdf,
            "text" | "txt"                 => Self::Text,
            "xml"                          => Self::Xml,
            _                              => return None,
        })
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

struct State {
    status: StatusCode,
    headers: HeaderMap,
    finished: bool,
    stack_aborted: bool,
    error: Option<String>,
    funnel: Option<(ErrorFunnel, RequestMeta)>,
    transport: Option<Box<dyn Transport>>,
}

/// The per-request response façade.
///
/// ```rust,ignore
/// async fn create(input: Input, _next: Next) -> Result<(), Fault> {
///     input.res()
///         .status(StatusCode::CREATED)
///         .set_header("location", "/users/99")
///         .json(&serde_json::json!({ "id": 99 }))
/// }
/// ```
#[derive(Clone)]
pub struct Response {
    state: Arc<Mutex<State>>,
}

impl Response {
    pub(crate) fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                finished: false,
                stack_aborted: false,
                error: None,
                funnel: None,
                transport: Some(transport),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self, code: StatusCode) -> &Self {
        let mut state = self.lock();
        if state.finished {
            warn!(status = code.as_u16(), "status set after response was finalized; ignored");
        } else {
            state.status = code;
        }
        self
    }

    /// Sets a header, replacing any previous values for `name`.
    pub fn set_header<K, V>(&self, name: K, value: V) -> &Self
    where
        K: TryInto<HeaderName>,
        K::Error: fmt::Display,
        V: TryInto<HeaderValue>,
        V::Error: fmt::Display,
    {
        self.write_header(name, value, false)
    }

    /// Adds a header value, keeping earlier values for the same name.
    pub fn append_header<K, V>(&self, name: K, value: V) -> &Self
    where
        K: TryInto<HeaderName>,
        K::Error: fmt::Display,
        V: TryInto<HeaderValue>,
        V::Error: fmt::Display,
    {
        self.write_header(name, value, true)
    }

    fn write_header<K, V>(&self, name: K, value: V, append: bool) -> &Self
    where
        K: TryInto<HeaderName>,
        K::Error: fmt::Display,
        V: TryInto<HeaderValue>,
        V::Error: fmt::Display,
    {
        let name = match name.try_into() {
            Ok(name) => name,
            Err(e) => {
                warn!("invalid header name dropped: {e}");
                return self;
            }
        };
        let value = match value.try_into() {
            Ok(value) => value,
            Err(e) => {
                warn!(header = %name, "invalid header value dropped: {e}");
                return self;
            }
        };

        let mut state = self.lock();
        if state.finished {
            warn!(header = %name, "header written after response was finalized; ignored");
        } else if append {
            state.headers.append(name, value);
        } else {
            state.headers.insert(name, value);
        }
        self
    }

    /// Sets `content-type` from a short name (`json`, `text`, ...) or a full
    /// MIME string.
    pub fn content_type(&self, kind: &str) -> &Self {
        match ContentType::from_short(kind) {
            Some(known) => self.set_header(header::CONTENT_TYPE, known.as_str()),
            None => self.set_header(header::CONTENT_TYPE, kind),
        }
    }

    /// Appends a `Set-Cookie` header.
    pub fn set_cookie(&self, cookie: &SetCookie) -> Result<&Self, CookieError> {
        let value = cookies::serialize(cookie)?;
        Ok(self.append_header(header::SET_COOKIE, value))
    }

    pub fn status_code(&self) -> StatusCode {
        self.lock().status
    }

    pub fn header(&self, name: impl header::AsHeaderName) -> Option<HeaderValue> {
        self.lock().headers.get(name).cloned()
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// True once the response is finished or a handler called [`error`](Self::error).
    /// Downstream handlers are skipped from this point on.
    pub fn is_aborted(&self) -> bool {
        let state = self.lock();
        state.finished || state.stack_aborted
    }

    /// Internal detail of the failure that produced this response, if any.
    pub fn captured_error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub(crate) fn capture_error(&self, detail: String) {
        self.lock().error = Some(detail);
    }

    /// Routes [`error`](Self::error) through the dispatcher's funnel.
    pub(crate) fn attach_funnel(&self, funnel: ErrorFunnel, meta: RequestMeta) {
        self.lock().funnel = Some((funnel, meta));
    }

    // ── Finalizers ───────────────────────────────────────────────────────────

    /// Finalizes with an empty body.
    pub fn end(&self) {
        self.finalize(Bytes::new());
    }

    /// Finalizes with `body` as-is; `content-type` is left to the caller.
    pub fn send(&self, body: impl Into<Bytes>) {
        self.finalize(body.into());
    }

    /// Finalizes with a `text/plain; charset=utf-8` body.
    pub fn text(&self, body: impl Into<String>) {
        self.bytes(ContentType::Text, body.into());
    }

    /// Serializes `value` and finalizes with an `application/json` body.
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), Fault> {
        let body = serde_json::to_vec(value)?;
        self.bytes(ContentType::Json, body);
        Ok(())
    }

    /// Finalizes with a typed body. Use this for XML, HTML, binary, SSE, etc.
    pub fn bytes(&self, content_type: ContentType, body: impl Into<Bytes>) {
        self.set_header(header::CONTENT_TYPE, content_type.as_str());
        self.finalize(body.into());
    }

    /// Aborts the chain: marks the response so no further handler runs and
    /// hands `message` to the error funnel under `status`.
    ///
    /// The funnel decides what the client sees, so a `5xx` message is logged
    /// at error and withheld in production mode.
    ///
    /// Pass `format_args!` for formatted messages:
    /// `res.error(StatusCode::NOT_FOUND, format_args!("user {id} not found"))`.
    pub fn error(&self, status: StatusCode, message: impl fmt::Display) {
        let message = message.to_string();
        let funnel = {
            let mut state = self.lock();
            if state.finished {
                warn!(status = status.as_u16(), %message, "error() after response was finalized; ignored");
                return;
            }
            state.stack_aborted = true;
            state.funnel.clone()
        };

        let fault = Fault::new(status, message);
        match funnel {
            Some((funnel, meta)) => funnel.handle(&fault, &meta, self),
            // Not yet dispatched: no mode to consult.
            None => {
                self.capture_error(fault.message());
                self.status(status);
                self.bytes(ContentType::Text, fault.message());
            }
        }
    }

    /// Hands the response to the transport. Returns `false` if it had already
    /// been finalized, in which case nothing is written.
    pub(crate) fn finalize(&self, body: Bytes) -> bool {
        let (transport, response) = {
            let mut state = self.lock();
            if state.finished {
                warn!(status = state.status.as_u16(), "response already finalized; second write dropped");
                return false;
            }
            state.finished = true;
            let Some(transport) = state.transport.take() else {
                return false;
            };
            let response = Finalized {
                status: state.status,
                headers: state.headers.clone(),
                body,
            };
            (transport, response)
        };
        transport.finalize(response);
        true
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Response")
            .field("status", &state.status)
            .field("headers", &state.headers)
            .field("finished", &state.finished)
            .field("stack_aborted", &state.stack_aborted)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Clone, Default)]
    pub(crate) struct Recorder(pub(crate) Arc<Mutex<Vec<Finalized>>>);

    impl Recorder {
        pub(crate) fn sent(&self) -> Vec<Finalized> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Transport for Recorder {
        fn finalize(self: Box<Self>, response: Finalized) {
            self.0.lock().unwrap().push(response);
        }
    }

    fn response() -> (Response, Recorder) {
        let recorder = Recorder::default();
        (Response::new(Box::new(recorder.clone())), recorder)
    }

    #[test]
    fn defaults_to_200_and_finalizes_once() {
        let (res, recorder) = response();
        res.text("ok");
        res.text("again");
        res.end();

        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, StatusCode::OK);
        assert_eq!(sent[0].body, Bytes::from_static(b"ok"));
        assert_eq!(sent[0].headers[header::CONTENT_TYPE], "text/plain; charset=utf-8");
        assert!(res.is_finished());
    }

    #[test]
    fn append_keeps_repeated_headers() {
        let (res, recorder) = response();
        res.append_header("x-tag", "a").append_header("x-tag", "b");
        res.set_header("x-one", "1").set_header("x-one", "2");
        res.end();

        let sent = &recorder.sent()[0];
        let tags: Vec<_> = sent.headers.get_all("x-tag").iter().collect();
        assert_eq!(tags, ["a", "b"]);
        assert_eq!(sent.headers["x-one"], "2");
    }

    #[test]
    fn writes_after_finalize_are_ignored() {
        let (res, recorder) = response();
        res.status(StatusCode::ACCEPTED).end();
        res.status(StatusCode::IM_A_TEAPOT).set_header("x-late", "1");

        assert_eq!(res.status_code(), StatusCode::ACCEPTED);
        assert!(res.header("x-late").is_none());
        assert_eq!(recorder.sent().len(), 1);
    }

    #[test]
    fn invalid_headers_are_dropped() {
        let (res, _) = response();
        res.set_header("bad header", "v").set_header("x-ok", "line\nbreak");
        assert!(res.header("x-ok").is_none());
    }

    #[test]
    fn content_type_maps_short_names() {
        let (res, _) = response();
        res.content_type("json");
        assert_eq!(res.header(header::CONTENT_TYPE).unwrap(), "application/json");
        res.content_type("image/png");
        assert_eq!(res.header(header::CONTENT_TYPE).unwrap(), "image/png");
    }

    #[test]
    fn error_aborts_and_finalizes() {
        let (res, recorder) = response();
        let id = 7;
        res.error(StatusCode::NOT_FOUND, format_args!("user {id} not found"));

        assert!(res.is_aborted());
        assert_eq!(res.captured_error().as_deref(), Some("user 7 not found"));
        let sent = &recorder.sent()[0];
        assert_eq!(sent.status, StatusCode::NOT_FOUND);
        assert_eq!(sent.body, Bytes::from_static(b"user 7 not found"));
    }

    #[test]
    fn error_follows_the_attached_funnel() {
        let (res, recorder) = response();
        let meta = RequestMeta { method: http::Method::GET, path: "/users/7".into() };
        res.attach_funnel(ErrorFunnel::new(crate::config::Mode::Production), meta);
        res.error(StatusCode::SERVICE_UNAVAILABLE, "replica lag");

        assert!(res.is_aborted());
        assert_eq!(res.captured_error().as_deref(), Some("replica lag"));
        let sent = &recorder.sent()[0];
        assert_eq!(sent.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(sent.body.is_empty());
    }

    #[test]
    fn json_serializes_body() {
        let (res, recorder) = response();
        res.status(StatusCode::CREATED)
            .json(&serde_json::json!({ "id": 1 }))
            .unwrap();

        let sent = &recorder.sent()[0];
        assert_eq!(sent.status, StatusCode::CREATED);
        assert_eq!(sent.body, Bytes::from_static(br#"{"id":1}"#));
        assert_eq!(sent.headers[header::CONTENT_TYPE], "application/json");
    }
}
