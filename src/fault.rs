//! The canonical failure value handlers raise.
//!
//! Handlers are not guaranteed to fail with well-typed errors: a failure may
//! carry plain text, a structured JSON value, or raw bytes. [`Fault`] folds all
//! of them into one shape (status, payload, kind) that the error funnel can
//! act on without caring where the failure came from.
//!
//! ```rust
//! use restline::{Fault, ResultExt, StatusCode};
//!
//! fn lookup(id: &str) -> Result<u32, Fault> {
//!     let id: u32 = id.parse::<u32>().status(StatusCode::BAD_REQUEST)?;
//!     Some(id).filter(|id| *id < 100).status(StatusCode::NOT_FOUND)
//! }
//!
//! assert_eq!(lookup("7").unwrap(), 7);
//! assert_eq!(lookup("x").unwrap_err().status(), StatusCode::BAD_REQUEST);
//! assert_eq!(lookup("700").unwrap_err().status(), StatusCode::NOT_FOUND);
//! ```

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt;

use bytes::Bytes;
use http::StatusCode;
use serde_json::Value;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// What a failure carries back to the client.
#[derive(Debug)]
pub enum Payload {
    Text(String),
    Json(Value),
    Binary(Bytes),
}

impl Payload {
    /// Short content kind: `text`, `json` or `binary`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Json(_) => "json",
            Self::Binary(_) => "binary",
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Json(value) => value.to_string(),
            Self::Binary(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

/// Which part of the error taxonomy a fault belongs to. Drives log levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    /// 4xx: malformed input, unknown route, unsupported media type.
    ClientInput,
    /// 5xx: anything raised or panicked by application code.
    Handler,
    /// Client went away, or the response was written after it was finalized.
    Transport,
}

/// A failure raised while serving a request.
///
/// Converts from any `std::error::Error + Send + Sync + 'static` with status
/// `500`, keeping the original error as its source. `Fault` itself does not
/// implement `std::error::Error` so that blanket conversion stays coherent.
#[derive(Debug)]
pub struct Fault {
    status: StatusCode,
    payload: Payload,
    kind: FaultKind,
    source: Option<BoxError>,
    backtrace: Backtrace,
    pub(crate) funneled: bool,
}

impl Fault {
    /// A text fault with an explicit status.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self::with_payload(status, Payload::Text(message.into()))
    }

    /// A text fault with status `500`.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// A structured fault; sent to the client as `application/json`.
    pub fn json(status: StatusCode, value: Value) -> Self {
        Self::with_payload(status, Payload::Json(value))
    }

    /// A raw-bytes fault; sent to the client as `application/octet-stream`.
    pub fn binary(status: StatusCode, bytes: impl Into<Bytes>) -> Self {
        Self::with_payload(status, Payload::Binary(bytes.into()))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Wraps an error under an explicit status, keeping it as the source.
    pub fn from_error<E>(status: StatusCode, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let mut fault = Self::new(status, error.to_string());
        fault.source = Some(Box::new(error));
        fault
    }

    /// The client disconnected or the body stream broke mid-read.
    pub fn aborted<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let mut fault = Self::from_error(StatusCode::BAD_REQUEST, error);
        fault.kind = FaultKind::Transport;
        fault
    }

    /// Converts a caught panic payload into a `500`.
    pub fn from_panic(panic: Box<dyn Any + Send>) -> Self {
        let reason = if let Some(s) = panic.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self::msg(format!("handler panicked: {reason}"))
    }

    fn with_payload(status: StatusCode, payload: Payload) -> Self {
        Self {
            status,
            payload,
            kind: kind_for(status),
            source: None,
            backtrace: Backtrace::capture(),
            funneled: false,
        }
    }

    /// Replaces the status. Transport faults keep their kind.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        if self.kind != FaultKind::Transport {
            self.kind = kind_for(status);
        }
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The payload rendered as text, as it would appear in a log line.
    pub fn message(&self) -> String {
        self.payload.render()
    }

    pub fn source(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Message followed by the full source chain.
    pub fn detail(&self) -> String {
        let mut detail = self.message();
        let mut next: Option<&(dyn StdError + 'static)> = match &self.source {
            Some(source) => source.source(),
            None => None,
        };
        while let Some(cause) = next {
            detail.push_str(": ");
            detail.push_str(&cause.to_string());
            next = cause.source();
        }
        detail
    }

    /// The backtrace captured at construction, when `RUST_BACKTRACE` enabled it.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.backtrace.status() {
            BacktraceStatus::Captured => Some(&self.backtrace),
            _ => None,
        }
    }
}

fn kind_for(status: StatusCode) -> FaultKind {
    if status.is_server_error() {
        FaultKind::Handler
    } else {
        FaultKind::ClientInput
    }
}

impl<E> From<E> for Fault
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::from_error(StatusCode::INTERNAL_SERVER_ERROR, error)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Attach an HTTP status to a failure on the way out of a handler.
pub trait ResultExt<T> {
    fn status(self, status: StatusCode) -> Result<T, Fault>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn status(self, status: StatusCode) -> Result<T, Fault> {
        self.map_err(|e| Fault::from_error(status, e))
    }
}

impl<T> ResultExt<T> for Result<T, Fault> {
    fn status(self, status: StatusCode) -> Result<T, Fault> {
        self.map_err(|fault| fault.with_status(status))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn status(self, status: StatusCode) -> Result<T, Fault> {
        self.ok_or_else(|| Fault::new(status, status.canonical_reason().unwrap_or("error")))
    }
}
