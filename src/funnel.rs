//! The error funnel: the single place a [`Fault`] becomes a response.
//!
//! Every failure reaches the client through here, whether a handler returned
//! it, panicked, or the request body could not be read or parsed. The funnel
//! logs the fault at a level chosen by its kind, records the internal detail
//! on the response, and finalizes with the fault's status and payload.
//!
//! In production mode `5xx` bodies are suppressed; the client sees the status
//! only. The funnel itself never fails: a panic inside it is caught and turned
//! into a bare `500`.

use std::panic::{AssertUnwindSafe, catch_unwind};

use http::StatusCode;
use tracing::{debug, error, warn};

use crate::config::Mode;
use crate::context::RequestMeta;
use crate::fault::{Fault, FaultKind, Payload};
use crate::response::{ContentType, Response};

#[derive(Debug, Clone, Copy)]
pub(crate) struct ErrorFunnel {
    production: bool,
}

impl ErrorFunnel {
    pub(crate) fn new(mode: Mode) -> Self {
        Self { production: mode == Mode::Production }
    }

    pub(crate) fn handle(&self, fault: &Fault, meta: &RequestMeta, res: &Response) {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.apply(fault, meta, res)));
        if outcome.is_err() {
            error!(method = %meta.method, path = %meta.path, "error funnel panicked");
            res.status(StatusCode::INTERNAL_SERVER_ERROR).end();
        }
    }

    fn apply(&self, fault: &Fault, meta: &RequestMeta, res: &Response) {
        let status = fault.status();
        let detail = fault.detail();

        if res.is_finished() {
            error!(
                method = %meta.method,
                path = %meta.path,
                status = status.as_u16(),
                error = %detail,
                "failure after response was finalized",
            );
            return;
        }
        res.capture_error(detail.clone());

        match fault.kind() {
            FaultKind::Transport => {
                warn!(method = %meta.method, path = %meta.path, error = %detail, "request aborted");
            }
            _ if status.is_server_error() => match fault.backtrace() {
                Some(backtrace) => error!(
                    method = %meta.method,
                    path = %meta.path,
                    status = status.as_u16(),
                    error = %detail,
                    %backtrace,
                    "handler failed",
                ),
                None => error!(
                    method = %meta.method,
                    path = %meta.path,
                    status = status.as_u16(),
                    error = %detail,
                    "handler failed",
                ),
            },
            _ => {
                debug!(method = %meta.method, path = %meta.path, status = status.as_u16(), error = %detail, "client error");
            }
        }

        res.status(status);
        if self.production && status.is_server_error() {
            res.end();
            return;
        }
        match fault.payload() {
            Payload::Text(text) => res.bytes(ContentType::Text, text.clone()),
            Payload::Json(value) => res.bytes(ContentType::Json, value.to_string()),
            Payload::Binary(bytes) => res.bytes(ContentType::OctetStream, bytes.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::tests::Recorder;
    use bytes::Bytes;
    use http::{Method, header};
    use serde_json::json;

    fn meta() -> RequestMeta {
        RequestMeta { method: Method::POST, path: "/orders".into() }
    }

    fn run(mode: Mode, fault: Fault) -> (Response, Recorder) {
        let recorder = Recorder::default();
        let res = Response::new(Box::new(recorder.clone()));
        ErrorFunnel::new(mode).handle(&fault, &meta(), &res);
        (res, recorder)
    }

    #[test]
    fn text_fault_in_development() {
        let (res, recorder) = run(Mode::Development, Fault::msg("db down"));
        let sent = &recorder.sent()[0];
        assert_eq!(sent.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(sent.body, Bytes::from_static(b"db down"));
        assert_eq!(res.captured_error().as_deref(), Some("db down"));
    }

    #[test]
    fn production_hides_server_error_bodies() {
        let (res, recorder) = run(Mode::Production, Fault::msg("secret stack detail"));
        let sent = &recorder.sent()[0];
        assert_eq!(sent.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(sent.body.is_empty());
        assert_eq!(res.captured_error().as_deref(), Some("secret stack detail"));
    }

    #[test]
    fn production_keeps_client_error_bodies() {
        let (_, recorder) = run(Mode::Production, Fault::bad_request("name is required"));
        assert_eq!(recorder.sent()[0].body, Bytes::from_static(b"name is required"));
    }

    #[test]
    fn json_payload_is_sent_as_json() {
        let fault = Fault::json(StatusCode::UNPROCESSABLE_ENTITY, json!({ "field": "qty" }));
        let (_, recorder) = run(Mode::Development, fault);
        let sent = &recorder.sent()[0];
        assert_eq!(sent.headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(sent.body, Bytes::from_static(br#"{"field":"qty"}"#));
    }

    #[derive(Debug)]
    struct Unprintable;

    impl std::fmt::Display for Unprintable {
        fn fmt(&self, _: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            panic!("cause cannot be formatted")
        }
    }

    impl std::error::Error for Unprintable {}

    #[derive(Debug)]
    struct Wrapped(Unprintable);

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("wrapped")
        }
    }

    impl std::error::Error for Wrapped {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn panic_while_rendering_falls_back_to_bare_500() {
        let fault = Fault::from_error(StatusCode::BAD_GATEWAY, Wrapped(Unprintable));
        let (res, recorder) = run(Mode::Development, fault);

        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(sent[0].body.is_empty());
        assert!(res.captured_error().is_none());
    }

    #[test]
    fn finished_response_is_left_alone() {
        let recorder = Recorder::default();
        let res = Response::new(Box::new(recorder.clone()));
        res.text("done");
        ErrorFunnel::new(Mode::Development).handle(&Fault::msg("late"), &meta(), &res);

        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, StatusCode::OK);
        assert!(res.captured_error().is_none());
    }
}
