//! CORS header composition.
//!
//! Runs before route resolution. Cross-origin requests from an allowed origin
//! get `Access-Control-*` headers on the response façade; preflights
//! (`OPTIONS` carrying `Access-Control-Request-Method`) are answered here with
//! `204 No Content` and never reach a handler. Requests from origins outside
//! the allow-list get no CORS headers at all and the browser blocks them.

use http::header::{self, HeaderMap};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::response::Response;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CorsConfig {
    /// Exact origins, or `["*"]` for any origin.
    pub origins: Vec<String>,
    pub methods: Vec<String>,
    /// Allowed request headers. Empty echoes `Access-Control-Request-Headers`.
    pub headers: Vec<String>,
    pub expose: Vec<String>,
    pub credentials: bool,
    pub max_age_secs: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: vec!["*".to_owned()],
            methods: ["GET", "HEAD", "PUT", "PATCH", "POST", "DELETE"]
                .map(str::to_owned)
                .to_vec(),
            headers: Vec::new(),
            expose: Vec::new(),
            credentials: false,
            max_age_secs: None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CorsConfigError {
    #[error("wildcard origin (*) cannot be combined with credentials")]
    WildcardWithCredentials,

    #[error("origins list is empty")]
    EmptyOrigins,
}

impl CorsConfig {
    pub fn validate(&self) -> Result<(), CorsConfigError> {
        if self.origins.is_empty() {
            return Err(CorsConfigError::EmptyOrigins);
        }
        if self.credentials && self.origins.iter().any(|o| o == "*") {
            return Err(CorsConfigError::WildcardWithCredentials);
        }
        Ok(())
    }
}

/// A validated CORS policy.
#[derive(Debug, Clone)]
pub struct Cors {
    config: CorsConfig,
    wildcard: bool,
}

impl Cors {
    pub fn new(config: CorsConfig) -> Result<Self, CorsConfigError> {
        config.validate()?;
        let wildcard = config.origins.iter().any(|o| o == "*");
        Ok(Self { config, wildcard })
    }

    fn allowed_origin<'a>(&self, origin: &'a str) -> Option<&'a str> {
        if self.wildcard {
            Some("*")
        } else if self.config.origins.iter().any(|o| o == origin) {
            Some(origin)
        } else {
            None
        }
    }

    /// Writes CORS headers for this request. Returns `true` when the request
    /// was a preflight and has been answered.
    pub fn apply(&self, method: &Method, headers: &HeaderMap, res: &Response) -> bool {
        let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) else {
            return false;
        };
        let Some(allowed) = self.allowed_origin(origin) else {
            debug!(origin, "cors: origin not allowed");
            return false;
        };

        res.set_header(header::ACCESS_CONTROL_ALLOW_ORIGIN, allowed);
        if !self.wildcard {
            res.append_header(header::VARY, "Origin");
        }
        if self.config.credentials {
            res.set_header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true");
        }

        let preflight = *method == Method::OPTIONS
            && headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);
        if !preflight {
            if !self.config.expose.is_empty() {
                res.set_header(header::ACCESS_CONTROL_EXPOSE_HEADERS, self.config.expose.join(", "));
            }
            return false;
        }

        res.set_header(header::ACCESS_CONTROL_ALLOW_METHODS, self.config.methods.join(", "));
        if self.config.headers.is_empty() {
            if let Some(requested) = headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
                res.set_header(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
            }
        } else {
            res.set_header(header::ACCESS_CONTROL_ALLOW_HEADERS, self.config.headers.join(", "));
        }
        if let Some(max_age) = self.config.max_age_secs {
            res.set_header(header::ACCESS_CONTROL_MAX_AGE, max_age.to_string());
        }
        debug!(origin, "cors: preflight answered");
        res.status(StatusCode::NO_CONTENT).end();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::tests::Recorder;

    fn request(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, value.parse().unwrap());
        }
        headers
    }

    fn exact() -> Cors {
        Cors::new(CorsConfig {
            origins: vec!["https://app.example.com".into()],
            headers: vec!["content-type".into()],
            expose: vec!["x-total".into()],
            credentials: true,
            max_age_secs: Some(600),
            ..CorsConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn rejects_wildcard_with_credentials() {
        let config = CorsConfig { credentials: true, ..CorsConfig::default() };
        assert_eq!(Cors::new(config).unwrap_err(), CorsConfigError::WildcardWithCredentials);
    }

    #[test]
    fn simple_request_from_allowed_origin() {
        let recorder = Recorder::default();
        let res = Response::new(Box::new(recorder.clone()));
        let headers = request(&[("origin", "https://app.example.com")]);

        assert!(!exact().apply(&Method::GET, &headers, &res));
        assert_eq!(res.header(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "https://app.example.com");
        assert_eq!(res.header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(), "true");
        assert_eq!(res.header(header::ACCESS_CONTROL_EXPOSE_HEADERS).unwrap(), "x-total");
        assert_eq!(res.header(header::VARY).unwrap(), "Origin");
        assert!(recorder.sent().is_empty());
    }

    #[test]
    fn preflight_is_answered_with_204() {
        let recorder = Recorder::default();
        let res = Response::new(Box::new(recorder.clone()));
        let headers = request(&[
            ("origin", "https://app.example.com"),
            ("access-control-request-method", "POST"),
        ]);

        assert!(exact().apply(&Method::OPTIONS, &headers, &res));
        let sent = &recorder.sent()[0];
        assert_eq!(sent.status, StatusCode::NO_CONTENT);
        assert_eq!(sent.headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "content-type");
        assert_eq!(sent.headers[header::ACCESS_CONTROL_MAX_AGE], "600");
        assert!(sent.headers[header::ACCESS_CONTROL_ALLOW_METHODS].to_str().unwrap().contains("POST"));
    }

    #[test]
    fn foreign_origin_gets_nothing() {
        let res = Response::new(Box::new(Recorder::default()));
        let headers = request(&[
            ("origin", "https://evil.example"),
            ("access-control-request-method", "POST"),
        ]);

        assert!(!exact().apply(&Method::OPTIONS, &headers, &res));
        assert!(res.header(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert!(!res.is_finished());
    }

    #[test]
    fn wildcard_echoes_requested_headers() {
        let res = Response::new(Box::new(Recorder::default()));
        let headers = request(&[
            ("origin", "https://any.example"),
            ("access-control-request-method", "PUT"),
            ("access-control-request-headers", "x-custom"),
        ]);

        let cors = Cors::new(CorsConfig::default()).unwrap();
        assert!(cors.apply(&Method::OPTIONS, &headers, &res));
        assert_eq!(res.header(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        assert_eq!(res.header(header::ACCESS_CONTROL_ALLOW_HEADERS).unwrap(), "x-custom");
    }
}
