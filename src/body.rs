//! Request body parsing by declared content type.
//!
//! The transport hands over the raw bytes; this module decides what they mean.
//! Parsing happens once, before the chain runs, so every handler sees the same
//! [`Body`].

use std::collections::HashMap;

use bytes::Bytes;
use http::StatusCode;
use mime::Mime;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A parsed request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    Json(Value),
    /// `application/x-www-form-urlencoded`, first value per key wins.
    Form(HashMap<String, String>),
    Text(String),
    Raw(Bytes),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn form(&self, key: &str) -> Option<&str> {
        match self {
            Self::Form(fields) => fields.get(key).map(String::as_str),
            _ => None,
        }
    }

    /// Deserializes a JSON or form body into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ParseError> {
        match self {
            Self::Json(value) => T::deserialize(value).map_err(ParseError::Json),
            Self::Form(fields) => {
                let value = serde_json::to_value(fields).map_err(ParseError::Json)?;
                T::deserialize(value).map_err(ParseError::Json)
            }
            _ => Err(ParseError::NotStructured),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed content-type `{0}`")]
    ContentType(String),

    #[error("unsupported media type `{0}`")]
    Unsupported(String),

    #[error("invalid JSON body: {0}")]
    Json(#[source] serde_json::Error),

    #[error("invalid form body: {0}")]
    Form(#[source] serde_urlencoded::de::Error),

    #[error("text body is not valid UTF-8")]
    Utf8(#[source] std::str::Utf8Error),

    #[error("body is not JSON or form data")]
    NotStructured,
}

impl ParseError {
    /// Client-facing status for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unsupported(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Parses `bytes` according to `content_type`.
///
/// Without a content type the bytes are kept raw.
pub fn parse(bytes: Bytes, content_type: Option<&str>) -> Result<Body, ParseError> {
    if bytes.is_empty() {
        return Ok(Body::Empty);
    }
    let Some(raw) = content_type else {
        return Ok(Body::Raw(bytes));
    };
    let mime: Mime = raw
        .parse()
        .map_err(|_| ParseError::ContentType(raw.to_owned()))?;

    let top = mime.type_();
    if top == mime::APPLICATION
        && (mime.subtype() == mime::JSON || mime.suffix() == Some(mime::JSON))
    {
        serde_json::from_slice(&bytes).map(Body::Json).map_err(ParseError::Json)
    } else if top == mime::APPLICATION && mime.subtype() == mime::WWW_FORM_URLENCODED {
        parse_form(&bytes).map(Body::Form)
    } else if top == mime::TEXT {
        std::str::from_utf8(&bytes)
            .map(|text| Body::Text(text.to_owned()))
            .map_err(ParseError::Utf8)
    } else if top == mime::MULTIPART {
        Err(ParseError::Unsupported(mime.essence_str().to_owned()))
    } else {
        Ok(Body::Raw(bytes))
    }
}

fn parse_form(bytes: &[u8]) -> Result<HashMap<String, String>, ParseError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(bytes).map_err(ParseError::Form)?;
    Ok(first_wins(pairs))
}

/// Parses a raw query string (without `?`). First value per key wins;
/// an unparseable query yields no parameters.
pub fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return HashMap::new();
    };
    match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
        Ok(pairs) => first_wins(pairs),
        Err(e) => {
            tracing::debug!("unparseable query string ignored: {e}");
            HashMap::new()
        }
    }
}

fn first_wins(pairs: Vec<(String, String)>) -> HashMap<String, String> {
    let mut map = HashMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        map.entry(key).or_insert(value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn json_body() {
        let body = parse(Bytes::from_static(br#"{"name":"alice"}"#), Some("application/json; charset=utf-8")).unwrap();
        assert_eq!(body.as_json(), Some(&json!({ "name": "alice" })));
    }

    #[test]
    fn vendor_json_suffix() {
        let body = parse(Bytes::from_static(b"[1,2]"), Some("application/vnd.api+json")).unwrap();
        assert_eq!(body, Body::Json(json!([1, 2])));
    }

    #[test]
    fn form_body_first_value_wins() {
        let body = parse(Bytes::from_static(b"a=1&b=two+words&a=3"), Some("application/x-www-form-urlencoded")).unwrap();
        assert_eq!(body.form("a"), Some("1"));
        assert_eq!(body.form("b"), Some("two words"));
    }

    #[test]
    fn text_and_raw() {
        let body = parse(Bytes::from_static(b"hello"), Some("text/plain")).unwrap();
        assert_eq!(body.as_text(), Some("hello"));

        let body = parse(Bytes::from_static(b"\x00\x01"), Some("application/octet-stream")).unwrap();
        assert_eq!(body, Body::Raw(Bytes::from_static(b"\x00\x01")));

        let body = parse(Bytes::from_static(b"abc"), None).unwrap();
        assert_eq!(body, Body::Raw(Bytes::from_static(b"abc")));

        assert_eq!(parse(Bytes::new(), Some("application/json")).unwrap(), Body::Empty);
    }

    #[test]
    fn client_errors() {
        let err = parse(Bytes::from_static(b"{nope"), Some("application/json")).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = parse(Bytes::from_static(b"x"), Some("not a mime")).unwrap_err();
        assert!(matches!(err, ParseError::ContentType(_)));

        let err = parse(Bytes::from_static(b"--b"), Some("multipart/form-data; boundary=b")).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let err = parse(Bytes::from_static(b"\xff\xfe"), Some("text/plain")).unwrap_err();
        assert!(matches!(err, ParseError::Utf8(_)));
    }

    #[test]
    fn deserialize_typed() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct User {
            name: String,
        }
        let body = parse(Bytes::from_static(b"name=bob"), Some("application/x-www-form-urlencoded")).unwrap();
        assert_eq!(body.deserialize::<User>().unwrap(), User { name: "bob".into() });
        assert!(Body::Text("x".into()).deserialize::<User>().is_err());
    }

    #[test]
    fn query_first_value_wins() {
        let query = parse_query(Some("page=2&sort=asc&page=9"));
        assert_eq!(query["page"], "2");
        assert_eq!(query["sort"], "asc");
        assert!(parse_query(None).is_empty());
        assert!(parse_query(Some("")).is_empty());
    }
}
