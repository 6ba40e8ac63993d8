//! Cookie parsing and `Set-Cookie` serialization.

use std::collections::HashMap;

use cookie::{Cookie, time::Duration};

pub use cookie::SameSite;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CookieError {
    #[error("invalid cookie name `{0}`")]
    InvalidName(String),

    #[error("invalid value for cookie `{0}`")]
    InvalidValue(String),

    #[error("invalid {attribute} attribute for cookie `{name}`")]
    InvalidAttribute { name: String, attribute: &'static str },

    #[error("cookie `{0}` uses SameSite=None without Secure")]
    SameSiteNoneWithoutSecure(String),
}

/// Parses a `Cookie` request header. The first occurrence of a name wins;
/// malformed pairs are skipped.
pub fn parse(header: &str) -> HashMap<String, String> {
    let mut jar = HashMap::new();
    for cookie in Cookie::split_parse(header).flatten() {
        jar.entry(cookie.name().to_owned())
            .or_insert_with(|| cookie.value().to_owned());
    }
    jar
}

/// A cookie to send back with `Set-Cookie`.
#[derive(Debug, Clone, Default)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age_secs: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into(), ..Self::default() }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn max_age_secs(mut self, secs: i64) -> Self {
        self.max_age_secs = Some(secs);
        self
    }

    pub fn http_only(mut self, on: bool) -> Self {
        self.http_only = on;
        self
    }

    pub fn secure(mut self, on: bool) -> Self {
        self.secure = on;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }
}

/// Renders a `Set-Cookie` header value after validating every field.
pub fn serialize(set: &SetCookie) -> Result<String, CookieError> {
    if set.name.is_empty() || !set.name.bytes().all(is_token_byte) {
        return Err(CookieError::InvalidName(set.name.clone()));
    }
    if !set.value.bytes().all(is_cookie_octet) {
        return Err(CookieError::InvalidValue(set.name.clone()));
    }
    for (attribute, value) in [("path", &set.path), ("domain", &set.domain)] {
        if let Some(value) = value {
            if !value.bytes().all(is_attribute_byte) {
                return Err(CookieError::InvalidAttribute { name: set.name.clone(), attribute });
            }
        }
    }
    if set.same_site == Some(SameSite::None) && !set.secure {
        return Err(CookieError::SameSiteNoneWithoutSecure(set.name.clone()));
    }

    let mut cookie = Cookie::build((set.name.clone(), set.value.clone()))
        .http_only(set.http_only)
        .secure(set.secure);
    if let Some(path) = &set.path {
        cookie = cookie.path(path.clone());
    }
    if let Some(domain) = &set.domain {
        cookie = cookie.domain(domain.clone());
    }
    if let Some(secs) = set.max_age_secs {
        cookie = cookie.max_age(Duration::seconds(secs));
    }
    if let Some(same_site) = set.same_site {
        cookie = cookie.same_site(same_site);
    }
    Ok(cookie.build().to_string())
}

// RFC 6265 §4.1.1
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b)
}

fn is_cookie_octet(b: u8) -> bool {
    matches!(b, 0x21 | 0x23..=0x2B | 0x2D..=0x3A | 0x3C..=0x5B | 0x5D..=0x7E)
}

fn is_attribute_byte(b: u8) -> bool {
    (0x20..0x7F).contains(&b) && b != b';'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_first_value_wins() {
        let jar = parse("session=abc; theme=dark; session=zzz");
        assert_eq!(jar["session"], "abc");
        assert_eq!(jar["theme"], "dark");
    }

    #[test]
    fn serialize_with_options() {
        let header = serialize(
            &SetCookie::new("session", "abc123")
                .path("/")
                .max_age_secs(60)
                .http_only(true)
                .secure(true)
                .same_site(SameSite::Strict),
        )
        .unwrap();

        assert!(header.starts_with("session=abc123"));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("Secure"));
        assert!(header.contains("SameSite=Strict"));
        assert!(header.contains("Path=/"));
        assert!(header.contains("Max-Age=60"));
    }

    #[test]
    fn rejects_illegal_fields() {
        assert_eq!(
            serialize(&SetCookie::new("bad name", "v")),
            Err(CookieError::InvalidName("bad name".into()))
        );
        assert_eq!(
            serialize(&SetCookie::new("ok", "semi;colon")),
            Err(CookieError::InvalidValue("ok".into()))
        );
        assert_eq!(
            serialize(&SetCookie::new("ok", "v").path("/a\u{7}")),
            Err(CookieError::InvalidAttribute { name: "ok".into(), attribute: "path" })
        );
    }

    #[test]
    fn same_site_none_requires_secure() {
        let cookie = SetCookie::new("id", "1").same_site(SameSite::None);
        assert_eq!(
            serialize(&cookie),
            Err(CookieError::SameSiteNoneWithoutSecure("id".into()))
        );
        assert!(serialize(&cookie.secure(true)).is_ok());
    }
}
