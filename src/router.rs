//! The route table.
//!
//! Two indexes. Static paths live in a hash map keyed by `"METHOD path"`;
//! patterns with `:name` or `*name` segments are compiled into one matchit
//! tree each and kept per method in registration order. Lookup tries the
//! static index first, then scans the dynamic routes for that method and
//! takes the first match.
//!
//! Paths are normalized on both sides: a trailing slash is stripped and an
//! empty path becomes `/`. Matching is case-sensitive.
//!
//! The table is built during setup and read-only while serving.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;
use tracing::{debug, warn};

use crate::chain::Chain;
use crate::error::ConfigurationError;
use crate::handler::BoxedHandler;

/// Strips one or more trailing slashes and guarantees a leading one.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

/// Introspection handle for a registered route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteHandle {
    method: Method,
    pattern: String,
    normalized: String,
    params: Vec<String>,
    handlers: usize,
}

impl RouteHandle {
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The pattern exactly as it was registered.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Parameter names in the order they appear in the pattern.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn is_dynamic(&self) -> bool {
        !self.params.is_empty()
    }

    /// Number of handlers in the chain.
    pub fn handlers(&self) -> usize {
        self.handlers
    }
}

struct DynamicRoute {
    handle: RouteHandle,
    matcher: MatchitRouter<()>,
    chain: Chain,
}

/// Result of a successful lookup.
pub(crate) struct RouteMatch {
    pub(crate) chain: Chain,
    pub(crate) params: HashMap<String, String>,
    pub(crate) handle: RouteHandle,
}

#[derive(Default)]
pub(crate) struct RouteTable {
    exact: HashMap<String, (RouteHandle, Chain)>,
    dynamic: HashMap<Method, Vec<DynamicRoute>>,
    registered: HashSet<(Method, String)>,
    routes: Vec<RouteHandle>,
}

impl RouteTable {
    pub(crate) fn register(
        &mut self,
        method: Method,
        pattern: &str,
        handlers: Vec<BoxedHandler>,
    ) -> Result<RouteHandle, ConfigurationError> {
        if handlers.is_empty() {
            return Err(ConfigurationError::EmptyChain { method, path: pattern.to_owned() });
        }
        let key = (method.clone(), pattern.to_owned());
        if self.registered.contains(&key) {
            return Err(ConfigurationError::Duplicate { method, path: pattern.to_owned() });
        }

        let normalized = normalize(pattern);
        let compiled = compile(&normalized)?;
        let handle = RouteHandle {
            method: method.clone(),
            pattern: pattern.to_owned(),
            normalized: normalized.clone(),
            params: compiled.params,
            handlers: handlers.len(),
        };
        let chain: Chain = handlers.into();

        if handle.is_dynamic() {
            let mut matcher = MatchitRouter::new();
            matcher
                .insert(compiled.route, ())
                .map_err(|e| ConfigurationError::InvalidPattern {
                    path: pattern.to_owned(),
                    reason: e.to_string(),
                })?;
            let routes = self.dynamic.entry(method.clone()).or_default();
            if let Some(first) = routes.iter().find(|r| r.handle.normalized == normalized) {
                warn!(
                    method = %method,
                    pattern,
                    shadowed_by = first.handle.pattern(),
                    "route normalizes to an already registered pattern; first registration wins",
                );
            } else {
                routes.push(DynamicRoute { handle: handle.clone(), matcher, chain });
            }
        } else {
            let exact_key = exact_key(&method, &normalized);
            if let Some((first, _)) = self.exact.get(&exact_key) {
                warn!(
                    method = %method,
                    pattern,
                    shadowed_by = first.pattern(),
                    "route normalizes to an already registered path; first registration wins",
                );
            } else {
                self.exact.insert(exact_key, (handle.clone(), chain));
            }
        }

        debug!(method = %method, pattern, "route registered");
        self.registered.insert(key);
        self.routes.push(handle.clone());
        Ok(handle)
    }

    pub(crate) fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let path = normalize(path);
        if let Some((handle, chain)) = self.exact.get(&exact_key(method, &path)) {
            return Some(RouteMatch {
                chain: Arc::clone(chain),
                params: HashMap::new(),
                handle: handle.clone(),
            });
        }

        self.dynamic.get(method)?.iter().find_map(|route| {
            let matched = route.matcher.at(&path).ok()?;
            let params = matched
                .params
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            Some(RouteMatch {
                chain: Arc::clone(&route.chain),
                params,
                handle: route.handle.clone(),
            })
        })
    }

    pub(crate) fn routes(&self) -> &[RouteHandle] {
        &self.routes
    }
}

fn exact_key(method: &Method, path: &str) -> String {
    format!("{method} {path}")
}

struct Compiled {
    route: String,
    params: Vec<String>,
}

/// Rewrites `:name` and `*name` segments into matchit syntax and collects the
/// parameter names. Literal braces are escaped.
fn compile(path: &str) -> Result<Compiled, ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidPattern {
        path: path.to_owned(),
        reason,
    };

    let mut params: Vec<String> = Vec::new();
    let mut segments = Vec::new();
    for segment in path.split('/') {
        let (marker, name) = match segment.chars().next() {
            Some(c @ (':' | '*')) => (c, &segment[1..]),
            _ => {
                segments.push(segment.replace('{', "{{").replace('}', "}}"));
                continue;
            }
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid(format!("bad parameter segment `{segment}`")));
        }
        if params.iter().any(|p| p == name) {
            return Err(invalid(format!("parameter `{name}` appears twice")));
        }
        params.push(name.to_owned());
        segments.push(if marker == '*' { format!("{{*{name}}}") } else { format!("{{{name}}}") });
    }

    Ok(Compiled { route: segments.join("/"), params })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::sync;
    use crate::{Flow, Handler};

    fn chain() -> Vec<BoxedHandler> {
        vec![sync(|_: &crate::Input| Flow::Done).into_boxed_handler()]
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("/a/"), "/a");
        assert_eq!(normalize("/a//"), "/a");
        assert_eq!(normalize("a"), "/a");
    }

    #[test]
    fn static_lookup_ignores_trailing_slash() {
        let mut table = RouteTable::default();
        table.register(Method::GET, "/bar", chain()).unwrap();

        assert!(table.resolve(&Method::GET, "/bar").is_some());
        assert!(table.resolve(&Method::GET, "/bar/").is_some());
        assert!(table.resolve(&Method::GET, "/Bar").is_none());
        assert!(table.resolve(&Method::POST, "/bar").is_none());
    }

    #[test]
    fn extracts_parameters() {
        let mut table = RouteTable::default();
        let handle = table.register(Method::GET, "/users/:id/orders/:oid", chain()).unwrap();
        assert_eq!(handle.params(), ["id", "oid"]);

        let found = table.resolve(&Method::GET, "/users/7/orders/99/").unwrap();
        assert_eq!(found.params["id"], "7");
        assert_eq!(found.params["oid"], "99");
    }

    #[test]
    fn static_wins_over_dynamic() {
        let mut table = RouteTable::default();
        table.register(Method::GET, "/users/:id", chain()).unwrap();
        table.register(Method::GET, "/users/me", chain()).unwrap();

        let found = table.resolve(&Method::GET, "/users/me").unwrap();
        assert!(found.params.is_empty());
        assert_eq!(found.handle.pattern(), "/users/me");
    }

    #[test]
    fn dynamic_routes_match_in_registration_order() {
        let mut table = RouteTable::default();
        table.register(Method::GET, "/files/:name", chain()).unwrap();
        table.register(Method::GET, "/:section/:name", chain()).unwrap();

        let found = table.resolve(&Method::GET, "/files/a.txt").unwrap();
        assert_eq!(found.handle.pattern(), "/files/:name");
        let found = table.resolve(&Method::GET, "/docs/intro").unwrap();
        assert_eq!(found.params["section"], "docs");
    }

    #[test]
    fn catch_all_takes_the_rest() {
        let mut table = RouteTable::default();
        table.register(Method::GET, "/static/*path", chain()).unwrap();
        let found = table.resolve(&Method::GET, "/static/css/site.css").unwrap();
        assert_eq!(found.params["path"], "css/site.css");
    }

    #[test]
    fn rejects_duplicates_and_empty_chains() {
        let mut table = RouteTable::default();
        table.register(Method::GET, "/a", chain()).unwrap();

        let err = table.register(Method::GET, "/a", chain()).unwrap_err();
        assert_eq!(err, ConfigurationError::Duplicate { method: Method::GET, path: "/a".into() });
        assert!(table.register(Method::GET, "/a/", chain()).is_ok());
        assert!(table.register(Method::POST, "/a", chain()).is_ok());

        let err = table.register(Method::GET, "/b", Vec::new()).unwrap_err();
        assert!(matches!(err, ConfigurationError::EmptyChain { .. }));
        assert_eq!(table.routes().len(), 3);
    }

    #[test]
    fn dynamic_alias_keeps_first_registration() {
        let mut table = RouteTable::default();
        table.register(Method::GET, "/users/:id", chain()).unwrap();
        let alias = table.register(Method::GET, "/users/:id/", chain()).unwrap();
        assert_eq!(alias.normalized(), "/users/:id");

        let found = table.resolve(&Method::GET, "/users/7/").unwrap();
        assert_eq!(found.handle.pattern(), "/users/:id");
        assert_eq!(table.dynamic[&Method::GET].len(), 1);
        assert_eq!(table.routes().len(), 2);
    }

    #[test]
    fn rejects_bad_patterns() {
        let mut table = RouteTable::default();
        for pattern in ["/users/:", "/users/:id/:id", "/files/*rest/more", "/x/:a-b"] {
            let err = table.register(Method::GET, pattern, chain()).unwrap_err();
            assert!(matches!(err, ConfigurationError::InvalidPattern { .. }), "{pattern}");
        }
    }

    #[test]
    fn literal_braces_are_not_parameters() {
        let mut table = RouteTable::default();
        table.register(Method::GET, "/raw/{x}/:id", chain()).unwrap();
        let found = table.resolve(&Method::GET, "/raw/{x}/5").unwrap();
        assert_eq!(found.params.len(), 1);
        assert_eq!(found.params["id"], "5");
    }
}
