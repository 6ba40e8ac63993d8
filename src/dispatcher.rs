//! The dispatcher: one inbound request in, exactly one finalized response out.
//!
//! ```text
//! IncomingRequest
//!   ├─ body read failed?      → error funnel (400, logged at warn)
//!   ├─ CORS preflight?        → 204
//!   ├─ route table lookup     → miss: fallback chain, or 404 with empty body
//!   ├─ body parse             → failure: error funnel (400 / 415)
//!   ├─ build Input
//!   └─ run chain via Next     → failures funneled at the link that raised them
//! ```
//!
//! Whatever happens above, the response is finalized before `dispatch`
//! returns. A chain that resolves without finalizing is logged and closed
//! with the current status and an empty body.

use std::collections::HashMap;
use std::sync::Arc;

use http::StatusCode;
use http::header::CONTENT_TYPE;
use tracing::{Instrument, Span, debug, info_span, warn};

use crate::body::{self, Body};
use crate::chain::{Chain, Next};
use crate::context::{self, Parts, RequestMeta, Shared};
use crate::cors::Cors;
use crate::fault::Fault;
use crate::funnel::ErrorFunnel;
use crate::request::IncomingRequest;
use crate::response::{Response, Transport};
use crate::router::{RouteHandle, RouteTable};

/// Drives requests through the route table and handler chains.
///
/// Built by [`App::into_dispatcher`](crate::App::into_dispatcher). Immutable
/// and shareable across tasks.
pub struct Dispatcher {
    table: RouteTable,
    fallback: Option<Chain>,
    cors: Option<Cors>,
    shared: Shared,
    funnel: ErrorFunnel,
}

impl Dispatcher {
    pub(crate) fn new(
        table: RouteTable,
        fallback: Option<Chain>,
        cors: Option<Cors>,
        shared: Shared,
    ) -> Self {
        let funnel = ErrorFunnel::new(shared.config.mode);
        Self { table, fallback, cors, shared, funnel }
    }

    pub fn routes(&self) -> &[RouteHandle] {
        self.table.routes()
    }

    /// Serves one request, finalizing into `transport` exactly once.
    pub async fn dispatch(&self, request: IncomingRequest, transport: Box<dyn Transport>) {
        let span = info_span!("request", method = %request.method, path = %request.path);
        let res = Response::new(transport);
        let meta = RequestMeta { method: request.method.clone(), path: request.path.clone() };
        res.attach_funnel(self.funnel, meta);

        self.run(request, res.clone()).instrument(span.clone()).await;

        span.in_scope(|| {
            if !res.is_finished() {
                warn!("chain completed without finalizing the response; sending empty body");
                res.end();
            }
            debug!(status = res.status_code().as_u16(), "request finished");
        });
    }

    async fn run(&self, request: IncomingRequest, res: Response) {
        let IncomingRequest { method, path, query, headers, body } = request;
        let meta = RequestMeta { method, path };

        let bytes = match body {
            Ok(bytes) => bytes,
            Err(fault) => return self.funnel.handle(&fault, &meta, &res),
        };

        if let Some(cors) = &self.cors {
            if cors.apply(&meta.method, &headers, &res) {
                return;
            }
        }

        let (chain, params) = match self.table.resolve(&meta.method, &meta.path) {
            Some(found) => {
                debug!(route = found.handle.pattern(), "route matched");
                (found.chain, found.params)
            }
            None => match &self.fallback {
                Some(chain) => (Arc::clone(chain), HashMap::new()),
                None => {
                    debug!("no route matched");
                    res.status(StatusCode::NOT_FOUND).end();
                    return;
                }
            },
        };

        let body = if self.shared.config.body.parse {
            let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
            match body::parse(bytes, content_type) {
                Ok(body) => body,
                Err(e) => {
                    let fault = Fault::from_error(e.status(), e);
                    return self.funnel.handle(&fault, &meta, &res);
                }
            }
        } else if bytes.is_empty() {
            Body::Empty
        } else {
            Body::Raw(bytes)
        };

        let parts = Parts { meta, headers, query, params, body };
        let input = context::build(parts, &self.shared, res, Span::current());
        if let Err(fault) = Next::start(chain, input).run().await {
            debug!(status = fault.status().as_u16(), "chain ended with a failure");
        }
    }
}
