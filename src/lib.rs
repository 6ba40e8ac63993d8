//! # restline
//!
//! A lightweight REST framework. You register routes, each with an ordered
//! chain of handlers; restline matches requests, builds a per-request
//! [`Input`], runs the chain with an explicit [`Next`] continuation, and
//! funnels every failure through one policy so each request gets exactly one
//! response.
//!
//! ## Pipeline
//!
//! - Route table: static paths in a hash map, `:param` / `*rest` patterns in
//!   matchit trees scanned in registration order. Static wins.
//! - Handler chain: `async fn(Input, Next)`; call `next.run().await` to
//!   delegate, finalize `input.res()` to answer, return `Err` to fail.
//! - Error funnel: logs by fault kind, hides 5xx bodies in production mode,
//!   never writes twice.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use restline::{App, Config, Fault, Input, Next, Server, StatusCode, handlers};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), restline::Error> {
//!     let config = Config::default();
//!     restline::logging::init(&config.log)?;
//!
//!     let mut app = App::new(config)?;
//!     app.get("/users/:id", handlers![authenticate, get_user])?;
//!     app.post("/users", handlers![authenticate, create_user])?;
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await
//! }
//!
//! async fn authenticate(input: Input, next: Next) -> Result<(), Fault> {
//!     if input.header("authorization").is_none() {
//!         input.res().error(StatusCode::UNAUTHORIZED, "missing credentials");
//!         return Ok(());
//!     }
//!     next.run().await
//! }
//!
//! async fn get_user(input: Input, _next: Next) -> Result<(), Fault> {
//!     let id = input.param("id").unwrap_or("unknown");
//!     input.res().json(&serde_json::json!({ "id": id }))
//! }
//!
//! async fn create_user(input: Input, _next: Next) -> Result<(), Fault> {
//!     let name = input
//!         .body()
//!         .as_json()
//!         .and_then(|v| v["name"].as_str())
//!         .ok_or_else(|| Fault::bad_request("name is required"))?;
//!     input.res()
//!         .status(StatusCode::CREATED)
//!         .set_header("location", "/users/99")
//!         .json(&serde_json::json!({ "id": 99, "name": name }))
//! }
//! ```

mod app;
mod chain;
mod context;
mod dispatcher;
mod error;
mod fault;
mod funnel;
mod handler;
mod request;
mod response;
mod router;
mod server;

pub mod body;
pub mod config;
pub mod cookies;
pub mod cors;
pub mod logging;

pub use app::App;
pub use body::Body;
pub use chain::Next;
pub use config::{Config, Mode};
pub use context::{Exposed, Flash, Input, RESERVED, RequestMeta};
pub use cookies::{SameSite, SetCookie};
pub use cors::{Cors, CorsConfig};
pub use dispatcher::Dispatcher;
pub use error::{ConfigurationError, Error};
pub use fault::{Fault, FaultKind, Payload, ResultExt};
pub use handler::{BoxFuture, BoxedHandler, Flow, Handler, IntoFlow, IntoOutcome, SyncHandler, sync};
pub use request::IncomingRequest;
pub use response::{ContentType, Finalized, Response, Transport};
pub use router::{RouteHandle, normalize};
pub use server::Server;

pub use http::{Method, StatusCode};
