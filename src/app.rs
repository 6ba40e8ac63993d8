//! The registration surface.
//!
//! ```rust,no_run
//! use restline::{App, Config, Input, Next, Server, handlers};
//!
//! async fn hello(input: Input, _next: Next) {
//!     input.res().text("hello");
//! }
//!
//! # async fn run() -> Result<(), restline::Error> {
//! let mut app = App::new(Config::default())?;
//! app.get("/hello", handlers![hello])?;
//! Server::bind("127.0.0.1:3000").serve(app).await
//! # }
//! ```

use std::sync::Arc;

use http::Method;
use serde_json::Value;

use crate::chain::Chain;
use crate::config::{Config, ConfigError, ValidationError};
use crate::context::{Exposed, Shared};
use crate::cors::Cors;
use crate::dispatcher::Dispatcher;
use crate::error::ConfigurationError;
use crate::handler::BoxedHandler;
use crate::router::{RouteHandle, RouteTable};

/// An application under construction: routes, shared values, configuration.
pub struct App {
    table: RouteTable,
    config: Config,
    exposed: Exposed,
    fallback: Option<Chain>,
    cors: Option<Cors>,
}

impl App {
    /// Applies the `RESTLINE_MODE` override, validates `config`, and starts an
    /// empty application.
    pub fn new(mut config: Config) -> Result<Self, ConfigError> {
        config.apply_env();
        config.validate().map_err(ConfigError::Validation)?;
        let cors = match &config.cors {
            Some(cors) => Some(
                Cors::new(cors.clone())
                    .map_err(|e| ConfigError::Validation(vec![ValidationError::Cors(e.to_string())]))?,
            ),
            None => None,
        };
        Ok(Self {
            table: RouteTable::default(),
            config,
            exposed: Exposed::default(),
            fallback: None,
            cors,
        })
    }

    /// Registers `handlers` for `method` on `path`.
    ///
    /// Fails on an empty chain, an already registered `(method, path)`, or a
    /// malformed parameter segment.
    pub fn route(
        &mut self,
        method: Method,
        path: &str,
        handlers: Vec<BoxedHandler>,
    ) -> Result<RouteHandle, ConfigurationError> {
        self.table.register(method, path, handlers)
    }

    pub fn get(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> Result<RouteHandle, ConfigurationError> {
        self.route(Method::GET, path, handlers)
    }

    pub fn post(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> Result<RouteHandle, ConfigurationError> {
        self.route(Method::POST, path, handlers)
    }

    pub fn put(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> Result<RouteHandle, ConfigurationError> {
        self.route(Method::PUT, path, handlers)
    }

    pub fn patch(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> Result<RouteHandle, ConfigurationError> {
        self.route(Method::PATCH, path, handlers)
    }

    pub fn delete(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> Result<RouteHandle, ConfigurationError> {
        self.route(Method::DELETE, path, handlers)
    }

    pub fn head(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> Result<RouteHandle, ConfigurationError> {
        self.route(Method::HEAD, path, handlers)
    }

    pub fn options(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> Result<RouteHandle, ConfigurationError> {
        self.route(Method::OPTIONS, path, handlers)
    }

    /// Publishes a value to every request, readable through
    /// [`Input::value`](crate::Input::value) and [`Input::exposed`](crate::Input::exposed).
    pub fn expose(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.exposed.set(key, value);
        self
    }

    /// Replaces the default 404 with a chain run for unmatched requests.
    pub fn fallback(&mut self, handlers: Vec<BoxedHandler>) -> Result<&mut Self, ConfigurationError> {
        if handlers.is_empty() {
            return Err(ConfigurationError::EmptyChain {
                method: Method::GET,
                path: "<fallback>".to_owned(),
            });
        }
        self.fallback = Some(handlers.into());
        Ok(self)
    }

    pub fn routes(&self) -> &[RouteHandle] {
        self.table.routes()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Freezes the application into a dispatcher.
    pub fn into_dispatcher(self) -> Dispatcher {
        let shared = Shared { exposed: self.exposed, config: Arc::new(self.config) };
        Dispatcher::new(self.table, self.fallback, self.cors, shared)
    }
}
