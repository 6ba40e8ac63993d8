//! HTTP transport and graceful shutdown.
//!
//! hyper 1 with the hyper-util auto connection builder (HTTP/1.1, plus HTTP/2
//! when the client negotiates it). Each connection runs in its own task,
//! tracked in a `JoinSet`. Each request is handed to the [`Dispatcher`]
//! together with a oneshot-backed [`Transport`]; the response hyper writes is
//! whatever the dispatcher finalized into it.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C (or the caller's own signal, with
//! [`Server::serve_with_shutdown`]) the server:
//! 1. stops accepting connections;
//! 2. lets every in-flight connection task run to completion;
//! 3. returns, so `main` can exit cleanly.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::app::App;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::fault::Fault;
use crate::handler::CatchUnwind;
use crate::request::IncomingRequest;
use crate::response::{Finalized, Transport};

/// The HTTP server.
pub struct Server {
    addr: String,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called. The address is checked there.
    pub fn bind(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Binds to `[server] bind`.
    pub fn from_config(config: &Config) -> Self {
        Self::bind(config.server.bind.clone())
    }

    /// Starts accepting connections and dispatching them through `app`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, app: App) -> Result<(), Error> {
        let addr: SocketAddr = self
            .addr
            .parse()
            .map_err(|source| Error::Addr { addr: self.addr.clone(), source })?;
        let listener = TcpListener::bind(addr).await?;
        Self::serve_with_shutdown(listener, app, shutdown_signal()).await
    }

    /// Serves on an already bound listener until `signal` resolves, then
    /// drains in-flight connections.
    pub async fn serve_with_shutdown<F>(listener: TcpListener, app: App, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        // One immutable dispatcher shared by every connection task; cloning
        // the Arc is all a new connection costs.
        let dispatcher = Arc::new(app.into_dispatcher());
        info!(addr = %listener.local_addr()?, routes = dispatcher.routes().len(), "restline listening");

        // Every connection task lands here so shutdown can wait on all of them.
        let mut tasks = tokio::task::JoinSet::new();
        // `select!` polls the signal by reference across iterations, so it
        // must stay put in memory.
        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Checked first so a signal stops accepting even with a queue.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let dispatcher = Arc::clone(&dispatcher);
                    // hyper speaks its own IO traits; TokioIo bridges the tokio stream.
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Invoked per request, so keep-alive connections reuse it.
                        let svc = service_fn(move |req| {
                            let dispatcher = Arc::clone(&dispatcher);
                            async move { handle(dispatcher, req).await }
                        });

                        // HTTP/1.1 or HTTP/2, whichever the client negotiates.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            debug!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connections; a long-lived server would
                // otherwise hold every completed task.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Drain before returning: in-flight requests finish their responses.
        while tasks.join_next().await.is_some() {}

        info!("restline stopped");
        Ok(())
    }
}

// ── Request handling ──────────────────────────────────────────────────────────

struct ChannelTransport(oneshot::Sender<Finalized>);

impl Transport for ChannelTransport {
    fn finalize(self: Box<Self>, response: Finalized) {
        if self.0.send(response).is_err() {
            debug!("connection closed before the response was written");
        }
    }
}

/// Reads the body, runs the dispatcher, and converts what it finalized.
///
/// Every failure is handled inside, so hyper never sees an error.
async fn handle(
    dispatcher: Arc<Dispatcher>,
    req: hyper::Request<Incoming>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(Fault::aborted);
    let target = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path(), |pq| pq.as_str());
    let request = IncomingRequest::from_parts(parts.method, target, parts.headers, body);

    let (tx, rx) = oneshot::channel();
    let dispatched = CatchUnwind(Box::pin(dispatcher.dispatch(request, Box::new(ChannelTransport(tx)))));
    if dispatched.await.is_err() {
        error!("dispatcher panicked");
    }

    let response = match rx.await {
        Ok(finalized) => into_http(finalized),
        Err(_) => {
            let mut response = http::Response::new(Full::new(Bytes::new()));
            *response.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    };
    Ok(response)
}

fn into_http(finalized: Finalized) -> http::Response<Full<Bytes>> {
    let Finalized { status, headers, body } = finalized;
    let mut response = http::Response::new(Full::new(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or SIGINT (Ctrl-C). On Windows only Ctrl-C
/// is available. A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    // Never resolves, which disables the arm outside unix.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
