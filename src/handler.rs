//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! A chain holds handlers of *different* concrete types, so each one is
//! erased behind `dyn ErasedHandler` and stored as an `Arc`. Every handler,
//! whatever its native calling convention, is normalized at registration into
//! the same contract: called with the request's [`Input`] and its [`Next`]
//! continuation, it returns a boxed future resolving to `Result<(), Fault>`.
//!
//! ```text
//! async fn load(input: Input, next: Next) -> Result<(), Fault> { … }
//!        ↓ handlers![load]
//! load.into_boxed_handler()                    ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(load))                    ← stored as BoxedHandler
//!        ↓
//! handler.call(input, next)  at request time   ← one vtable dispatch
//!        ↓
//! CatchUnwind(Box::pin(async { load(..).await.into_outcome() }))
//! ```
//!
//! Synchronous handlers go through [`sync`] and land in the same contract.
//! A panic, whether raised while building the future or while polling it,
//! comes out as a `500` [`Fault`] on the same channel as a returned error.

use std::any::Any;
use std::future::{Future, ready};
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use crate::chain::Next;
use crate::context::Input;
use crate::fault::Fault;

// ── Internal types ────────────────────────────────────────────────────────────

/// The uniform deferred completion every handler is normalized into.
pub type BoxFuture = Pin<Box<dyn Future<Output = Result<(), Fault>> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, input: Input, next: Next) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Outcomes ─────────────────────────────────────────────────────────────────

/// What an async handler may resolve to: `()` or `Result<(), E>` where `E`
/// converts into a [`Fault`].
pub trait IntoOutcome {
    fn into_outcome(self) -> Result<(), Fault>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Result<(), Fault> {
        Ok(())
    }
}

impl<E: Into<Fault>> IntoOutcome for Result<(), E> {
    fn into_outcome(self) -> Result<(), Fault> {
        self.map_err(Into::into)
    }
}

/// What a synchronous handler decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the next handler in the chain.
    Next,
    /// Stop here.
    Done,
}

pub trait IntoFlow {
    fn into_flow(self) -> Result<Flow, Fault>;
}

impl IntoFlow for Flow {
    fn into_flow(self) -> Result<Flow, Fault> {
        Ok(self)
    }
}

impl IntoFlow for () {
    fn into_flow(self) -> Result<Flow, Fault> {
        Ok(Flow::Done)
    }
}

impl<E: Into<Fault>> IntoFlow for Result<Flow, E> {
    fn into_flow(self) -> Result<Flow, Fault> {
        self.map_err(Into::into)
    }
}

impl<E: Into<Fault>> IntoFlow for Result<(), E> {
    fn into_flow(self) -> Result<Flow, Fault> {
        self.map(|()| Flow::Done).map_err(Into::into)
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied by any
///
/// ```text
/// async fn name(input: Input, next: Next) -> ()  |  Result<(), E: Into<Fault>>
/// ```
///
/// and by synchronous functions wrapped with [`sync`]. The trait is sealed.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Input, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Input, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Builds an ordered handler chain for registration.
///
/// ```rust,ignore
/// app.get("/users/:id", handlers![authenticate, load_user, render])?;
/// ```
#[macro_export]
macro_rules! handlers {
    ($($handler:expr),* $(,)?) => {
        ::std::vec![$($crate::Handler::into_boxed_handler($handler)),*]
    };
}

// ── Async functions ───────────────────────────────────────────────────────────

struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Input, Next) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + 'static,
{
    fn call(&self, input: Input, next: Next) -> BoxFuture {
        // Building the future runs user code too: a non-`async` fn returning
        // a future can panic before it is ever polled.
        match catch_unwind(AssertUnwindSafe(|| (self.0)(input, next))) {
            Ok(fut) => {
                let fut: BoxFuture = Box::pin(async move { fut.await.into_outcome() });
                Box::pin(async move {
                    CatchUnwind(fut).await.unwrap_or_else(|panic| Err(Fault::from_panic(panic)))
                })
            }
            Err(panic) => Box::pin(ready(Err(Fault::from_panic(panic)))),
        }
    }
}

// ── Synchronous functions ─────────────────────────────────────────────────────

/// A synchronous handler. Construct with [`sync`].
pub struct SyncHandler<F, R> {
    f: F,
    _returns: PhantomData<fn() -> R>,
}

/// Wraps a synchronous function as a handler.
///
/// The function sees the request by reference and returns a [`Flow`] (or
/// `()`, or a `Result` of either). `Flow::Next` continues the chain.
///
/// ```rust,ignore
/// let require_token = sync(|input: &Input| {
///     if input.header("authorization").is_none() {
///         input.res().error(StatusCode::UNAUTHORIZED, "missing token");
///         return Flow::Done;
///     }
///     Flow::Next
/// });
/// ```
pub fn sync<F, R>(f: F) -> SyncHandler<F, R>
where
    F: Fn(&Input) -> R + Send + Sync + 'static,
    R: IntoFlow + 'static,
{
    SyncHandler { f, _returns: PhantomData }
}

impl<F, R> private::Sealed for SyncHandler<F, R>
where
    F: Fn(&Input) -> R + Send + Sync + 'static,
    R: IntoFlow + 'static,
{
}

impl<F, R> Handler for SyncHandler<F, R>
where
    F: Fn(&Input) -> R + Send + Sync + 'static,
    R: IntoFlow + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(self)
    }
}

impl<F, R> ErasedHandler for SyncHandler<F, R>
where
    F: Fn(&Input) -> R + Send + Sync + 'static,
    R: IntoFlow + 'static,
{
    fn call(&self, input: Input, next: Next) -> BoxFuture {
        let flow = catch_unwind(AssertUnwindSafe(|| (self.f)(&input).into_flow()))
            .unwrap_or_else(|panic| Err(Fault::from_panic(panic)));
        match flow {
            Ok(Flow::Next) => next.run(),
            Ok(Flow::Done) => Box::pin(ready(Ok(()))),
            Err(fault) => Box::pin(ready(Err(fault))),
        }
    }
}

// ── Panic capture ─────────────────────────────────────────────────────────────

/// Polls the inner future under `catch_unwind`.
pub(crate) struct CatchUnwind<F>(pub(crate) F);

impl<F> Future for CatchUnwind<F>
where
    F: Future + Unpin,
{
    type Output = Result<F::Output, Box<dyn Any + Send>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let inner = &mut self.0;
        match catch_unwind(AssertUnwindSafe(|| Pin::new(inner).poll(cx))) {
            Ok(Poll::Ready(output)) => Poll::Ready(Ok(output)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(panic) => Poll::Ready(Err(panic)),
        }
    }
}
