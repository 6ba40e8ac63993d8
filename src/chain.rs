//! Handler chains and the `next` continuation.
//!
//! A chain is an immutable, non-empty slice of handlers shared by every
//! request that hits its route. Progress through it is carried by [`Next`], a
//! value handed to each handler invocation. It is never a field on shared
//! state, so concurrent requests cannot see each other's position.
//!
//! Invariants enforced here:
//! - handlers run strictly in registration order;
//! - once the response is finished (or a handler called `res.error`), no
//!   further handler in the chain is invoked;
//! - a failure is handed to the error funnel exactly once, at the link that
//!   raised it, then propagated upward so awaiting handlers stop too;
//! - calling `next` past the tail is logged and ignored.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::Input;
use crate::handler::{BoxFuture, BoxedHandler};

/// The ordered handlers of one route. Never empty.
pub(crate) type Chain = Arc<[BoxedHandler]>;

/// Continuation into the rest of the chain.
///
/// Call [`run`](Next::run) to delegate to the following handler. Dropping it
/// instead ends the chain at the current handler.
pub struct Next {
    chain: Chain,
    position: usize,
    input: Input,
}

impl Next {
    /// The continuation that invokes the first handler of `chain`.
    pub(crate) fn start(chain: Chain, input: Input) -> Self {
        Self { chain, position: 0, input }
    }

    /// True when there is no handler left to delegate to.
    pub fn is_tail(&self) -> bool {
        self.position >= self.chain.len()
    }

    /// Runs the remainder of the chain.
    ///
    /// Resolves with the downstream failure, if any, after it has already been
    /// funneled into a response. Handlers normally propagate it with `?`.
    pub fn run(self) -> BoxFuture {
        let Next { chain, position, input } = self;
        Box::pin(async move {
            let Some(handler) = chain.get(position).map(Arc::clone) else {
                warn!(position, "next() called on the tail handler; ignored");
                return Ok(());
            };
            if input.res().is_aborted() {
                debug!(position, "response already finalized; skipping handler");
                return Ok(());
            }

            let next = Next {
                chain: Arc::clone(&chain),
                position: position + 1,
                input: input.clone(),
            };
            match handler.call(input.clone(), next).await {
                Ok(()) => Ok(()),
                Err(fault) if fault.funneled => Err(fault),
                Err(mut fault) => {
                    input.funnel(&fault);
                    fault.funneled = true;
                    Err(fault)
                }
            }
        })
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("position", &self.position)
            .field("len", &self.chain.len())
            .finish()
    }
}
