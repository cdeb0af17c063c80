//! # Supplier chain
//!
//! Every entity operation travels down an ordered chain of suppliers. A
//! supplier either answers the request itself (a cache hit) or forwards it,
//! unchanged and with the same hints, to its successor. The last supplier is
//! the backing store.
//!
//! A chain is an immutable arena: the successor of node `i` is node `i + 1`,
//! fixed when the chain is built. Running past the last node yields
//! [`StoreError::Unhandled`].
//!
//! ```rust
//! use async_trait::async_trait;
//! use ouroboros_store::supplier::{Chain, Context, Hint, Next, Request, Supplier};
//! use ouroboros_store::StoreResult;
//!
//! #[derive(Debug)]
//! struct Echo(u32);
//!
//! impl Request for Echo {
//!     type Response = u32;
//!     fn operation(&self) -> &'static str {
//!         "echo"
//!     }
//! }
//!
//! struct Doubler;
//!
//! #[async_trait]
//! impl Supplier<Echo> for Doubler {
//!     async fn handle(&self, _ctx: &Context, req: &Echo, _hints: &[Hint], _next: Next<'_, Echo>) -> StoreResult<u32> {
//!         Ok(req.0 * 2)
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let chain = Chain::builder().push(Doubler).build();
//! assert_eq!(chain.run(&Context::new(), &Echo(21), &[]).await.unwrap(), 42);
//! # });
//! ```

pub mod handle;

pub use handle::{Dispatcher, StoreHandle};

use crate::error::{Result, StoreError};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Advisory flag attached to a call.
///
/// Suppliers act on the hints they understand and pass the rest along.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hint {
    /// Skip cache lookups; the result still refreshes the cache
    BypassCache,
    /// Route reads to the primary instead of a replica
    ForceMaster,
}

impl Hint {
    pub fn is_set(self, hints: &[Hint]) -> bool {
        hints.contains(&self)
    }
}

/// Per-call state shared by every supplier a request passes through
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
}

impl Context {
    /// A context without a deadline
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` without a deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }
}

/// A request type carried by a chain
pub trait Request: fmt::Debug + Send + Sync + 'static {
    type Response: Send + 'static;

    /// Stable name used in logs and errors, e.g. `post.get_single`
    fn operation(&self) -> &'static str;
}

/// One node of a chain
#[async_trait]
pub trait Supplier<R: Request>: Send + Sync {
    /// Answer `req` or forward it with `next.run(ctx, req, hints)`
    async fn handle(
        &self,
        ctx: &Context,
        req: &R,
        hints: &[Hint],
        next: Next<'_, R>,
    ) -> Result<R::Response>;
}

/// The remainder of the chain after the current node
pub struct Next<'a, R: Request> {
    rest: &'a [Arc<dyn Supplier<R>>],
}

impl<'a, R: Request> Next<'a, R> {
    /// Hand the request to the successor
    pub async fn run(self, ctx: &Context, req: &R, hints: &[Hint]) -> Result<R::Response> {
        match self.rest.split_first() {
            Some((head, rest)) => head.handle(ctx, req, hints, Next { rest }).await,
            None => Err(StoreError::Unhandled {
                operation: req.operation(),
            }),
        }
    }

    /// Whether a successor exists
    pub fn is_terminal(&self) -> bool {
        self.rest.is_empty()
    }
}

/// Immutable, ordered list of suppliers
pub struct Chain<R: Request> {
    nodes: Vec<Arc<dyn Supplier<R>>>,
}

impl<R: Request> Chain<R> {
    pub fn builder() -> ChainBuilder<R> {
        ChainBuilder { nodes: Vec::new() }
    }

    /// Run `req` from the head of the chain
    pub async fn run(&self, ctx: &Context, req: &R, hints: &[Hint]) -> Result<R::Response> {
        Next { rest: &self.nodes }.run(ctx, req, hints).await
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<R: Request> fmt::Debug for Chain<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("len", &self.nodes.len()).finish()
    }
}

/// Assembles a chain head first
pub struct ChainBuilder<R: Request> {
    nodes: Vec<Arc<dyn Supplier<R>>>,
}

impl<R: Request> ChainBuilder<R> {
    pub fn push<S: Supplier<R> + 'static>(self, supplier: S) -> Self {
        self.push_shared(Arc::new(supplier))
    }

    /// Append a supplier that is also referenced elsewhere
    pub fn push_shared(mut self, supplier: Arc<dyn Supplier<R>>) -> Self {
        self.nodes.push(supplier);
        self
    }

    pub fn build(self) -> Chain<R> {
        Chain { nodes: self.nodes }
    }
}
