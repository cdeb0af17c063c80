//! Asynchronous dispatch and single-delivery result handles

use crate::error::{Result, StoreError};
use crate::supplier::{Chain, Context, Hint, Request};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, info_span, warn, Instrument};

/// Result of one store call, delivered exactly once.
///
/// Awaiting the handle yields the call's result. If the worker goes away
/// without answering, the handle resolves to [`StoreError::WorkerLost`].
#[derive(Debug)]
#[must_use = "a store handle does nothing unless awaited"]
pub struct StoreHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> StoreHandle<T> {
    fn pending() -> (oneshot::Sender<Result<T>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// A handle that is already resolved
    pub fn ready(result: Result<T>) -> Self {
        let (tx, handle) = Self::pending();
        // The receiver is alive in `handle`, so the send cannot fail.
        let _ = tx.send(result);
        handle
    }
}

impl<T> Future for StoreHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(StoreError::WorkerLost)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Spawns one worker task per call, bounded by a semaphore
#[derive(Debug)]
pub struct Dispatcher {
    runtime: Handle,
    permits: Arc<Semaphore>,
    default_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl Dispatcher {
    pub fn new(runtime: Handle, max_workers: usize, default_timeout: Option<Duration>) -> Self {
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            default_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Context for a call without an explicit timeout
    pub fn context(&self) -> Context {
        match self.default_timeout {
            Some(timeout) => Context::with_timeout(timeout),
            None => Context::new(),
        }
    }

    /// Workers currently allowed to start
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse new calls; workers still waiting for a permit resolve to
    /// [`StoreError::Closed`]
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.permits.close();
    }

    /// Run `req` through `chain` on a worker and return its handle at once.
    ///
    /// `extract` turns the chain's response into the caller's payload. The
    /// context deadline covers waiting for a permit as well as the chain.
    pub fn dispatch<R, T, F>(
        &self,
        ctx: Context,
        chain: Arc<Chain<R>>,
        req: R,
        hints: Vec<Hint>,
        extract: F,
    ) -> StoreHandle<T>
    where
        R: Request,
        T: Send + 'static,
        F: FnOnce(R::Response) -> Result<T> + Send + 'static,
    {
        if self.is_closed() {
            return StoreHandle::ready(Err(StoreError::Closed));
        }

        let (tx, handle) = StoreHandle::pending();
        let permits = self.permits.clone();
        let operation = req.operation();
        let span = info_span!("store_call", operation);

        self.runtime.spawn(
            async move {
                let started = Instant::now();
                let work = async {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| StoreError::Closed)?;
                    chain.run(&ctx, &req, &hints).await
                };

                let result = match ctx.deadline() {
                    Some(deadline) => match tokio::time::timeout_at(deadline, work).await {
                        Ok(result) => result,
                        Err(_) => {
                            warn!("{} timed out after {:?}", operation, started.elapsed());
                            Err(StoreError::Timeout {
                                elapsed: started.elapsed(),
                                context: operation.to_string(),
                            })
                        }
                    },
                    None => work.await,
                };

                if tx.send(result.and_then(extract)).is_err() {
                    debug!("Caller dropped the handle for {}", operation);
                }
            }
            .instrument(span),
        );

        handle
    }
}
