//! Ordered interceptor chain wrapping the actual invocation.
//!
//! The chain is a right fold: each filter receives a [`Next`] continuation
//! that runs the rest of the chain and, at the last position, the terminal
//! handler. A filter may run code before calling the continuation, inspect
//! or replace the returned result, or skip the continuation entirely to
//! short-circuit the call.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FrameworkError;
use crate::message::Message;

/// Boxed future returned by a terminal handler.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Bytes, FrameworkError>> + Send + 'a>>;

/// Terminal invocation at the end of a filter chain.
pub trait Handler: Send + Sync {
    /// Runs the invocation with the request bytes, producing response bytes.
    fn call<'a>(&'a self, msg: &'a mut Message, req: Bytes) -> HandlerFuture<'a>;
}

/// Adapter turning a synchronous closure into a [`Handler`].
pub struct FnHandler<F>(pub F);

impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut Message, Bytes) -> Result<Bytes, FrameworkError> + Send + Sync,
{
    fn call<'a>(&'a self, msg: &'a mut Message, req: Bytes) -> HandlerFuture<'a> {
        Box::pin(async move { (self.0)(msg, req) })
    }
}

/// An interceptor in the chain.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Handles the call, usually delegating to `next.run(..)` exactly once.
    async fn handle(
        &self,
        msg: &mut Message,
        req: Bytes,
        next: Next<'_>,
    ) -> Result<Bytes, FrameworkError>;
}

/// Continuation over the remaining filters plus the terminal handler.
pub struct Next<'a> {
    filters: &'a [Arc<dyn Filter>],
    terminal: &'a dyn Handler,
}

impl<'a> Next<'a> {
    /// Runs the rest of the chain.
    pub async fn run(self, msg: &mut Message, req: Bytes) -> Result<Bytes, FrameworkError> {
        match self.filters.split_first() {
            Some((filter, rest)) => {
                let next = Next {
                    filters: rest,
                    terminal: self.terminal,
                };
                filter.handle(msg, req, next).await
            }
            None => self.terminal.call(msg, req).await,
        }
    }
}

/// Ordered filter chain; execution order is registration order.
#[derive(Default, Clone)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter. Filters run in the order they were added.
    pub fn add(&mut self, filter: Arc<dyn Filter>) {
        self.filters.push(filter);
    }

    /// Number of filters in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// True when no filters are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Runs the chain around the terminal handler.
    pub async fn handle(
        &self,
        msg: &mut Message,
        req: Bytes,
        terminal: &dyn Handler,
    ) -> Result<Bytes, FrameworkError> {
        let next = Next {
            filters: &self.filters,
            terminal,
        };
        next.run(msg, req).await
    }
}
