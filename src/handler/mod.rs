//! The handler contract shared by every stage of the chain.
//!
//! A [`Handler`] consumes a [`Request`] and produces a [`Response`]. The router,
//! the response cache, the file server, the pipeline, and plain async closures
//! all implement it, so any of them can be the downstream of any other.
//!
//! Downstream failures are responses too (a file server answers a missing file
//! with `404`), so the contract has no error channel: whatever a handler returns
//! is passed back up the chain unchanged.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{Request, Response, StatusCode};

/// Boxed, `Send` future resolving to a [`Response`].
///
/// The future owns everything it touches, so it can be moved onto another
/// Tokio task or held across an `.await` in the connection loop.
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// A pipeline stage that turns a request into a response.
///
/// # Contract
///
/// - Implementations are shared across connections and must be `Send + Sync`.
/// - `call` must not block; slow work belongs inside the returned future.
/// - The returned future must not borrow `self`. Clone whatever `Arc`s the
///   future needs before boxing it.
pub trait Handler: Send + Sync + 'static {
    /// Handle `request`, producing the response future.
    fn call(&self, request: Request) -> BoxFuture;
}

/// Type-erased, cheaply-cloneable handler reference.
///
/// The router stores its handlers this way, so several routes (or several
/// routers) can point at the same handler without owning it.
pub type SharedHandler = Arc<dyn Handler>;

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn call(&self, request: Request) -> BoxFuture {
        (**self).call(request)
    }
}

/// Adapter returned by [`from_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wraps an async closure as a [`Handler`].
///
/// # Examples
///
/// ```rust
/// use rttp_chain::handler::from_fn;
/// use rttp_chain::{Request, Response, StatusCode};
///
/// let echo = from_fn(|req: Request| async move {
///     Response::new(StatusCode::Ok).body(req.uri().to_owned())
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    FnHandler { f }
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, request: Request) -> BoxFuture {
        Box::pin((self.f)(request))
    }
}

/// Answers every request with `200 OK` and a fixed body.
///
/// # Examples
///
/// ```rust
/// use rttp_chain::handler::Responder;
///
/// let hello = Responder::new("startsWith:/hello-world");
/// assert_eq!(hello.text(), "startsWith:/hello-world");
/// ```
#[derive(Debug, Clone)]
pub struct Responder {
    response: Response,
    text: Arc<str>,
}

impl Responder {
    pub fn new(text: impl Into<String>) -> Self {
        let text: String = text.into();
        Self {
            response: Response::new(StatusCode::Ok).body(text.clone()),
            text: text.into(),
        }
    }

    /// The body this responder writes.
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Handler for Responder {
    fn call(&self, _request: Request) -> BoxFuture {
        let response = self.response.clone();
        Box::pin(async move { response })
    }
}
