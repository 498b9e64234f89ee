//! Pipeline assembly: compose middleware and an endpoint into one handler.
//!
//! A [`Pipeline`] is what the server runs for every request on every connection.
//! It holds an ordered list of [`Middleware`] layers in front of a single endpoint
//! [`Handler`], typically a [`Router`](crate::router::Router) optionally wrapped in a
//! [`ResponseCache`].
//!
//! ```text
//! request ─▶ layer 0 ─▶ layer 1 ─▶ … ─▶ [ResponseCache] ─▶ endpoint
//! response ◀─────────────────────────────────────────────────┘
//! ```
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by every layer.
//! - [`Next`] — cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`Pipeline`] / [`PipelineBuilder`] — the assembled chain and its builder.
//! - [`LoggerMiddleware`] — built-in request/response logger.
//!
//! Pipelines are cheap to clone; every clone shares the same layers, endpoint, and
//! cache entries. The cache stays reachable through [`Pipeline::cache`] so its
//! expired entries can be reclaimed while the server runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::cache::ResponseCache;
use crate::config::ServerConfig;
use crate::handler::{BoxFuture, Handler, SharedHandler};
use crate::{Request, Response};

/// A cursor into the remaining pipeline for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a layer can forward a request at
/// most once.
///
/// # Examples
///
/// ```rust
/// use rttp_chain::Request;
/// use rttp_chain::handler::BoxFuture;
/// use rttp_chain::pipeline::{Middleware, Next};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(&self, request: Request, next: Next) -> BoxFuture {
///         Box::pin(next.run(request))
///     }
/// }
/// ```
pub struct Next {
    layers: Arc<[Arc<dyn Middleware>]>,
    // Which layer the next `run` call invokes; `layers.len()` means the endpoint.
    index: usize,
    endpoint: SharedHandler,
}

impl Next {
    /// Invoke the next layer, or the endpoint once every layer has run.
    pub async fn run(mut self, request: Request) -> Response {
        match self.layers.get(self.index).cloned() {
            Some(layer) => {
                self.index += 1;
                layer.handle(request, self).await
            }
            None => self.endpoint.call(request).await,
        }
    }
}

/// A pipeline layer that sees every request before the endpoint does.
///
/// Implementors may:
///
/// - **Pass through** — `next.run(request).await` unchanged.
/// - **Short-circuit** — return a [`Response`] without calling `next`.
/// - **Decorate** — call `next`, then adjust the response.
///
/// # Contract
///
/// - Implementations are shared across connections and must be `Send + Sync`.
/// - Do not hold a lock across an `.await` on `next`.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, request: Request, next: Next) -> BoxFuture;
}

/// The assembled chain. Implements [`Handler`], so the server (or another
/// pipeline) can run it directly.
#[derive(Clone)]
pub struct Pipeline {
    layers: Arc<[Arc<dyn Middleware>]>,
    endpoint: SharedHandler,
    cache: Option<Arc<ResponseCache<SharedHandler>>>,
}

impl Pipeline {
    /// Start building a pipeline around `endpoint`.
    pub fn builder(endpoint: impl Handler) -> PipelineBuilder {
        PipelineBuilder {
            layers: Vec::new(),
            endpoint: Arc::new(endpoint),
            cache_ttl: None,
            honor_max_age: false,
        }
    }

    /// Assemble the pipeline described by `config` around `endpoint`.
    ///
    /// Adds [`LoggerMiddleware`] when `log_requests` is set and wraps the endpoint in
    /// a [`ResponseCache`] when a `cache` section is present.
    pub fn from_config(config: &ServerConfig, endpoint: impl Handler) -> Pipeline {
        let mut builder = Pipeline::builder(endpoint);
        if config.log_requests {
            builder = builder.layer(LoggerMiddleware);
        }
        if let Some(cache) = config.cache {
            builder = builder
                .cache(cache.ttl())
                .honor_max_age(cache.honor_max_age);
        }
        builder.build()
    }

    /// Number of middleware layers in front of the endpoint.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// The response cache in front of the endpoint, if one was configured.
    pub fn cache(&self) -> Option<&Arc<ResponseCache<SharedHandler>>> {
        self.cache.as_ref()
    }

    /// Drop expired cache entries. Returns how many were removed; always `0`
    /// without a cache.
    pub fn purge_expired(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| cache.purge_expired())
    }
}

impl Handler for Pipeline {
    fn call(&self, request: Request) -> BoxFuture {
        let next = Next {
            layers: Arc::clone(&self.layers),
            index: 0,
            endpoint: Arc::clone(&self.endpoint),
        };
        Box::pin(next.run(request))
    }
}

/// Builder returned by [`Pipeline::builder`].
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use rttp_chain::handler::Responder;
/// use rttp_chain::pipeline::{LoggerMiddleware, Pipeline};
/// use rttp_chain::router::Router;
///
/// let mut router = Router::new();
/// router.prefix("/hello", Responder::new("hi")).unwrap();
///
/// let pipeline = Pipeline::builder(router)
///     .cache(Duration::from_secs(30))
///     .layer(LoggerMiddleware)
///     .build();
/// assert_eq!(pipeline.depth(), 1);
/// ```
pub struct PipelineBuilder {
    layers: Vec<Arc<dyn Middleware>>,
    endpoint: SharedHandler,
    cache_ttl: Option<Duration>,
    honor_max_age: bool,
}

impl PipelineBuilder {
    /// Append a layer. Layers run in the order they are added.
    #[must_use]
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    /// Wrap the current endpoint in a [`ResponseCache`] with the given TTL.
    ///
    /// The cache always sits directly in front of the endpoint, after every layer,
    /// regardless of where in the builder chain this is called.
    #[must_use]
    pub fn cache(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// See [`ResponseCache::honor_max_age`]. Has no effect without [`cache`](Self::cache).
    #[must_use]
    pub fn honor_max_age(mut self, honor: bool) -> Self {
        self.honor_max_age = honor;
        self
    }

    pub fn build(self) -> Pipeline {
        let cache = self.cache_ttl.map(|ttl| {
            Arc::new(ResponseCache::new(self.endpoint.clone(), ttl).honor_max_age(self.honor_max_age))
        });
        let endpoint = match &cache {
            Some(cache) => Arc::clone(cache) as SharedHandler,
            None => self.endpoint,
        };
        Pipeline {
            layers: self.layers.into(),
            endpoint,
            cache,
        }
    }
}

/// Logs each request's method, URI, status, and duration at `info`.
///
/// ```text
/// GET /hello-world/x - 200 (41.3µs)
/// ```
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, request: Request, next: Next) -> BoxFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = request.method().clone();
            let uri = request.uri().to_owned();

            let response = next.run(request).await;

            tracing::info!(
                "{} {} - {} ({:?})",
                method,
                uri,
                response.status().as_u16(),
                start.elapsed()
            );
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::StatusCode;
    use crate::config::CacheConfig;
    use crate::handler::{Responder, from_fn};

    // Records its name on the way in and appends it to a response header on the way out.
    struct Trace {
        name: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Middleware for Trace {
        fn handle(&self, request: Request, next: Next) -> BoxFuture {
            let name = self.name;
            let seen = Arc::clone(&self.seen);
            Box::pin(async move {
                seen.lock().unwrap().push(name);
                let mut response = next.run(request).await;
                response.add_header("X-Trace", name);
                response
            })
        }
    }

    struct Deny;

    impl Middleware for Deny {
        fn handle(&self, _request: Request, _next: Next) -> BoxFuture {
            Box::pin(async { Response::new(StatusCode::Forbidden) })
        }
    }

    #[tokio::test]
    async fn empty_pipeline_calls_endpoint() {
        let pipeline = Pipeline::builder(Responder::new("endpoint")).build();
        let res = pipeline.call(Request::get("/")).await;
        assert_eq!(res.content().as_ref(), b"endpoint");
        assert_eq!(pipeline.depth(), 0);
    }

    #[tokio::test]
    async fn layers_run_in_order_and_unwind_in_reverse() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder(Responder::new("ok"))
            .layer(Trace {
                name: "outer",
                seen: Arc::clone(&seen),
            })
            .layer(Trace {
                name: "inner",
                seen: Arc::clone(&seen),
            })
            .build();

        let res = pipeline.call(Request::get("/")).await;
        assert_eq!(*seen.lock().unwrap(), vec!["outer", "inner"]);
        let trace: Vec<_> = res.headers().get_all("x-trace").collect();
        assert_eq!(trace, vec!["inner", "outer"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_endpoint() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let endpoint = from_fn(move |_req: Request| {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Response::new(StatusCode::Ok) }
        });
        let pipeline = Pipeline::builder(endpoint).layer(Deny).build();

        let res = pipeline.call(Request::get("/")).await;
        assert_eq!(res.status(), StatusCode::Forbidden);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clones_share_one_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let endpoint = from_fn(move |_req: Request| {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Response::new(StatusCode::Ok).body("cached") }
        });
        let config = ServerConfig {
            cache: Some(CacheConfig {
                ttl_secs: 60,
                honor_max_age: false,
            }),
            ..ServerConfig::default()
        };
        let pipeline = Pipeline::from_config(&config, endpoint);
        let other = pipeline.clone();

        pipeline.call(Request::get("/a")).await;
        other.call(Request::get("/a")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.depth(), 1);
        assert_eq!(other.cache().map(|cache| cache.len()), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_purged_through_the_pipeline() {
        let pipeline = Pipeline::builder(Responder::new("ok"))
            .layer(LoggerMiddleware)
            .cache(Duration::from_secs(10))
            .build();

        pipeline.call(Request::get("/a")).await;
        pipeline.call(Request::get("/b")).await;
        assert_eq!(pipeline.purge_expired(), 0);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(pipeline.purge_expired(), 2);
        assert_eq!(pipeline.cache().map(|cache| cache.is_empty()), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn config_can_defer_to_downstream_max_age() {
        let files = crate::files::FileServer::embedded()
            .with_resource("page.html", "<p>")
            .max_age(1);
        let config = ServerConfig {
            log_requests: false,
            cache: Some(CacheConfig {
                ttl_secs: 100,
                honor_max_age: true,
            }),
            ..ServerConfig::default()
        };
        let pipeline = Pipeline::from_config(&config, files);

        pipeline.call(Request::get("/page.html")).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(pipeline.purge_expired(), 1);
    }

    #[tokio::test]
    async fn config_without_logging_or_cache_is_bare() {
        let config = ServerConfig {
            log_requests: false,
            ..ServerConfig::default()
        };
        let pipeline = Pipeline::from_config(&config, Responder::new("x"));
        assert_eq!(pipeline.depth(), 0);
        assert!(pipeline.cache().is_none());
        assert_eq!(pipeline.purge_expired(), 0);
    }
}
