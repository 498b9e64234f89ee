//! Response caching: serve a memoized response for a request URI for a bounded time.
//!
//! [`ResponseCache`] wraps a downstream [`Handler`]. For each `GET` request it looks up
//! the request URI (path and query exactly as received). A fresh entry is answered
//! directly and the downstream handler is not invoked, even if whatever produced the
//! response has since changed or disappeared. A missing or expired entry is fetched
//! from downstream, stored, and returned.
//!
//! ## Semantics worth knowing
//!
//! - Every response is cached, including `404` and `500`. A cached failure is served
//!   for the full TTL like any other entry.
//! - A TTL of zero means entries never expire.
//! - Expired entries are replaced lazily on the next miss for their key.
//!   [`ResponseCache::purge_expired`] reclaims the memory of keys nobody asks for again.
//! - Concurrent misses for the same key each call downstream; whichever finishes last
//!   owns the entry. There is no request coalescing.
//! - An entry is inserted as one value after the downstream future completes. If the
//!   request future is dropped first, the cache is left untouched.
//! - Requests with methods other than `GET` bypass the cache in both directions.
//! - By default the downstream `Cache-Control` header is ignored. With
//!   [`ResponseCache::honor_max_age`] a `max-age=N` directive replaces the
//!   configured TTL for that entry, and `max-age=0` or `no-store` keeps the
//!   response out of the cache.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::handler::{BoxFuture, Handler};
use crate::{Method, Request, Response};

// A stored response plus the data needed to decide whether it is still servable.
#[derive(Debug, Clone)]
struct CacheEntry {
    response: Response,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        self.ttl.is_zero() || now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// A handler that memoizes the responses of the handler it wraps.
///
/// The cache is cheap to share: the entry map lives behind an [`Arc`], and the type
/// is `Send + Sync` whenever the wrapped handler is.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use rttp_chain::cache::ResponseCache;
/// use rttp_chain::files::FileServer;
///
/// let files = FileServer::directory("/var/www");
/// let cached = ResponseCache::new(files, Duration::from_secs(100));
/// assert_eq!(cached.ttl(), Duration::from_secs(100));
/// ```
pub struct ResponseCache<H> {
    inner: H,
    entries: Arc<DashMap<String, CacheEntry>>,
    ttl: Duration,
    honor_max_age: bool,
}

impl<H: Handler> ResponseCache<H> {
    /// Wrap `inner`, caching its responses for `ttl`. `Duration::ZERO` disables expiry.
    pub fn new(inner: H, ttl: Duration) -> Self {
        Self {
            inner,
            entries: Arc::new(DashMap::new()),
            ttl,
            honor_max_age: false,
        }
    }

    /// Same as [`new`](Self::new) with the TTL given in whole seconds.
    pub fn with_ttl_secs(inner: H, ttl_secs: u64) -> Self {
        Self::new(inner, Duration::from_secs(ttl_secs))
    }

    /// Let the downstream `Cache-Control: max-age` decide each entry's lifetime.
    ///
    /// Responses without the directive keep the configured TTL.
    #[must_use]
    pub fn honor_max_age(mut self, honor: bool) -> Self {
        self.honor_max_age = honor;
        self
    }

    /// The TTL applied to entries whose response does not set its own.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry that can no longer be served. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged, remaining = self.entries.len(), "expired cache entries purged");
        }
        purged
    }

    /// Run [`purge_expired`](Self::purge_expired) every `period` on the current
    /// Tokio runtime.
    ///
    /// The task holds only a weak reference and exits once the cache is dropped.
    pub fn purge_every(self: &Arc<Self>, period: Duration) -> JoinHandle<()>
    where
        H: 'static,
    {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticks.tick().await;
            loop {
                ticks.tick().await;
                let Some(cache) = cache.upgrade() else {
                    debug!("cache dropped, purge task exiting");
                    return;
                };
                cache.purge_expired();
            }
        })
    }

    // Clone out a fresh response for `key`. The shard lock is released before returning.
    fn lookup(&self, key: &str) -> Option<Response> {
        let entry = self.entries.get(key)?;
        entry
            .is_fresh(Instant::now())
            .then(|| entry.response.clone())
    }
}

impl<H: Handler> Handler for ResponseCache<H> {
    fn call(&self, request: Request) -> BoxFuture {
        if request.method() != &Method::Get {
            return self.inner.call(request);
        }

        let key = request.uri().to_owned();
        if let Some(response) = self.lookup(&key) {
            debug!(uri = %key, status = response.status().as_u16(), "cache hit");
            return Box::pin(async move { response });
        }

        debug!(uri = %key, "cache miss");
        let pending = self.inner.call(request);
        let entries = Arc::clone(&self.entries);
        let default_ttl = self.ttl;
        let honor_max_age = self.honor_max_age;

        Box::pin(async move {
            let response = pending.await;
            let ttl = match honor_max_age.then(|| declared_lifetime(&response)).flatten() {
                Some(Lifetime::DoNotStore) => {
                    debug!(uri = %key, "response forbids caching");
                    entries.remove(&key);
                    return response;
                }
                Some(Lifetime::MaxAge(max_age)) => max_age,
                None => default_ttl,
            };
            entries.insert(
                key,
                CacheEntry {
                    response: response.clone(),
                    stored_at: Instant::now(),
                    ttl,
                },
            );
            response
        })
    }
}

enum Lifetime {
    MaxAge(Duration),
    DoNotStore,
}

// What the response's own `Cache-Control` says about storing it, if anything.
fn declared_lifetime(response: &Response) -> Option<Lifetime> {
    let mut lifetime = None;
    for value in response.headers().get_all("cache-control") {
        for directive in value.split(',').map(str::trim) {
            if directive.eq_ignore_ascii_case("no-store") {
                return Some(Lifetime::DoNotStore);
            }
            let Some((name, secs)) = directive.split_once('=') else {
                continue;
            };
            if !name.trim().eq_ignore_ascii_case("max-age") {
                continue;
            }
            lifetime = match secs.trim().trim_matches('"').parse::<u64>() {
                Ok(0) => Some(Lifetime::DoNotStore),
                Ok(secs) => Some(Lifetime::MaxAge(Duration::from_secs(secs))),
                Err(_) => continue,
            };
        }
    }
    lifetime
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::StatusCode;
    use crate::handler::from_fn;

    // Downstream that counts its invocations and answers with the call number,
    // so a stale response is distinguishable from a fresh one.
    fn counting() -> (Arc<AtomicUsize>, impl Handler) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let handler = from_fn(move |req: Request| {
            let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Response::new(StatusCode::Ok).body(format!("{} #{n}", req.uri())) }
        });
        (calls, handler)
    }

    fn text(res: &Response) -> &str {
        std::str::from_utf8(res.content()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn hit_within_ttl_skips_downstream() {
        let (calls, downstream) = counting();
        let cache = ResponseCache::with_ttl_secs(downstream, 100);

        let first = cache.call(Request::get("/file.txt")).await;
        tokio::time::advance(Duration::from_secs(99)).await;
        let second = cache.call(Request::get("/file.txt")).await;

        assert_eq!(first, second);
        assert_eq!(text(&second), "/file.txt #1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched_and_replaced() {
        let (calls, downstream) = counting();
        let cache = ResponseCache::with_ttl_secs(downstream, 1);

        cache.call(Request::get("/x")).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        let refreshed = cache.call(Request::get("/x")).await;
        assert_eq!(text(&refreshed), "/x #2");

        // The refreshed entry is served from now on.
        let again = cache.call(Request::get("/x")).await;
        assert_eq!(text(&again), "/x #2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_exactly_at_ttl() {
        let (calls, downstream) = counting();
        let cache = ResponseCache::with_ttl_secs(downstream, 5);

        cache.call(Request::get("/edge")).await;
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.call(Request::get("/edge")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_never_expires() {
        let (calls, downstream) = counting();
        let cache = ResponseCache::new(downstream, Duration::ZERO);

        cache.call(Request::get("/forever")).await;
        tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;
        let res = cache.call(Request::get("/forever")).await;
        assert_eq!(text(&res), "/forever #1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.purge_expired(), 0);
    }

    #[tokio::test]
    async fn query_string_makes_a_distinct_key() {
        let (calls, downstream) = counting();
        let cache = ResponseCache::with_ttl_secs(downstream, 60);

        let plain = cache.call(Request::get("/a")).await;
        let query = cache.call(Request::get("/a?x=1")).await;
        let bare_mark = cache.call(Request::get("/a?")).await;

        assert_eq!(text(&plain), "/a #1");
        assert_eq!(text(&query), "/a?x=1 #2");
        assert_eq!(text(&bare_mark), "/a? #3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_responses_are_cached_too() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let downstream = from_fn(move |_req: Request| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Response::new(StatusCode::NotFound).body("Not found")
                } else {
                    Response::new(StatusCode::Ok).body("now present")
                }
            }
        });
        let cache = ResponseCache::with_ttl_secs(downstream, 10);

        assert_eq!(
            cache.call(Request::get("/late")).await.status(),
            StatusCode::NotFound
        );
        assert_eq!(
            cache.call(Request::get("/late")).await.status(),
            StatusCode::NotFound
        );
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(
            cache.call(Request::get("/late")).await.status(),
            StatusCode::Ok
        );
    }

    #[tokio::test]
    async fn non_get_requests_bypass_the_cache() {
        let (calls, downstream) = counting();
        let cache = ResponseCache::with_ttl_secs(downstream, 60);

        cache.call(Request::new(Method::Post, "/submit")).await;
        cache.call(Request::new(Method::Post, "/submit")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_stale_entries() {
        let (_calls, downstream) = counting();
        let cache = ResponseCache::with_ttl_secs(downstream, 10);

        cache.call(Request::get("/old")).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.call(Request::get("/new")).await;
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        let res = cache.call(Request::get("/new")).await;
        assert_eq!(text(&res), "/new #2");
    }

    #[tokio::test(start_paused = true)]
    async fn max_age_is_ignored_unless_honored() {
        let files = crate::files::FileServer::embedded()
            .with_resource("a.txt", "A")
            .max_age(1);
        let cache = ResponseCache::with_ttl_secs(files, 100);

        cache.call(Request::get("/a.txt")).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.lookup("/a.txt").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn honored_max_age_overrides_ttl() {
        let files = crate::files::FileServer::embedded()
            .with_resource("short.txt", "S")
            .max_age(1);
        let cache = ResponseCache::with_ttl_secs(files, 100).honor_max_age(true);

        cache.call(Request::get("/short.txt")).await;
        assert!(cache.lookup("/short.txt").is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.lookup("/short.txt").is_none());
        assert_eq!(cache.purge_expired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn honored_cache_falls_back_to_ttl_without_directive() {
        let (calls, downstream) = counting();
        let cache = ResponseCache::with_ttl_secs(downstream, 10).honor_max_age(true);

        cache.call(Request::get("/plain")).await;
        tokio::time::advance(Duration::from_secs(9)).await;
        cache.call(Request::get("/plain")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_max_age_and_no_store_are_not_cached() {
        for header in ["max-age=0", "private, no-store"] {
            let (calls, counted) = counting();
            let downstream = from_fn(move |req: Request| {
                let pending = counted.call(req);
                async move {
                    let mut response = pending.await;
                    response.add_header("Cache-Control", header);
                    response
                }
            });
            let cache = ResponseCache::with_ttl_secs(downstream, 60).honor_max_age(true);

            cache.call(Request::get("/volatile")).await;
            cache.call(Request::get("/volatile")).await;
            assert_eq!(calls.load(Ordering::SeqCst), 2, "{header}");
            assert!(cache.is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn purge_task_reclaims_expired_entries() {
        let (_calls, downstream) = counting();
        let cache = Arc::new(ResponseCache::with_ttl_secs(downstream, 1));
        let task = cache.purge_every(Duration::from_secs(5));

        cache.call(Request::get("/gone")).await;
        assert_eq!(cache.len(), 1);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(cache.is_empty());

        drop(cache);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(task.is_finished());
    }

    #[tokio::test]
    async fn dropped_miss_leaves_no_entry() {
        let downstream = from_fn(|_req: Request| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Response::new(StatusCode::Ok)
        });
        let cache = ResponseCache::with_ttl_secs(downstream, 60);

        let pending = cache.call(Request::get("/slow"));
        let outcome = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(outcome.is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_all_get_complete_responses() {
        let (calls, downstream) = counting();
        let cache = Arc::new(ResponseCache::with_ttl_secs(downstream, 60));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.call(Request::get("/shared")).await })
            })
            .collect();

        for task in tasks {
            let res = task.await.unwrap();
            assert_eq!(res.status(), StatusCode::Ok);
            assert!(text(&res).starts_with("/shared #"));
        }
        let n = calls.load(Ordering::SeqCst);
        assert!((1..=16).contains(&n));
        assert_eq!(cache.len(), 1);
    }
}
