//! Request routing: map request paths to handlers by exact, prefix, or suffix match.
//!
//! This module provides [`Router`], a route table that picks exactly one handler for a
//! request path, or none. Three match kinds are supported:
//!
//! | Kind     | Tag            | Pattern          | Matches                          |
//! |----------|----------------|------------------|----------------------------------|
//! | `Exact`  | `equals:`      | `/perfect-match` | `/perfect-match` only            |
//! | `Prefix` | `startsWith:`  | `/hello-world`   | `/hello-world`, `/hello-world/x` |
//! | `Suffix` | `endsWith:`    | `/the-very-end`  | `/a/b/the-very-end`              |
//!
//! ## Precedence
//!
//! 1. An exact route equal to the path always wins.
//! 2. Otherwise, among prefix and suffix routes that match, the longest pattern wins.
//! 3. Between a prefix and a suffix pattern of the same length, the prefix wins.
//!
//! Registration order never matters. Registering the same kind and pattern twice is
//! rejected with [`RouteError::Duplicate`], so there is no ambiguity left for lookup to
//! resolve.
//!
//! Only the path takes part in matching; the query string and the method are ignored.
//! When nothing matches, [`Router`] answers with `404` and the body `"Not found"`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::handler::{BoxFuture, Handler, SharedHandler};
use crate::{Request, Response, StatusCode};

/// Body of the response returned when no route matches.
pub const NOT_FOUND_BODY: &str = "Not found";

/// How a route's pattern is compared against a request path.
///
/// The declaration order doubles as the tie-break between prefix and suffix routes
/// of equal length: `Prefix` sorts before `Suffix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchKind {
    Exact,
    Prefix,
    Suffix,
}

impl MatchKind {
    /// Tag used for this kind in tagged route keys.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Exact => "equals:",
            Self::Prefix => "startsWith:",
            Self::Suffix => "endsWith:",
        }
    }

    /// Split a tagged route key such as `"startsWith:/hello"` into its kind and pattern.
    ///
    /// A key without a recognised tag is an exact pattern in its entirety, so
    /// `"/a:b"` is the exact path `/a:b`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rttp_chain::router::MatchKind;
    ///
    /// assert_eq!(MatchKind::parse_tagged("endsWith:/end"), (MatchKind::Suffix, "/end"));
    /// assert_eq!(MatchKind::parse_tagged("/plain"), (MatchKind::Exact, "/plain"));
    /// ```
    pub fn parse_tagged(key: &str) -> (MatchKind, &str) {
        [Self::Exact, Self::Prefix, Self::Suffix]
            .into_iter()
            .find_map(|kind| key.strip_prefix(kind.tag()).map(|pattern| (kind, pattern)))
            .unwrap_or((Self::Exact, key))
    }

    fn matches(self, pattern: &str, path: &str) -> bool {
        match self {
            Self::Exact => path == pattern,
            Self::Prefix => path.starts_with(pattern),
            Self::Suffix => path.ends_with(pattern),
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exact => "exact",
            Self::Prefix => "prefix",
            Self::Suffix => "suffix",
        };
        f.write_str(name)
    }
}

/// Errors raised while building a route table. Lookups never fail.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("duplicate {kind} route for pattern {pattern:?}")]
    Duplicate { kind: MatchKind, pattern: String },

    #[error("{kind} route pattern must not be empty")]
    EmptyPattern { kind: MatchKind },
}

/// A registered binding from a match rule to a handler.
#[derive(Clone)]
pub struct Route {
    kind: MatchKind,
    pattern: String,
    handler: SharedHandler,
}

impl Route {
    pub fn kind(&self) -> MatchKind {
        self.kind
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn handler(&self) -> &SharedHandler {
        &self.handler
    }

    // Ordering key among non-exact candidates: longer wins, then Prefix over Suffix.
    fn specificity(&self) -> (usize, std::cmp::Reverse<MatchKind>) {
        (self.pattern.len(), std::cmp::Reverse(self.kind))
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("kind", &self.kind)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Route table dispatching requests by path.
///
/// Build the table with `&mut self` registration calls, then share it behind an
/// [`Arc`]; lookups only read, so concurrent connections need no locking.
///
/// # Examples
///
/// ```rust
/// use rttp_chain::handler::Responder;
/// use rttp_chain::router::{MatchKind, Router};
///
/// let mut router = Router::new();
/// router.prefix("/static", Responder::new("assets")).unwrap();
/// router.exact("/static/index", Responder::new("index")).unwrap();
///
/// assert_eq!(router.route("/static/index").unwrap().kind(), MatchKind::Exact);
/// assert_eq!(router.route("/static/app.js").unwrap().kind(), MatchKind::Prefix);
/// assert!(router.route("/other").is_none());
/// ```
#[derive(Default)]
pub struct Router {
    exact: HashMap<String, Route>,
    // Prefix and suffix routes; scanned in full on every exact miss.
    affix: Vec<Route>,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a router from tagged route keys, as found in route configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`RouteError`] encountered; nothing is partially applied
    /// because the half-built router is dropped.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rttp_chain::handler::{Responder, SharedHandler};
    /// use rttp_chain::router::Router;
    /// use std::sync::Arc;
    ///
    /// let routes: Vec<(&str, SharedHandler)> = vec![
    ///     ("startsWith:/hello-world", Arc::new(Responder::new("hello"))),
    ///     ("endsWith:/the-very-end", Arc::new(Responder::new("end"))),
    /// ];
    /// let router = Router::from_tagged(routes).unwrap();
    /// assert_eq!(router.len(), 2);
    /// ```
    pub fn from_tagged<K, I>(routes: I) -> Result<Self, RouteError>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, SharedHandler)>,
    {
        let mut router = Self::new();
        for (key, handler) in routes {
            router.register_tagged(key.as_ref(), handler)?;
        }
        Ok(router)
    }

    /// Register `handler` for paths matching `pattern` under `kind`.
    ///
    /// # Errors
    ///
    /// - [`RouteError::EmptyPattern`] if `pattern` is empty.
    /// - [`RouteError::Duplicate`] if the same kind and pattern is already registered;
    ///   the existing route is left in place.
    pub fn register(
        &mut self,
        kind: MatchKind,
        pattern: impl Into<String>,
        handler: impl Handler,
    ) -> Result<&mut Self, RouteError> {
        self.insert(kind, pattern.into(), Arc::new(handler))
    }

    /// Register a handler under a tagged key (`equals:`, `startsWith:`, `endsWith:`).
    ///
    /// See [`MatchKind::parse_tagged`] for how untagged keys are treated.
    pub fn register_tagged(
        &mut self,
        key: &str,
        handler: SharedHandler,
    ) -> Result<&mut Self, RouteError> {
        let (kind, pattern) = MatchKind::parse_tagged(key);
        self.insert(kind, pattern.to_owned(), handler)
    }

    /// Register an exact-match route.
    pub fn exact(
        &mut self,
        pattern: impl Into<String>,
        handler: impl Handler,
    ) -> Result<&mut Self, RouteError> {
        self.register(MatchKind::Exact, pattern, handler)
    }

    /// Register a starts-with route.
    pub fn prefix(
        &mut self,
        pattern: impl Into<String>,
        handler: impl Handler,
    ) -> Result<&mut Self, RouteError> {
        self.register(MatchKind::Prefix, pattern, handler)
    }

    /// Register an ends-with route.
    pub fn suffix(
        &mut self,
        pattern: impl Into<String>,
        handler: impl Handler,
    ) -> Result<&mut Self, RouteError> {
        self.register(MatchKind::Suffix, pattern, handler)
    }

    fn insert(
        &mut self,
        kind: MatchKind,
        pattern: String,
        handler: SharedHandler,
    ) -> Result<&mut Self, RouteError> {
        if pattern.is_empty() {
            return Err(RouteError::EmptyPattern { kind });
        }

        let taken = match kind {
            MatchKind::Exact => self.exact.contains_key(&pattern),
            _ => self
                .affix
                .iter()
                .any(|r| r.kind == kind && r.pattern == pattern),
        };
        if taken {
            return Err(RouteError::Duplicate { kind, pattern });
        }

        debug!(%kind, %pattern, "route registered");
        let route = Route {
            kind,
            pattern,
            handler,
        };
        match kind {
            MatchKind::Exact => {
                self.exact.insert(route.pattern.clone(), route);
            }
            _ => self.affix.push(route),
        }
        Ok(self)
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.exact.len() + self.affix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the single best route for `path`, or `None` when nothing matches.
    ///
    /// The result depends only on `path` and the registered routes.
    pub fn route(&self, path: &str) -> Option<&Route> {
        if let Some(route) = self.exact.get(path) {
            return Some(route);
        }

        self.affix
            .iter()
            .filter(|r| r.kind.matches(&r.pattern, path))
            .max_by_key(|r| r.specificity())
    }

    /// The response sent when no route matches: `404` with body `"Not found"`.
    pub fn not_found() -> Response {
        Response::new(StatusCode::NotFound).body(NOT_FOUND_BODY)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("exact", &self.exact.len())
            .field("affix", &self.affix)
            .finish()
    }
}

impl Handler for Router {
    /// Dispatch on `request.path()`, passing the untouched request to the matched handler.
    fn call(&self, request: Request) -> BoxFuture {
        match self.route(request.path()) {
            Some(route) => {
                trace!(
                    path = %request.path(),
                    kind = %route.kind,
                    pattern = %route.pattern,
                    "route matched"
                );
                route.handler.call(request)
            }
            None => {
                debug!(path = %request.path(), "no route matched");
                Box::pin(async { Router::not_found() })
            }
        }
    }
}
