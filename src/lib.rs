//! # rttp-chain
//!
//! An async HTTP/1.1 handler chain: path routing with fixed precedence, and a TTL
//! response cache that can sit in front of any handler.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use rttp_chain::files::FileServer;
//! use rttp_chain::handler::Responder;
//! use rttp_chain::pipeline::{LoggerMiddleware, Pipeline};
//! use rttp_chain::router::Router;
//! use rttp_chain::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.exact("/health", Responder::new("ok"))?;
//!     router.prefix("/static", FileServer::directory("./public"))?;
//!
//!     let pipeline = Pipeline::builder(router)
//!         .layer(LoggerMiddleware)
//!         .cache(Duration::from_secs(100))
//!         .build();
//!
//!     Server::bind("127.0.0.1:8080").await?.run(pipeline).await?;
//!     Ok(())
//! }
//! ```

pub mod bandwidth;
pub mod cache;
pub mod config;
pub mod files;
pub mod handler;
pub mod http;
pub mod pipeline;
pub mod router;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::ResponseCache;
pub use config::{ConfigError, ServerConfig};
pub use handler::{Handler, SharedHandler};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{MatchKind, RouteError, Router};
pub use server::{Server, ServerError};
