//! Serves a directory with a few fixed routes in front of it.
//!
//! ```text
//! cargo run --example static_server -- ./public [config.json]
//! RUST_LOG=rttp_chain=debug cargo run --example static_server -- ./public
//! ```

use std::sync::Arc;
use std::time::Duration;

use rttp_chain::bandwidth::BandwidthMeter;
use rttp_chain::files::FileServer;
use rttp_chain::handler::{Responder, from_fn};
use rttp_chain::pipeline::Pipeline;
use rttp_chain::router::Router;
use rttp_chain::server::Server;
use rttp_chain::{Request, Response, ServerConfig, StatusCode};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let root = args.next().unwrap_or_else(|| ".".to_owned());
    let config = match args.next() {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::from_json_str(r#"{ "cache": { "ttl_secs": 100 } }"#)?,
    };

    let meter = Arc::new(BandwidthMeter::new());
    let stats = Arc::clone(&meter);

    let mut router = Router::new();
    router
        .exact("/health", Responder::new("ok"))?
        .exact(
            "/bandwidth",
            from_fn(move |_req: Request| {
                let body = format!(
                    "sent={} received={}",
                    stats.bytes_sent(),
                    stats.bytes_received()
                );
                async move { Response::new(StatusCode::Ok).body(body) }
            }),
        )?
        .prefix("/", FileServer::directory(root).max_age(100))?;

    let pipeline = Pipeline::from_config(&config, router);
    let _purger = pipeline
        .cache()
        .map(|cache| cache.purge_every(Duration::from_secs(60)));
    let server = Server::from_config(&config).await?.with_meter(meter);

    println!("Listening on http://{}", server.local_addr());
    server
        .run_until(pipeline, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
