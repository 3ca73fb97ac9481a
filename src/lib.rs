//! gazette: the content pipeline behind a feed reader.
//!
//! Feeds are synced into items, items are chunked and embedded, each user's
//! liked-item embeddings are clustered into an interest profile, and ranked
//! suggestions are cached per user. All work runs as tasks on prioritized
//! Redis queues.
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;
pub mod tasks;

/// Installs the `tracing` subscriber used by both binaries (`RUST_LOG`, default `info`)
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
