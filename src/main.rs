use std::sync::Arc;
use std::time::Duration;

use gazette::{
    api::{create_router, AppState},
    config::Config,
    db::{create_pool, create_redis_connection, Cache, PgRepository, RedisBroker},
    services::{HttpFeedFetcher, OllamaEmbedder},
    tasks::{Broker, TaskClient, TaskHandler, Worker, WorkerConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gazette::init_tracing();

    let config = Config::from_env()?;

    let pool = create_pool(&config.database_url, config.database_max_connections).await?;
    let redis = create_redis_connection(&config.redis_url).await?;

    let embedder = OllamaEmbedder::new(
        config.ollama_url.clone(),
        Duration::from_secs(config.embed_timeout_secs),
    )?;
    embedder.ensure_model(&config.embeddings_model).await?;

    let broker: Arc<dyn Broker> = Arc::new(RedisBroker::new(redis.clone()));
    let queue = Arc::new(TaskClient::new(Arc::clone(&broker), config.max_retry));
    let handler = TaskHandler::new(
        Arc::new(PgRepository::new(pool)),
        queue,
        Arc::new(Cache::new(redis)),
        Arc::new(embedder),
        Arc::new(HttpFeedFetcher::new(Duration::from_secs(config.feed_timeout_secs))?),
        config.pipeline(),
    );

    let worker = Worker::new(
        Arc::clone(&broker),
        Arc::new(handler),
        WorkerConfig::from_config(&config),
    )
    .start();

    let app = create_router(AppState::new(broker));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Health server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    tracing::info!("Shutting down worker");
    worker.shutdown().await?;
    Ok(())
}
