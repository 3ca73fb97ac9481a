use std::sync::Arc;

use gazette::{
    config::Config,
    db::{create_redis_connection, RedisBroker},
    tasks::{Broker, Scheduler, TaskClient},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gazette::init_tracing();

    let config = Config::from_env()?;
    let redis = create_redis_connection(&config.redis_url).await?;

    let broker: Arc<dyn Broker> = Arc::new(RedisBroker::new(redis));
    let queue = Arc::new(TaskClient::new(Arc::clone(&broker), config.max_retry));
    let scheduler = Scheduler::from_config(&config, broker, queue).start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down scheduler");
    scheduler.shutdown().await?;
    Ok(())
}
