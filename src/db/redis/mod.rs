pub mod cache;
pub mod queue;

pub use cache::create_redis_connection;
pub use cache::Cache;
pub use cache::CacheKey;
pub use queue::RedisBroker;
