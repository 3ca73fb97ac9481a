pub mod cache;
pub mod postgres;
pub mod redis;
pub mod repository;

pub use cache::SuggestionStore;
pub use postgres::{create_pool, PgRepository};
pub use redis::create_redis_connection;
pub use redis::Cache;
pub use redis::CacheKey;
pub use redis::RedisBroker;
pub use repository::Repository;
