//! Distributed rate-limit backend and degraded-mode selection.
//! `RedisRateLimitStore` keeps fixed windows in Redis; `FallbackRateLimitStore`
//! routes to the in-process store whenever Redis is unreachable.

pub mod fallback;
pub mod redis_store;

pub use fallback::FallbackRateLimitStore;
pub use redis_store::{RedisConfigError, RedisRateLimitStore, RedisSettings};
