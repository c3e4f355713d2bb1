//! 저장소 레이어.

pub mod redis;

pub use redis::{RedisCache, RedisConfig};
