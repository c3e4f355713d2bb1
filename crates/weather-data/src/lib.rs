//! 시장 데이터 수집 및 캐시 계층.
//!
//! Redis 캐시와 외부 공급자(KRX, CNN Fear & Greed, adrinfo.kr)를
//! 제공합니다. 시세 API 접근은 weather-exchange가 담당합니다.

pub mod error;
pub mod provider;
pub mod storage;

pub use error::{DataError, Result};
pub use provider::{
    AdrConfig, AdrInfoSnapshot, AdrScraper, CnnConfig, CnnFetcher, KrxConfig, VkospiResolver,
};
pub use storage::{RedisCache, RedisConfig};
