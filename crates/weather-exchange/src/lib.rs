//! # Weather Exchange
//!
//! 한국투자증권 (KIS) Open API 커넥터를 제공합니다.
//!
//! - OAuth 2.0 토큰 수명 주기 관리
//! - 시세/지수/뉴스/일봉/등락/거래량 REST 조회
//! - 공유 슬롯 저장소 기반 분산 호출 간격 조율

pub mod error;
pub mod kis;
pub mod throttle;

pub use error::ExchangeError;
pub use kis::{
    tr_id, BreadthParams, CategoryPrice, CategoryPriceParams, KisClient, KisConfig, KisOAuth,
    NewsParams,
};
pub use throttle::RateLimiter;
