//! 한국투자증권 (KIS) Open API 커넥터.
//!
//! 시세/지수/뉴스 조회 전용입니다. 모든 호출은 tr_id 이름의 슬롯을
//! 조율기에서 획득한 뒤 나갑니다.

pub mod auth;
pub mod client;
pub mod config;

pub use auth::{KisOAuth, TokenState};
pub use client::{
    BreadthParams, CategoryPrice, CategoryPriceParams, KisClient, NewsParams,
};
pub use config::KisConfig;

/// KIS 거래 ID (tr_id) 상수 모음.
///
/// 거래 ID는 모든 API 호출에서 작업 유형을 식별하기 위해 필요합니다.
pub mod tr_id {
    /// 국내 주식 현재가 조회
    pub const KR_PRICE: &str = "FHKST01010100";
    /// 국내 지수 현재가 조회
    pub const KR_INDEX_PRICE: &str = "FHPUP02100000";
    /// 종목 뉴스 제목 조회
    pub const KR_NEWS_TITLE: &str = "FHKST01011800";
    /// 국내 주식 기간별 시세 조회
    pub const KR_DAILY_CHART: &str = "FHKST03010100";
    /// 업종별 지수 시세 조회
    pub const KR_INDEX_CATEGORY_PRICE: &str = "FHPUP02140000";
    /// 업종 일자별 지수 조회 (등락/거래량)
    pub const KR_INDEX_DAILY_PRICE: &str = "FHPUP02120000";
}
