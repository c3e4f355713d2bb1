//! 게이트웨이 에러 타입 정의.

use thiserror::Error;
use weather_data::DataError;
use weather_exchange::ExchangeError;

/// 게이트웨이 에러 타입
#[derive(Error, Debug)]
pub enum GatewayError {
    /// 시세 API 에러
    #[error("시세 API 오류: {0}")]
    Exchange(#[from] ExchangeError),

    /// 데이터/캐시 계층 에러
    #[error("데이터 계층 오류: {0}")]
    Data(#[from] DataError),

    /// 설정 에러
    #[error("설정 오류: {0}")]
    Config(String),

    /// 응답을 도메인 타입으로 바꾸지 못한 경우
    #[error("데이터 형식 오류: {0}")]
    InvalidData(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, GatewayError>;
