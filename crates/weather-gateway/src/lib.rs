//! 시장 날씨 집계 게이트웨이.
//!
//! 이 crate는 시세/매크로 데이터를 모아 시장 날씨 점수를 내는 바이너리를
//! 제공합니다:
//! - 캐시 앞단 시장 데이터 서비스 (시세, 뉴스, 일봉, 등락, ADR)
//! - 거래량 배수 백그라운드 잡
//! - 날씨 점수 계산 및 리포트

pub mod config;
pub mod error;
pub mod market;
pub mod volume_job;
pub mod weather;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use market::MarketDataService;
pub use volume_job::VolumeRatioJob;
pub use weather::{WeatherReport, WeatherService};
