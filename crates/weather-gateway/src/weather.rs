//! 시장 날씨 점수 계산과 리포트 조립.
//!
//! 점수 계산은 순수 함수로 분리되어 있고, `WeatherService`가 다섯 가지
//! 입력(KOSPI 등락률, VKOSPI, 공포탐욕 지수, ADR, 거래량 배수)을 동시에
//! 모아 리포트를 만듭니다. 일부 입력이 빠져도 남은 입력만으로 점수를
//! 내고, 빠진 이유는 `partial_errors`에 남깁니다.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use weather_core::domain::{
    FetchOutcome, QuoteSnapshot, SentimentReading, VkospiOpening, VolumeRatio, WeatherBand,
};
use weather_data::{AdrInfoSnapshot, AdrScraper, CnnFetcher, VkospiResolver};

use crate::config::{GatewayConfig, ScorerConfig};
use crate::market::MarketDataService;

/// 심리 중립 구간 하한.
const NEUTRAL_LOW: f64 = 25.0;
/// 심리 중립 구간 상한.
const NEUTRAL_HIGH: f64 = 75.0;
/// 수급 모멘텀 강세 기준 (배수).
const MOMENTUM_HIGH: f64 = 1.2;
/// 수급 모멘텀 약세 기준 (배수).
const MOMENTUM_LOW: f64 = 0.8;

/// 점수 계산 입력. 모든 값은 없을 수 있습니다.
#[derive(Debug, Clone, Default)]
pub struct WeatherInputs {
    /// KOSPI 전일 대비 등락률 (%)
    pub index_change: Option<f64>,
    /// VKOSPI 시가
    pub vkospi: Option<f64>,
    /// 공포탐욕 지수 (0–100)
    pub sentiment_score: Option<f64>,
    /// ADR 배수 (1.0 = 상승/하락 동수)
    pub adr_multiple: Option<f64>,
    /// 거래량 배수 (1.0 = 평균 수준)
    pub volume_multiple: Option<f64>,
}

/// 구성 요소별 점수.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreComponents {
    /// 지수 등락률 점수 (0–100)
    pub index: Option<f64>,
    /// 변동성 점수 (0–100)
    pub volatility: Option<f64>,
    /// 심리 점수 (0–100, 수급 모멘텀 반영)
    pub sentiment: Option<f64>,
}

/// 점수 계산 결과.
#[derive(Debug, Clone, Serialize)]
pub struct WeatherScore {
    /// 0–100 정수로 반올림한 가중 평균 점수. 입력이 전혀 없으면 `None`.
    pub score: Option<u32>,
    pub band: WeatherBand,
    pub components: ScoreComponents,
}

/// 리포트에 담는 원본 입력.
#[derive(Debug, Serialize)]
pub struct RawInputs {
    pub kospi: Option<QuoteSnapshot>,
    pub vkospi: Option<VkospiOpening>,
    pub sentiment: Option<SentimentReading>,
    pub adr: Option<AdrInfoSnapshot>,
    pub volume_ratio: Option<VolumeRatio>,
}

/// 시장 날씨 리포트.
#[derive(Debug, Serialize)]
pub struct WeatherReport {
    pub score: Option<u32>,
    pub band: WeatherBand,
    pub label: String,
    pub description: String,
    pub components: ScoreComponents,
    pub inputs: RawInputs,
    /// 입력별 실패 사유 (점수는 남은 입력으로 계산)
    pub partial_errors: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

/// 날씨 점수 계산 (순수 함수).
pub fn compute_weather_score(inputs: &WeatherInputs, weights: &ScorerConfig) -> WeatherScore {
    let index = inputs.index_change.map(index_score);
    let volatility = inputs.vkospi.map(volatility_score);
    let sentiment = inputs.sentiment_score.map(|s| {
        sentiment_score(s, inputs.adr_multiple, inputs.volume_multiple)
    });

    let mut weighted_sum = 0.0;
    let mut weight_sum = 0.0;
    for (value, weight) in [
        (index, weights.index_weight),
        (volatility, weights.vkospi_weight),
        (sentiment, weights.sentiment_weight),
    ] {
        if let Some(v) = value {
            weighted_sum += v * weight;
            weight_sum += weight;
        }
    }

    // 구간 매핑 전에 0–100 정수로 고정한다
    let score = if weight_sum > 0.0 {
        Some((weighted_sum / weight_sum).clamp(0.0, 100.0).round() as u32)
    } else {
        None
    };
    let band = match score {
        Some(s) => WeatherBand::from_score(s as f64),
        None => WeatherBand::Unknown,
    };

    WeatherScore {
        score,
        band,
        components: ScoreComponents {
            index,
            volatility,
            sentiment,
        },
    }
}

/// 지수 등락률 점수. -3% 이하 0점, +3% 이상 100점, 사이 구간 선형.
fn index_score(change: f64) -> f64 {
    (change + 3.0).clamp(0.0, 6.0) * 100.0 / 6.0
}

/// 변동성 점수. VKOSPI 10 이하 100점, 40 이상 0점, 사이 구간 선형.
fn volatility_score(vkospi: f64) -> f64 {
    ((40.0 - vkospi) * 100.0 / 30.0).clamp(0.0, 100.0)
}

/// 심리 점수.
///
/// 중립 구간(25–75) 밖이면 원점수를 그대로 씁니다. 구간 안에서는 ADR과
/// 거래량 배수가 둘 다 강세(≥1.2)면 75, 둘 다 약세(≤0.8)면 25로 당기고,
/// 모멘텀이 엇갈리면 원점수를 유지합니다.
fn sentiment_score(raw: f64, adr: Option<f64>, volume: Option<f64>) -> f64 {
    if raw <= NEUTRAL_LOW || raw >= NEUTRAL_HIGH {
        return raw;
    }
    match (adr, volume) {
        (Some(a), Some(v)) if a >= MOMENTUM_HIGH && v >= MOMENTUM_HIGH => NEUTRAL_HIGH,
        (Some(a), Some(v)) if a <= MOMENTUM_LOW && v <= MOMENTUM_LOW => NEUTRAL_LOW,
        _ => raw,
    }
}

/// 날씨 리포트 서비스.
pub struct WeatherService {
    market: Arc<MarketDataService>,
    vkospi: Option<VkospiResolver>,
    cnn: CnnFetcher,
    adr: AdrScraper,
    config: GatewayConfig,
}

impl WeatherService {
    /// 새 서비스 생성. KRX 키가 없으면 VKOSPI 입력은 비워둡니다.
    pub fn new(
        market: Arc<MarketDataService>,
        vkospi: Option<VkospiResolver>,
        cnn: CnnFetcher,
        adr: AdrScraper,
        config: GatewayConfig,
    ) -> Self {
        Self {
            market,
            vkospi,
            cnn,
            adr,
            config,
        }
    }

    /// 다섯 입력을 동시에 모아 리포트 생성.
    ///
    /// 모멘텀 확인용 ADR은 adrinfo.kr 스크레이퍼 값입니다. 등락 종목 수
    /// 기반 ADR 집계(`fetch_adr`)는 별도 조회 용도로 남아 있습니다.
    pub async fn fetch(&self) -> WeatherReport {
        let (kospi, vkospi, sentiment, adr, volume_ratio) = tokio::join!(
            self.market.fetch_kospi_quote(),
            self.fetch_vkospi(),
            self.cnn.fetch(false),
            self.adr.fetch(false),
            self.market.cached_volume_ratio(),
        );

        let mut partial_errors = Vec::new();
        let kospi = take_input("kospi", kospi, &mut partial_errors);
        let vkospi = take_input("vkospi", vkospi, &mut partial_errors);
        let sentiment = take_input("sentiment", sentiment, &mut partial_errors);
        let adr = take_input("adr", adr, &mut partial_errors);
        if volume_ratio.is_none() {
            partial_errors.push("volume: 거래량 배수 캐시 없음 (잡 미실행)".to_string());
        }

        let inputs = WeatherInputs {
            index_change: kospi.as_ref().and_then(|q| q.pct_change),
            vkospi: vkospi.as_ref().and_then(|v| v.opening_price),
            sentiment_score: sentiment.as_ref().map(|s| s.score),
            adr_multiple: adr.as_ref().map(|a| a.adr / 100.0),
            volume_multiple: volume_ratio.as_ref().map(|v| v.ratio / 100.0),
        };
        let score = compute_weather_score(&inputs, &self.config.scorer);

        info!(
            score = ?score.score,
            band = ?score.band,
            partial_errors = partial_errors.len(),
            "시장 날씨 계산 완료"
        );

        WeatherReport {
            score: score.score,
            band: score.band,
            label: score.band.label().to_string(),
            description: score.band.description().to_string(),
            components: score.components,
            inputs: RawInputs {
                kospi,
                vkospi,
                sentiment,
                adr,
                volume_ratio,
            },
            partial_errors,
            fetched_at: Utc::now(),
        }
    }

    async fn fetch_vkospi(&self) -> FetchOutcome<VkospiOpening> {
        match &self.vkospi {
            Some(resolver) => match resolver.fetch_opening(None).await {
                Ok(opening) => FetchOutcome::Fresh(opening),
                Err(e) => FetchOutcome::failed(e.to_string()),
            },
            None => FetchOutcome::failed("KRX API 키 미설정"),
        }
    }
}

/// 입력 결과에서 값을 꺼내고, 실패면 사유를 기록.
fn take_input<T>(
    name: &str,
    outcome: FetchOutcome<T>,
    errors: &mut Vec<String>,
) -> Option<T> {
    if let Some(message) = outcome.failure_message() {
        errors.push(format!("{}: {}", name, message));
    }
    outcome.into_value()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> ScorerConfig {
        ScorerConfig {
            index_weight: 0.45,
            vkospi_weight: 0.30,
            sentiment_weight: 0.25,
        }
    }

    #[test]
    fn test_index_score_linear() {
        assert_eq!(index_score(0.0), 50.0);
        assert_eq!(index_score(3.0), 100.0);
        assert_eq!(index_score(-3.0), 0.0);
        assert_eq!(index_score(10.0), 100.0);
        assert_eq!(index_score(-10.0), 0.0);
    }

    #[test]
    fn test_volatility_score_linear() {
        assert_eq!(volatility_score(10.0), 100.0);
        assert_eq!(volatility_score(40.0), 0.0);
        assert_eq!(volatility_score(25.0), 50.0);
        assert_eq!(volatility_score(5.0), 100.0);
        assert_eq!(volatility_score(60.0), 0.0);
    }

    #[test]
    fn test_sentiment_momentum_pull() {
        // 중립 구간 안, 수급 동반 강세 → 75로 상향
        assert_eq!(sentiment_score(50.0, Some(1.3), Some(1.5)), 75.0);
        // 동반 약세 → 25로 하향
        assert_eq!(sentiment_score(50.0, Some(0.7), Some(0.6)), 25.0);
        // 엇갈린 모멘텀은 원점수 유지
        assert_eq!(sentiment_score(50.0, Some(1.3), Some(0.7)), 50.0);
        // 배수 미상이면 유지
        assert_eq!(sentiment_score(50.0, None, Some(1.5)), 50.0);
        // 중립 구간 밖은 그대로
        assert_eq!(sentiment_score(80.0, Some(0.5), Some(0.5)), 80.0);
        assert_eq!(sentiment_score(20.0, Some(1.5), Some(1.5)), 20.0);
    }

    #[test]
    fn test_score_single_input() {
        let inputs = WeatherInputs {
            index_change: Some(0.0),
            ..WeatherInputs::default()
        };
        let result = compute_weather_score(&inputs, &weights());
        // 지수 입력만 있으면 가중치가 정규화되어 그대로 50점
        assert_eq!(result.score, Some(50));
        assert_eq!(result.band, WeatherBand::Neutral);
        assert_eq!(result.components.index, Some(50.0));
        assert_eq!(result.components.volatility, None);
    }

    #[test]
    fn test_score_all_inputs() {
        let inputs = WeatherInputs {
            index_change: Some(3.0),
            vkospi: Some(10.0),
            sentiment_score: Some(100.0),
            adr_multiple: None,
            volume_multiple: None,
        };
        let result = compute_weather_score(&inputs, &weights());
        assert_eq!(result.score, Some(100));
        assert_eq!(result.band, WeatherBand::ExtremeGreed);
    }

    #[test]
    fn test_score_no_inputs() {
        let result = compute_weather_score(&WeatherInputs::default(), &weights());
        assert_eq!(result.score, None);
        assert_eq!(result.band, WeatherBand::Unknown);
    }

    #[test]
    fn test_weighted_average() {
        let inputs = WeatherInputs {
            index_change: Some(0.0),  // 50점 × 0.45
            vkospi: Some(10.0),       // 100점 × 0.30
            sentiment_score: None,
            adr_multiple: None,
            volume_multiple: None,
        };
        let result = compute_weather_score(&inputs, &weights());
        // (50 × 0.45 + 100 × 0.30) / 0.75 = 70
        assert_eq!(result.score, Some(70));
    }

    #[test]
    fn test_score_rounded_before_band_mapping() {
        // 원점수 85.33은 반올림한 85로 구간을 정해야 한다 (greed)
        let inputs = WeatherInputs {
            index_change: Some(2.12),
            ..WeatherInputs::default()
        };
        let result = compute_weather_score(&inputs, &weights());
        assert_eq!(result.score, Some(85));
        assert_eq!(result.band, WeatherBand::Greed);

        // 85.5는 86으로 올라가 extreme_greed
        let inputs = WeatherInputs {
            index_change: Some(2.13),
            ..WeatherInputs::default()
        };
        let result = compute_weather_score(&inputs, &weights());
        assert_eq!(result.score, Some(86));
        assert_eq!(result.band, WeatherBand::ExtremeGreed);
    }

    #[test]
    fn test_scraped_adr_drives_momentum() {
        // adrinfo.kr가 준 ADR 130%는 배수 1.3으로 모멘텀 확인에 들어간다
        let snapshot = AdrInfoSnapshot {
            adr: 130.0,
            source: "adrinfo.kr".to_string(),
            label_time: None,
            scraped_at: Utc::now(),
        };
        let inputs = WeatherInputs {
            sentiment_score: Some(50.0),
            adr_multiple: Some(snapshot.adr / 100.0),
            volume_multiple: Some(1.4),
            ..WeatherInputs::default()
        };
        let result = compute_weather_score(&inputs, &weights());
        assert_eq!(result.components.sentiment, Some(75.0));
    }
}
