//! 시장 날씨 도메인 모델.
//!
//! 집계 레이어 전반에서 주고받는 값 객체들입니다. 모두 생성 후 변경되지
//! 않으며, 캐시에 JSON으로 직렬화되어 저장됩니다. 제공자별로 신뢰할 수
//! 없는 컬럼은 `Option`으로 표현합니다.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 단일 종목/지수 시세 스냅샷.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    /// 종목코드 또는 지수 이름
    pub ticker: String,
    /// 조회 시각 (UTC)
    pub ts: DateTime<Utc>,
    /// 현재가
    pub last_price: f64,
    /// 전일 대비 등락률 (%)
    pub pct_change: Option<f64>,
    /// 누적 거래량
    pub volume: Option<f64>,
    /// 데이터 출처
    pub provider: String,
}

/// 일봉 종가 한 건.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    /// 영업일
    pub date: NaiveDate,
    /// 종가
    pub close: f64,
}

/// 지수 일별 등락 종목 수 집계.
///
/// 상승/하락/상한/하한 네 값이 모두 비어 있으면 사용할 수 없는 행으로
/// 취급해 버립니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreadthRow {
    /// 영업일 (`YYYYMMDD`)
    pub date: String,
    /// 상승 종목 수
    pub advance: Option<f64>,
    /// 하락 종목 수
    pub decline: Option<f64>,
    /// 보합 종목 수
    pub unchanged: Option<f64>,
    /// 상한가 종목 수
    pub upper: Option<f64>,
    /// 하한가 종목 수
    pub lower: Option<f64>,
}

impl BreadthRow {
    /// 집계에 사용할 수 있는 행인지 확인.
    pub fn is_usable(&self) -> bool {
        self.advance.is_some()
            || self.decline.is_some()
            || self.upper.is_some()
            || self.lower.is_some()
    }
}

/// 지수 일별 거래량 한 건.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumePoint {
    /// 영업일 (`YYYYMMDD`)
    pub date: String,
    /// 누적 거래량
    pub volume: f64,
}

/// 거래량 배수 계산 결과 (백그라운드 잡이 생산).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRatio {
    /// 당일 거래량 / 평균 거래량 × 100
    pub ratio: f64,
    /// 당일 누적 거래량
    pub volume: f64,
    /// 전일 거래량
    pub prev_volume: Option<f64>,
    /// 조회 구간 평균 거래량 (> 0 보장)
    pub avg_volume: f64,
    /// 평균에 사용한 영업일 수
    pub history_days: usize,
    /// 계산 시각
    pub fetched_at: DateTime<Utc>,
}

/// ADR (등락비율) 집계 결과.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdrSummary {
    /// sum_advance / sum_decline × 100. 하락 종목이 0이면 비율이
    /// 정의되지 않으므로 `None` (0으로 나누지 않음).
    pub adr_ratio: Option<f64>,
    /// 구간 내 상승 종목 수 합
    pub sum_advance: f64,
    /// 구간 내 하락 종목 수 합
    pub sum_decline: f64,
    /// 사용한 영업일 수
    pub days_used: usize,
    /// 구간 시작일
    pub first_date: Option<String>,
    /// 구간 종료일
    pub last_date: Option<String>,
}

/// VKOSPI 시가 조회 결과.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VkospiOpening {
    /// 데이터를 찾은 (또는 탐색을 끝낸) 영업일
    pub business_date: String,
    /// 시가. fallback 예산 안에서 찾지 못하면 `None`.
    pub opening_price: Option<f64>,
    /// 매칭된 지수 식별자
    pub matched_index_id: Option<String>,
    /// 시도한 날짜 목록 (진단용)
    pub fallback_trail: Vec<String>,
}

/// 공포탐욕 지수 직전 종가.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentPrevious {
    pub score: Option<f64>,
    pub rating: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// 정규화된 심리 지표.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentReading {
    /// 0–100 점수
    pub score: f64,
    /// 등급 문자열 (예: "fear", "greed")
    pub rating: Option<String>,
    /// 지표 산출 시각
    pub timestamp: Option<DateTime<Utc>>,
    /// 직전 종가
    pub previous_close: Option<SentimentPrevious>,
}

/// 시장 날씨 구간.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherBand {
    ExtremeFear,
    Fear,
    Neutral,
    Greed,
    ExtremeGreed,
    Unknown,
}

impl WeatherBand {
    /// 0–100 점수를 구간으로 매핑.
    pub fn from_score(score: f64) -> Self {
        if score <= 15.0 {
            Self::ExtremeFear
        } else if score <= 35.0 {
            Self::Fear
        } else if score <= 65.0 {
            Self::Neutral
        } else if score <= 85.0 {
            Self::Greed
        } else {
            Self::ExtremeGreed
        }
    }

    /// 구간 이모지 라벨.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ExtremeFear => "😱🔵",
            Self::Fear => "😟🟢",
            Self::Neutral => "🙂⚪",
            Self::Greed => "😎🟠",
            Self::ExtremeGreed => "🔥🔴",
            Self::Unknown => "😐⚪",
        }
    }

    /// 구간 설명.
    pub fn description(&self) -> &'static str {
        match self {
            Self::ExtremeFear => "극단적인 침체 구간이에요.",
            Self::Fear => "시장 분위기가 다소 침체되어 있어요.",
            Self::Neutral => "시장이 비교적 안정적으로 보입니다.",
            Self::Greed => "시장에 긍정적인 열기가 감도는 중이에요.",
            Self::ExtremeGreed => "과열 구간입니다. 과도한 낙관에 주의하세요.",
            Self::Unknown => "데이터가 부족해 시장 기온을 계산할 수 없어요.",
        }
    }
}

/// 제공자 조회 결과 봉투.
///
/// 모든 공개 fetch 진입점은 예외를 전파하는 대신 이 타입으로 성공 /
/// 캐시 적중 / 스테일 fallback / 실패를 구분해 돌려줍니다.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum FetchOutcome<T> {
    /// 제공자에서 방금 가져온 값
    Fresh(T),
    /// 신선도 창 안의 캐시 값
    Cached(T),
    /// 신선도 창을 넘긴 캐시 값 (라이브 조회 실패 후 fallback)
    Stale(T),
    /// 반환할 값 없음
    Failed { message: String },
}

impl<T> FetchOutcome<T> {
    /// 실패 결과 생성.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// 값 참조 (실패면 `None`).
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Fresh(v) | Self::Cached(v) | Self::Stale(v) => Some(v),
            Self::Failed { .. } => None,
        }
    }

    /// 값 소유권 반환 (실패면 `None`).
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Fresh(v) | Self::Cached(v) | Self::Stale(v) => Some(v),
            Self::Failed { .. } => None,
        }
    }

    /// 값이 있는 결과인지 확인.
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// 스테일 fallback 여부.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }

    /// 실패 메시지 (성공이면 `None`).
    pub fn failure_message(&self) -> Option<&str> {
        match self {
            Self::Failed { message } => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_boundaries() {
        assert_eq!(WeatherBand::from_score(0.0), WeatherBand::ExtremeFear);
        assert_eq!(WeatherBand::from_score(15.0), WeatherBand::ExtremeFear);
        assert_eq!(WeatherBand::from_score(16.0), WeatherBand::Fear);
        assert_eq!(WeatherBand::from_score(35.0), WeatherBand::Fear);
        assert_eq!(WeatherBand::from_score(50.0), WeatherBand::Neutral);
        assert_eq!(WeatherBand::from_score(65.0), WeatherBand::Neutral);
        assert_eq!(WeatherBand::from_score(66.0), WeatherBand::Greed);
        assert_eq!(WeatherBand::from_score(85.0), WeatherBand::Greed);
        assert_eq!(WeatherBand::from_score(86.0), WeatherBand::ExtremeGreed);
        assert_eq!(WeatherBand::from_score(100.0), WeatherBand::ExtremeGreed);
    }

    #[test]
    fn test_breadth_row_usability() {
        let empty = BreadthRow {
            date: "20260828".to_string(),
            advance: None,
            decline: None,
            unchanged: Some(12.0),
            upper: None,
            lower: None,
        };
        // 보합만 있는 행은 버림
        assert!(!empty.is_usable());

        let usable = BreadthRow {
            advance: Some(420.0),
            ..empty.clone()
        };
        assert!(usable.is_usable());
    }

    #[test]
    fn test_fetch_outcome_accessors() {
        let fresh: FetchOutcome<i32> = FetchOutcome::Fresh(7);
        assert!(fresh.is_ok());
        assert!(!fresh.is_stale());
        assert_eq!(fresh.value(), Some(&7));

        let stale: FetchOutcome<i32> = FetchOutcome::Stale(3);
        assert!(stale.is_ok());
        assert!(stale.is_stale());

        let failed: FetchOutcome<i32> = FetchOutcome::failed("boom");
        assert!(!failed.is_ok());
        assert_eq!(failed.value(), None);
        assert_eq!(failed.failure_message(), Some("boom"));
    }
}
