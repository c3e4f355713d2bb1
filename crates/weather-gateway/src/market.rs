//! 캐시를 앞단에 둔 시장 데이터 서비스.
//!
//! 모든 조회는 cache-first입니다. 제공자 호출이 실패하면 캐시에 남은
//! 값을 Stale로 돌려주고, 캐시마저 없을 때만 Failed가 됩니다.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::time::{sleep, Duration};
use tracing::{error, warn};

use weather_core::domain::{
    AdrSummary, BreadthRow, FetchOutcome, HistoryPoint, QuoteSnapshot, VolumeRatio,
};
use weather_core::{first_numeric_field, parse_yyyymmdd};
use weather_data::RedisCache;
use weather_exchange::{BreadthParams, KisClient, NewsParams};

use crate::config::GatewayConfig;
use crate::volume_job;

/// 일자별 조회 사이클 내 재시도 횟수.
const BREADTH_ATTEMPTS: u32 = 3;
/// 재시도 간 backoff 단위 (밀리초, 시도 횟수에 비례).
const BREADTH_BACKOFF_MS: u64 = 1_200;

/// 시세 행에서 현재가를 찾을 필드 후보.
const PRICE_FIELDS: &[&str] = &["stck_prpr", "stck_clpr", "last"];
/// 지수 행에서 현재가를 찾을 필드 후보.
const INDEX_PRICE_FIELDS: &[&str] = &["bstp_nmix_prpr", "bzpi_clpr", "clpr"];
/// 등락률 필드 후보.
const CHANGE_FIELDS: &[&str] = &["prdy_ctrt", "bstp_nmix_prdy_ctrt"];
/// 거래량 필드 후보.
const VOLUME_FIELDS: &[&str] = &["acml_vol", "tot_vol", "volume"];

/// KIS 클라이언트와 Redis 캐시를 묶은 조회 서비스.
pub struct MarketDataService {
    client: Arc<KisClient>,
    cache: Option<RedisCache>,
    config: GatewayConfig,
}

impl MarketDataService {
    /// 새 서비스 생성. 캐시가 없으면 조회마다 제공자로 갑니다.
    pub fn new(client: Arc<KisClient>, cache: Option<RedisCache>, config: GatewayConfig) -> Self {
        Self {
            client,
            cache,
            config,
        }
    }

    /// 종목 현재가 조회.
    pub async fn fetch_quote(&self, ticker: &str) -> FetchOutcome<QuoteSnapshot> {
        let key = format!("kis:quote:{}", ticker);
        if let Some(cached) = self.read_cache::<QuoteSnapshot>(&key).await {
            return FetchOutcome::Cached(cached);
        }

        match self.client.get_quote(ticker, "J").await {
            Ok(output) => match quote_from_output(ticker, &output, PRICE_FIELDS) {
                Some(snapshot) => {
                    self.write_cache(&key, &snapshot, self.config.ttl.quote_secs)
                        .await;
                    FetchOutcome::Fresh(snapshot)
                }
                None => FetchOutcome::failed(format!("{} 시세 응답에 현재가 없음", ticker)),
            },
            Err(e) => {
                error!(ticker = %ticker, error = %e, "시세 조회 실패");
                self.stale_or_failed(&key, e.to_string()).await
            }
        }
    }

    /// KOSPI 지수 현재가 조회.
    pub async fn fetch_kospi_quote(&self) -> FetchOutcome<QuoteSnapshot> {
        let key = "live:KOSPI".to_string();
        if let Some(cached) = self.read_cache::<QuoteSnapshot>(&key).await {
            return FetchOutcome::Cached(cached);
        }

        match self
            .client
            .get_index_quote(&self.config.index_code, "U")
            .await
        {
            Ok(output) => match quote_from_output("KOSPI", &output, INDEX_PRICE_FIELDS) {
                Some(snapshot) => {
                    self.write_cache(&key, &snapshot, self.config.ttl.quote_secs)
                        .await;
                    FetchOutcome::Fresh(snapshot)
                }
                None => FetchOutcome::failed("지수 응답에 현재가 없음"),
            },
            Err(e) => {
                error!(error = %e, "KOSPI 지수 조회 실패");
                self.stale_or_failed(&key, e.to_string()).await
            }
        }
    }

    /// 종목 뉴스 제목 조회. 빈 응답은 캐시가 남아 있으면 Stale로 메꿉니다.
    pub async fn fetch_news(&self, ticker: &str) -> FetchOutcome<Vec<Value>> {
        let key = format!("news:{}", ticker);
        if let Some(cached) = self.read_cache::<Vec<Value>>(&key).await {
            return FetchOutcome::Cached(cached);
        }

        match self.client.get_news(ticker, &NewsParams::default()).await {
            Ok(items) if !items.is_empty() => {
                self.write_cache(&key, &items, self.config.ttl.news_secs)
                    .await;
                FetchOutcome::Fresh(items)
            }
            Ok(items) => match self.read_cache::<Vec<Value>>(&key).await {
                Some(cached) => FetchOutcome::Stale(cached),
                None => FetchOutcome::Fresh(items),
            },
            Err(e) => {
                error!(ticker = %ticker, error = %e, "뉴스 조회 실패");
                self.stale_or_failed(&key, e.to_string()).await
            }
        }
    }

    /// 기간별 일봉 조회. 날짜 오름차순으로 정규화합니다.
    pub async fn fetch_history(&self, ticker: &str, period: &str) -> FetchOutcome<Vec<HistoryPoint>> {
        let key = format!("history:{}:{}", ticker, period);
        if let Some(cached) = self.read_cache::<Vec<HistoryPoint>>(&key).await {
            return FetchOutcome::Cached(cached);
        }

        match self.client.get_daily_chart(ticker, "J", period).await {
            Ok(rows) => {
                let points = history_from_rows(&rows);
                if points.is_empty() {
                    return self
                        .stale_or_failed(&key, format!("{} 일봉 응답 비어 있음", ticker))
                        .await;
                }
                self.write_cache(&key, &points, self.config.ttl.history_secs)
                    .await;
                FetchOutcome::Fresh(points)
            }
            Err(e) => {
                error!(ticker = %ticker, period = %period, error = %e, "일봉 조회 실패");
                self.stale_or_failed(&key, e.to_string()).await
            }
        }
    }

    /// 지수 일자별 등락 종목 수 조회.
    ///
    /// 일시적 오류는 사이클 안에서 3회까지 재시도합니다. rate limit과
    /// 제공자 거절은 재시도 없이 캐시 fallback으로 넘어갑니다.
    pub async fn fetch_breadth(&self, start_date: Option<&str>) -> FetchOutcome<Vec<BreadthRow>> {
        let key = format!(
            "breadth:{}:{}",
            self.config.index_code,
            start_date.unwrap_or("latest")
        );
        if let Some(cached) = self.read_cache::<Vec<BreadthRow>>(&key).await {
            return FetchOutcome::Cached(cached);
        }

        let params = BreadthParams {
            index_code: self.config.index_code.clone(),
            start_date: start_date.map(str::to_string),
            max_pages: self.config.breadth_max_pages,
            fallback_days: self.config.breadth_fallback_days,
            ..BreadthParams::default()
        };

        let mut last_error = String::new();
        for attempt in 1..=BREADTH_ATTEMPTS {
            match self.client.get_index_daily_breadth(&params).await {
                // fallback 예산을 다 써도 행이 없으면 소프트 실패로 취급
                Ok(rows) if rows.is_empty() => {
                    return self
                        .stale_or_failed(&key, "등락 조회 결과 없음 (fallback 소진)".to_string())
                        .await;
                }
                Ok(rows) => {
                    self.write_cache(&key, &rows, self.config.ttl.breadth_secs)
                        .await;
                    return FetchOutcome::Fresh(rows);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if !e.is_retryable() || attempt == BREADTH_ATTEMPTS {
                        break;
                    }
                    let backoff = Duration::from_millis(BREADTH_BACKOFF_MS * attempt as u64);
                    warn!(attempt, error = %e, "등락 조회 실패, {:?} 후 재시도", backoff);
                    sleep(backoff).await;
                }
            }
        }

        error!(error = %last_error, "등락 조회 재시도 소진");
        self.stale_or_failed(&key, last_error).await
    }

    /// ADR(등락비율) 조회.
    pub async fn fetch_adr(
        &self,
        days: usize,
        start_date: Option<&str>,
    ) -> FetchOutcome<AdrSummary> {
        let key = format!(
            "adr:{}:{}:{}",
            self.config.index_code,
            days,
            start_date.unwrap_or("latest")
        );
        if let Some(cached) = self.read_cache::<AdrSummary>(&key).await {
            return FetchOutcome::Cached(cached);
        }

        let rows = match self.fetch_breadth(start_date).await {
            outcome if outcome.is_ok() => match outcome.into_value() {
                Some(rows) => rows,
                None => return FetchOutcome::failed("등락 데이터 없음"),
            },
            outcome => {
                let message = outcome
                    .failure_message()
                    .unwrap_or("등락 데이터 없음")
                    .to_string();
                return self.stale_or_failed(&key, message).await;
            }
        };

        match compute_adr(&rows, days) {
            Some(summary) => {
                self.write_cache(&key, &summary, self.config.ttl.adr_secs)
                    .await;
                FetchOutcome::Fresh(summary)
            }
            None => FetchOutcome::failed("ADR 계산에 쓸 수 있는 등락 행 없음"),
        }
    }

    /// 백그라운드 잡이 캐시한 거래량 배수 조회 (읽기 전용).
    pub async fn cached_volume_ratio(&self) -> Option<VolumeRatio> {
        self.read_cache::<VolumeRatio>(&volume_job::ratio_key(&self.config.index_code))
            .await
    }

    async fn stale_or_failed<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
        message: String,
    ) -> FetchOutcome<T> {
        match self.read_cache::<T>(key).await {
            Some(cached) => FetchOutcome::Stale(cached),
            None => FetchOutcome::failed(message),
        }
    }

    async fn read_cache<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let cache = self.cache.as_ref()?;
        match cache.get::<T>(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "캐시 읽기 실패");
                None
            }
        }
    }

    async fn write_cache<T: serde::Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set_with_ttl(key, value, ttl_secs).await {
                warn!(key = %key, error = %e, "캐시 기록 실패");
            }
        }
    }
}

/// KIS 시세 행을 `QuoteSnapshot`으로 변환.
fn quote_from_output(ticker: &str, output: &Value, price_fields: &[&str]) -> Option<QuoteSnapshot> {
    let last_price = first_numeric_field(output, price_fields)?;
    Some(QuoteSnapshot {
        ticker: ticker.to_string(),
        ts: Utc::now(),
        last_price,
        pct_change: first_numeric_field(output, CHANGE_FIELDS),
        volume: first_numeric_field(output, VOLUME_FIELDS),
        provider: "KIS".to_string(),
    })
}

/// 일봉 행 목록을 날짜 오름차순 `HistoryPoint`로 정규화.
///
/// 날짜나 종가가 없는 행은 버리고, 같은 날짜는 마지막 행을 유지합니다.
fn history_from_rows(rows: &[Value]) -> Vec<HistoryPoint> {
    let mut points: Vec<HistoryPoint> = rows
        .iter()
        .filter_map(|row| {
            let raw_date = row.get("stck_bsop_date").and_then(Value::as_str)?;
            let date = parse_yyyymmdd(raw_date)?;
            let close = first_numeric_field(row, &["stck_clpr", "clpr"])?;
            Some(HistoryPoint { date, close })
        })
        .collect();

    points.sort_by_key(|p| p.date);
    points.reverse();
    points.dedup_by(|a, b| a.date == b.date);
    points.reverse();
    points
}

/// 등락 행에서 ADR 집계.
///
/// 사용 가능한 행 중 최근 `days`개만 쓰며, 상승/하락 합이 모두 0이면
/// 집계 자체를 버립니다. 하락 합만 0이면 비율만 `None`으로 둡니다.
pub fn compute_adr(rows: &[BreadthRow], days: usize) -> Option<AdrSummary> {
    let usable: Vec<&BreadthRow> = rows.iter().filter(|r| r.is_usable()).collect();
    if usable.is_empty() {
        return None;
    }

    let window = if usable.len() > days {
        &usable[usable.len() - days..]
    } else {
        &usable[..]
    };

    let sum_advance: f64 = window.iter().filter_map(|r| r.advance).sum();
    let sum_decline: f64 = window.iter().filter_map(|r| r.decline).sum();
    if sum_advance == 0.0 && sum_decline == 0.0 {
        return None;
    }

    let adr_ratio = if sum_decline == 0.0 {
        None
    } else {
        Some(sum_advance / sum_decline * 100.0)
    };

    Some(AdrSummary {
        adr_ratio,
        sum_advance,
        sum_decline,
        days_used: window.len(),
        first_date: window.first().map(|r| r.date.clone()),
        last_date: window.last().map(|r| r.date.clone()),
    })
}
