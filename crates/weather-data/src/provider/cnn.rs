//! CNN Fear & Greed 지수 조회.
//!
//! 봇 차단을 피하려면 브라우저 모양의 헤더와 쿠키가 필요합니다. 참조
//! 페이지에서 쿠키를 먼저 받아두고, 차단 응답(403/418/429)에만 UA와
//! Referer를 바꿔가며 재시도합니다.

use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use rand::seq::SliceRandom;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use weather_core::domain::{FetchOutcome, SentimentPrevious, SentimentReading};
use weather_core::num::number_from_json;

use crate::error::{DataError, Result};
use crate::storage::RedisCache;

/// cache 키.
const CACHE_KEY: &str = "macro:cnn:fear_greed";
/// 점수를 찾을 필드 후보.
const SCORE_FIELDS: &[&str] = &["score", "value", "index"];

/// CNN Fear & Greed 설정.
#[derive(Debug, Clone)]
pub struct CnnConfig {
    pub graph_url: String,
    pub referer: String,
    pub origin: String,
    pub user_agent: String,
    pub user_agent_pool: Vec<String>,
    pub referer_pool: Vec<String>,
    pub timeout_ms: u64,
    pub max_attempts: usize,
    pub cache_secs: u64,
    pub cookie_ttl_ms: u64,
}

impl Default for CnnConfig {
    fn default() -> Self {
        Self {
            graph_url: "https://production.dataviz.cnn.io/index/fearandgreed/graphdata"
                .to_string(),
            referer: "https://edition.cnn.com/markets/fear-and-greed".to_string(),
            origin: "https://edition.cnn.com".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36"
                .to_string(),
            user_agent_pool: Vec::new(),
            referer_pool: Vec::new(),
            timeout_ms: 5_000,
            max_attempts: 4,
            cache_secs: 600,
            cookie_ttl_ms: 15 * 60 * 1000,
        }
    }
}

impl CnnConfig {
    /// 환경 변수에서 설정 생성. 미설정 값은 기본값 유지.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("CNN_FGI_URL") {
            config.graph_url = url;
        }
        if let Ok(referer) = std::env::var("CNN_FGI_REFERER") {
            config.referer = referer;
        }
        if let Ok(origin) = std::env::var("CNN_FGI_ORIGIN") {
            config.origin = origin;
        }
        if let Ok(ua) = std::env::var("CNN_FGI_USER_AGENT") {
            config.user_agent = ua;
        }
        if let Ok(pool) = std::env::var("CNN_FGI_USER_AGENT_POOL") {
            config.user_agent_pool = split_csv(&pool);
        }
        if let Ok(pool) = std::env::var("CNN_FGI_REFERER_POOL") {
            config.referer_pool = split_csv(&pool);
        }
        if let Some(ms) = std::env::var("CNN_FGI_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout_ms = ms;
        }
        if let Some(n) = std::env::var("CNN_FGI_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            config.max_attempts = n.max(1);
        }
        if let Some(secs) = std::env::var("CNN_FGI_CACHE_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.cache_secs = secs;
        }
        if let Some(ms) = std::env::var("CNN_FGI_COOKIE_TTL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.cookie_ttl_ms = ms;
        }

        config
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

struct CookieState {
    value: String,
    expires_at: Instant,
}

/// CNN Fear & Greed 조회기.
pub struct CnnFetcher {
    config: CnnConfig,
    client: Client,
    cache: Option<RedisCache>,
    cookie: Mutex<Option<CookieState>>,
}

impl CnnFetcher {
    /// 새 조회기 생성.
    pub fn new(config: CnnConfig, cache: Option<RedisCache>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| DataError::ConfigError(format!("HTTP client 생성 실패: {}", e)))?;

        Ok(Self {
            config,
            client,
            cache,
            cookie: Mutex::new(None),
        })
    }

    /// 공포탐욕 지수 조회.
    ///
    /// 신선한 cache가 있으면 그대로, 없으면 라이브 조회 후 cache에
    /// 기록합니다. 라이브 실패 시 cache가 남아 있으면 Stale로 돌려주고,
    /// 그마저 없으면 Failed입니다.
    pub async fn fetch(&self, force: bool) -> FetchOutcome<SentimentReading> {
        if !force {
            if let Some(cached) = self.read_cache().await {
                return FetchOutcome::Cached(cached);
            }
        }

        match self.fetch_live().await {
            Ok(reading) => {
                self.write_cache(&reading).await;
                FetchOutcome::Fresh(reading)
            }
            Err(e) => {
                error!(error = %e, "CNN 공포탐욕 조회 실패");
                match self.read_cache().await {
                    Some(cached) => FetchOutcome::Stale(cached),
                    None => FetchOutcome::failed(e.to_string()),
                }
            }
        }
    }

    async fn read_cache(&self) -> Option<SentimentReading> {
        let cache = self.cache.as_ref()?;
        match cache.get::<SentimentReading>(CACHE_KEY).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "CNN cache 읽기 실패");
                None
            }
        }
    }

    async fn write_cache(&self, reading: &SentimentReading) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache
                .set_with_ttl(CACHE_KEY, reading, self.config.cache_secs)
                .await
            {
                warn!(error = %e, "CNN cache 기록 실패");
            }
        }
    }

    async fn fetch_live(&self) -> Result<SentimentReading> {
        let mut cookie = self.ensure_cookie(false, 0).await;

        for attempt in 0..self.config.max_attempts {
            let request = self
                .apply_headers(self.client.get(&self.config.graph_url), attempt, &cookie);

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            if status.as_u16() == 403 || status.as_u16() == 418 || status.as_u16() == 429 {
                let wait = Duration::from_millis((1_500 * (attempt as u64 + 1)).min(5_000));
                warn!(%status, attempt, wait_ms = wait.as_millis() as u64, "CNN 차단 응답, 재시도");
                tokio::time::sleep(wait).await;
                cookie = self.ensure_cookie(true, attempt + 1).await;
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(DataError::FetchError(format!("CNN {} 응답: {}", status, body)));
            }

            let payload: Value = response
                .json()
                .await
                .map_err(|e| DataError::ParseError(format!("CNN 응답 파싱 실패: {}", e)))?;

            return normalize_fear_greed(&payload)
                .ok_or_else(|| DataError::InvalidData("CNN 응답에 지수 데이터 없음".to_string()));
        }

        Err(DataError::FetchError(format!(
            "CNN 차단 응답이 {}회 연속 발생",
            self.config.max_attempts
        )))
    }

    /// 참조 페이지에서 쿠키 확보. 실패해도 치명적이지 않으므로 `None`
    /// 쿠키로 진행합니다.
    async fn ensure_cookie(&self, force: bool, attempt: usize) -> Option<String> {
        {
            let guard = self.cookie.lock().await;
            if !force {
                if let Some(state) = guard.as_ref() {
                    if state.expires_at > Instant::now() {
                        return Some(state.value.clone());
                    }
                }
            }
        }

        let request = self.apply_headers(self.client.get(&self.config.referer), attempt, &None);

        match request.send().await {
            Ok(response) => {
                let cookie: Vec<String> = response
                    .headers()
                    .get_all("set-cookie")
                    .iter()
                    .filter_map(|v| v.to_str().ok())
                    .filter_map(|entry| entry.split(';').next())
                    .map(|s| s.to_string())
                    .collect();

                if cookie.is_empty() {
                    let mut guard = self.cookie.lock().await;
                    *guard = None;
                    return None;
                }

                let value = cookie.join("; ");
                debug!(cookies = cookie.len(), "CNN 쿠키 확보");
                let mut guard = self.cookie.lock().await;
                *guard = Some(CookieState {
                    value: value.clone(),
                    expires_at: Instant::now()
                        + Duration::from_millis(self.config.cookie_ttl_ms),
                });
                Some(value)
            }
            Err(e) => {
                warn!(error = %e, "CNN 쿠키 조회 실패");
                let mut guard = self.cookie.lock().await;
                *guard = None;
                None
            }
        }
    }

    /// 브라우저 모양의 헤더 적용. 첫 시도는 기본 UA/Referer, 이후에는
    /// 로테이션 풀에서 무작위로 고릅니다.
    fn apply_headers(
        &self,
        request: reqwest::RequestBuilder,
        attempt: usize,
        cookie: &Option<String>,
    ) -> reqwest::RequestBuilder {
        let user_agent = if attempt == 0 {
            self.config.user_agent.clone()
        } else {
            pick_random(&self.config.user_agent_pool, &self.config.user_agent)
        };
        let referer = if attempt == 0 {
            self.config.referer.clone()
        } else {
            pick_random(&self.config.referer_pool, &self.config.referer)
        };

        let mut request = request
            .header("User-Agent", user_agent)
            .header("Accept", "application/json, text/plain, */*")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Referer", referer)
            .header("Origin", &self.config.origin)
            .header("Pragma", "no-cache")
            .header("Cache-Control", "no-cache")
            .header("Sec-Fetch-Site", "same-site")
            .header("Sec-Fetch-Mode", "cors")
            .header("Sec-Fetch-Dest", "empty")
            .header(
                "Sec-CH-UA",
                "\"Chromium\";v=\"129\", \"Not=A?Brand\";v=\"24\", \"Google Chrome\";v=\"129\"",
            )
            .header("Sec-CH-UA-Mobile", "?0")
            .header("Sec-CH-UA-Platform", "\"Windows\"")
            .header("DNT", "1");

        if let Some(value) = cookie {
            request = request.header("Cookie", value);
        }

        request
    }
}

fn pick_random(pool: &[String], fallback: &str) -> String {
    pool.choose(&mut rand::thread_rng())
        .cloned()
        .unwrap_or_else(|| fallback.to_string())
}

/// CNN 응답을 정규화된 심리 지표로 변환.
fn normalize_fear_greed(payload: &Value) -> Option<SentimentReading> {
    let core = payload.get("fear_and_greed")?;

    let score = SCORE_FIELDS
        .iter()
        .find_map(|name| core.get(name).and_then(number_from_json))?;

    let rating = ["rating", "classification"]
        .iter()
        .find_map(|name| core.get(name).and_then(|v| v.as_str()))
        .map(|s| s.to_string());

    let timestamp = ["timestamp", "lastUpdated", "last_update"]
        .iter()
        .find_map(|name| core.get(name))
        .and_then(to_datetime);

    let previous_close = payload
        .get("fear_and_greed_historical")
        .and_then(|v| v.as_array())
        .and_then(|items| items.first())
        .map(|prev| SentimentPrevious {
            score: SCORE_FIELDS
                .iter()
                .find_map(|name| prev.get(name).and_then(number_from_json)),
            rating: prev
                .get("rating")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            timestamp: ["timestamp", "lastUpdated", "last_update"]
                .iter()
                .find_map(|name| prev.get(name))
                .and_then(to_datetime),
        });

    Some(SentimentReading {
        score,
        rating,
        timestamp,
        previous_close,
    })
}

/// epoch(초/밀리초) 숫자 또는 ISO 문자열을 UTC 시각으로 변환.
fn to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(num) = number_from_json(value) {
        let ms = if num > 1e12 { num } else { num * 1000.0 };
        return Utc.timestamp_millis_opt(ms as i64).single();
    }
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config(server: &mockito::Server) -> CnnConfig {
        CnnConfig {
            graph_url: format!("{}/graphdata", server.url()),
            referer: format!("{}/markets", server.url()),
            origin: server.url(),
            user_agent: "test-agent-1".to_string(),
            user_agent_pool: vec!["test-agent-2".to_string()],
            ..CnnConfig::default()
        }
    }

    #[test]
    fn test_normalize_score_field_variants() {
        for field in ["score", "value", "index"] {
            let payload = json!({"fear_and_greed": {field: 42.5, "rating": "fear"}});
            let reading = normalize_fear_greed(&payload).unwrap();
            assert_eq!(reading.score, 42.5);
            assert_eq!(reading.rating.as_deref(), Some("fear"));
        }
    }

    #[test]
    fn test_normalize_previous_close_from_history_head() {
        let payload = json!({
            "fear_and_greed": {"score": 61.0, "timestamp": 1724800000},
            "fear_and_greed_historical": [
                {"value": 58.2, "rating": "greed"},
                {"value": 55.0}
            ]
        });

        let reading = normalize_fear_greed(&payload).unwrap();
        let previous = reading.previous_close.unwrap();
        assert_eq!(previous.score, Some(58.2));
        assert_eq!(previous.rating.as_deref(), Some("greed"));
        assert!(reading.timestamp.is_some());
    }

    #[test]
    fn test_normalize_rejects_missing_score() {
        let payload = json!({"fear_and_greed": {"rating": "fear"}});
        assert!(normalize_fear_greed(&payload).is_none());

        let payload = json!({"other": {}});
        assert!(normalize_fear_greed(&payload).is_none());
    }

    #[tokio::test]
    async fn test_retries_blocked_responses_with_rotation() {
        let mut server = mockito::Server::new_async().await;

        // 쿠키 부트스트랩
        server
            .mock("GET", "/markets")
            .with_status(200)
            .with_header("set-cookie", "cid=abc; Path=/")
            .create_async()
            .await;

        // 기본 UA는 차단
        server
            .mock("GET", "/graphdata")
            .match_header("user-agent", "test-agent-1")
            .with_status(403)
            .create_async()
            .await;

        // 로테이션된 UA는 통과
        server
            .mock("GET", "/graphdata")
            .match_header("user-agent", "test-agent-2")
            .with_status(200)
            .with_body(json!({"fear_and_greed": {"score": 33.3}}).to_string())
            .create_async()
            .await;

        let fetcher = CnnFetcher::new(test_config(&server), None).unwrap();
        let outcome = fetcher.fetch(true).await;

        let reading = outcome.value().expect("expected a reading");
        assert_eq!(reading.score, 33.3);
    }

    #[tokio::test]
    async fn test_non_blocked_error_fails_without_retry() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/markets")
            .with_status(200)
            .create_async()
            .await;
        let graph = server
            .mock("GET", "/graphdata")
            .with_status(500)
            .with_body("boom")
            .expect(1)
            .create_async()
            .await;

        let fetcher = CnnFetcher::new(test_config(&server), None).unwrap();
        let outcome = fetcher.fetch(true).await;

        assert!(!outcome.is_ok());
        graph.assert_async().await;
    }
}
