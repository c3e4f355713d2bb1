//! adrinfo.kr KOSPI ADR 스크레이퍼.
//!
//! 페이지의 `article` 카드 중 header에 KOSPI가 들어간 카드를 찾아
//! `.card-title`의 첫 숫자를 ADR 값으로 읽습니다. 사이트가 트래픽
//! 초과로 차단 페이지를 내려주면 즉시 실패 처리합니다.

use chrono::{DateTime, Utc};
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use weather_core::domain::FetchOutcome;

use crate::error::{DataError, Result};
use crate::storage::RedisCache;

/// cache 키.
const CACHE_KEY: &str = "macro:adrinfo:latest";
/// 차단 페이지 판별 문자열.
const BLOCKED_MARKER: &str = "Blocked due to excessive traffic";

/// 스크레이핑된 KOSPI ADR 값.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdrInfoSnapshot {
    /// ADR 값 (등락비율, %)
    pub adr: f64,
    /// 데이터 출처
    pub source: String,
    /// 페이지에 표기된 기준 시각 문자열
    pub label_time: Option<String>,
    /// 스크레이핑 시각
    pub scraped_at: DateTime<Utc>,
}

/// adrinfo.kr 설정.
#[derive(Debug, Clone)]
pub struct AdrConfig {
    pub url: String,
    pub timeout_ms: u64,
    /// 신선 cache TTL (초)
    pub cache_secs: u64,
    /// 스테일 fallback TTL (초)
    pub stale_cache_secs: u64,
}

impl Default for AdrConfig {
    fn default() -> Self {
        Self {
            url: "http://adrinfo.kr/".to_string(),
            timeout_ms: 10_000,
            cache_secs: 600,
            stale_cache_secs: 3_600,
        }
    }
}

impl AdrConfig {
    /// 환경 변수에서 설정 생성. 미설정 값은 기본값 유지.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("ADRINFO_URL") {
            config.url = url;
        }
        if let Some(ms) = std::env::var("ADRINFO_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout_ms = ms;
        }
        config
    }
}

/// KOSPI ADR 스크레이퍼.
pub struct AdrScraper {
    config: AdrConfig,
    client: Client,
    cache: Option<RedisCache>,
}

impl AdrScraper {
    /// 새 스크레이퍼 생성.
    pub fn new(config: AdrConfig, cache: Option<RedisCache>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| DataError::ConfigError(format!("HTTP client 생성 실패: {}", e)))?;

        Ok(Self {
            config,
            client,
            cache,
        })
    }

    /// KOSPI ADR 조회.
    ///
    /// 스크레이핑 실패 시 cache가 남아 있으면 스테일 TTL로 다시 저장해
    /// 수명을 연장하고 Stale로 돌려줍니다.
    pub async fn fetch(&self, force: bool) -> FetchOutcome<AdrInfoSnapshot> {
        if !force {
            if let Some(cached) = self.read_cache().await {
                return FetchOutcome::Cached(cached);
            }
        }

        match self.scrape().await {
            Ok(snapshot) => {
                self.write_cache(&snapshot, self.config.cache_secs).await;
                FetchOutcome::Fresh(snapshot)
            }
            Err(e) => {
                error!(error = %e, "adrinfo 스크레이핑 실패");
                match self.read_cache().await {
                    Some(cached) => {
                        self.write_cache(&cached, self.config.stale_cache_secs).await;
                        FetchOutcome::Stale(cached)
                    }
                    None => FetchOutcome::failed(e.to_string()),
                }
            }
        }
    }

    async fn scrape(&self) -> Result<AdrInfoSnapshot> {
        let response = self
            .client
            .get(&self.config.url)
            .header(
                "User-Agent",
                "Mozilla/5.0 (compatible; market-weather-bot/1.0; +https://github.com/)",
            )
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7")
            .header("Referer", &self.config.url)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DataError::FetchError(format!("adrinfo {} 응답", status)));
        }

        let html = response.text().await?;
        if html.contains(BLOCKED_MARKER) {
            return Err(DataError::FetchError(
                "adrinfo.kr에서 요청을 일시적으로 차단했습니다.".to_string(),
            ));
        }

        let (adr, label_time) = extract_kospi_adr(&html).ok_or_else(|| {
            DataError::InvalidData("adrinfo.kr 페이지에서 KOSPI ADR을 찾지 못했습니다.".to_string())
        })?;

        Ok(AdrInfoSnapshot {
            adr,
            source: "adrinfo.kr".to_string(),
            label_time,
            scraped_at: Utc::now(),
        })
    }

    async fn read_cache(&self) -> Option<AdrInfoSnapshot> {
        let cache = self.cache.as_ref()?;
        match cache.get::<AdrInfoSnapshot>(CACHE_KEY).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "adrinfo cache 읽기 실패");
                None
            }
        }
    }

    async fn write_cache(&self, snapshot: &AdrInfoSnapshot, ttl_secs: u64) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set_with_ttl(CACHE_KEY, snapshot, ttl_secs).await {
                warn!(error = %e, "adrinfo cache 기록 실패");
            }
        }
    }
}

/// KOSPI 카드에서 (ADR 값, 기준 시각 라벨) 추출.
fn extract_kospi_adr(html: &str) -> Option<(f64, Option<String>)> {
    let document = Html::parse_document(html);
    let article_sel = Selector::parse("article").ok()?;
    let header_sel = Selector::parse("header").ok()?;
    let title_sel = Selector::parse(".card-title").ok()?;
    let small_sel = Selector::parse("small").ok()?;

    for article in document.select(&article_sel) {
        let header_text = article
            .select(&header_sel)
            .next()
            .map(|h| h.text().collect::<String>().trim().to_lowercase())
            .unwrap_or_default();
        if !header_text.contains("kospi") {
            continue;
        }

        let Some(title) = article.select(&title_sel).next() else {
            continue;
        };
        let title_text = title.text().collect::<String>();
        let Some(adr) = first_numeric_token(&title_text) else {
            continue;
        };

        let label_time = article
            .select(&small_sel)
            .next()
            .map(|s| s.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty());

        return Some((adr, label_time));
    }

    None
}

/// 텍스트에서 첫 숫자 토큰(`-?\d+(\.\d+)?`) 추출.
fn first_numeric_token(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let negative = bytes[i] == b'-'
            && i + 1 < bytes.len()
            && bytes[i + 1].is_ascii_digit();

        if negative || bytes[i].is_ascii_digit() {
            let start = i;
            if negative {
                i += 1;
            }
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
            return text[start..i].parse().ok();
        }

        i += 1;
    }

    None
}
