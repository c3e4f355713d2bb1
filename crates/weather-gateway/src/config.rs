//! 환경변수 기반 설정 모듈.

use std::time::Duration;

/// 게이트웨이 전체 설정
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Redis URL
    pub redis_url: String,
    /// 호출 간격 제한 설정
    pub limiter: LimiterConfig,
    /// 기본 지수 코드 (KOSPI = "0001")
    pub index_code: String,
    /// 거래량 배수 잡 설정
    pub volume_job: VolumeJobConfig,
    /// 날씨 점수 가중치
    pub scorer: ScorerConfig,
    /// ADR 집계 영업일 수
    pub adr_days: usize,
    /// 일자별 조회 영업일 fallback 예산
    pub breadth_fallback_days: usize,
    /// 연속 조회 페이지 상한
    pub breadth_max_pages: usize,
    /// 캐시 TTL 설정
    pub ttl: TtlConfig,
}

/// 호출 간격 제한 설정
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// 호출 간 최소 간격 (밀리초)
    pub gap_ms: u64,
    /// 슬롯 대기 상한 (밀리초)
    pub max_wait_ms: u64,
}

/// 거래량 배수 잡 설정
#[derive(Debug, Clone)]
pub struct VolumeJobConfig {
    /// 정상 실행 주기 (초)
    pub interval_secs: u64,
    /// 사이클 내 재시도 횟수
    pub max_attempts: u32,
    /// 재시도 간 backoff 단위 (초, 시도 횟수에 비례)
    pub retry_backoff_secs: u64,
    /// 최초 실행 전 대기 (초)
    pub initial_delay_secs: u64,
    /// 대기 시간에 더하는 무작위 jitter 상한 (초)
    pub jitter_secs: u64,
    /// 평균 계산에 쓰는 영업일 수
    pub lookback_days: usize,
    /// 거래량 이력 캐시 TTL (초)
    pub history_ttl_secs: u64,
}

/// 날씨 점수 가중치
#[derive(Debug, Clone)]
pub struct ScorerConfig {
    /// 지수 등락률 가중치
    pub index_weight: f64,
    /// VKOSPI 가중치
    pub vkospi_weight: f64,
    /// 심리 지표 가중치
    pub sentiment_weight: f64,
}

/// 캐시 TTL 설정 (초)
#[derive(Debug, Clone)]
pub struct TtlConfig {
    pub quote_secs: u64,
    pub news_secs: u64,
    pub history_secs: u64,
    pub breadth_secs: u64,
    pub adr_secs: u64,
}

impl GatewayConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            limiter: LimiterConfig {
                gap_ms: env_var_parse("KIS_THROTTLE_GAP_MS", 200),
                max_wait_ms: env_var_parse("KIS_THROTTLE_MAX_WAIT_MS", 2_000),
            },
            index_code: std::env::var("MARKET_INDEX_CODE")
                .unwrap_or_else(|_| "0001".to_string()),
            volume_job: VolumeJobConfig {
                interval_secs: env_var_parse("VOLUME_JOB_INTERVAL_SECS", 180),
                max_attempts: env_var_parse("VOLUME_JOB_MAX_ATTEMPTS", 3),
                retry_backoff_secs: env_var_parse("VOLUME_JOB_RETRY_BACKOFF_SECS", 10),
                initial_delay_secs: env_var_parse("VOLUME_JOB_INITIAL_DELAY_SECS", 4),
                jitter_secs: env_var_parse("VOLUME_JOB_JITTER_SECS", 2),
                lookback_days: env_var_parse("VOLUME_JOB_LOOKBACK_DAYS", 20),
                history_ttl_secs: env_var_parse("VOLUME_HISTORY_TTL_SECS", 1_800),
            },
            scorer: ScorerConfig {
                index_weight: env_var_parse("WEATHER_INDEX_WEIGHT", 0.45),
                vkospi_weight: env_var_parse("WEATHER_VKOSPI_WEIGHT", 0.30),
                sentiment_weight: env_var_parse("WEATHER_SENTIMENT_WEIGHT", 0.25),
            },
            adr_days: env_var_parse("ADR_WINDOW_DAYS", 20),
            breadth_fallback_days: env_var_parse("BREADTH_FALLBACK_DAYS", 5),
            breadth_max_pages: env_var_parse("BREADTH_MAX_PAGES", 5),
            ttl: TtlConfig {
                quote_secs: env_var_parse("QUOTE_TTL_SECS", 90),
                news_secs: env_var_parse("NEWS_TTL_SECS", 600),
                history_secs: env_var_parse("HISTORY_TTL_SECS", 900),
                breadth_secs: env_var_parse("BREADTH_TTL_SECS", 900),
                adr_secs: env_var_parse("ADR_TTL_SECS", 900),
            },
        }
    }
}

impl VolumeJobConfig {
    /// 정상 실행 주기를 Duration으로 반환
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// 실패 시 실행 주기 (정상 주기 2배)
    pub fn error_interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs * 2)
    }

    /// rate limit 시 실행 주기 (정상 주기 4배)
    pub fn rate_limit_interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs * 4)
    }

    /// 결과 캐시 TTL. 주기보다 길게, 최소 60초.
    pub fn result_ttl_secs(&self) -> u64 {
        self.interval_secs.max(60)
    }
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
