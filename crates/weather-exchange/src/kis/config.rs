//! 한국투자증권 (KIS) API 설정.
//!
//! KIS API는 app_key와 app_secret을 사용한 OAuth 2.0 인증이 필요합니다.
//! 시세 조회 전용이므로 계좌 관련 설정은 없습니다.

use serde::{Deserialize, Serialize};

/// 실전투자 REST 기본 URL.
const DEFAULT_BASE_URL: &str = "https://openapi.koreainvestment.com:9443";
/// 레이트리밋으로 분류할 기본 메시지 코드.
const DEFAULT_RATE_LIMIT_CODES: &[&str] = &["EGW00201"];

/// KIS API 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KisConfig {
    /// REST 기본 URL
    pub base_url: String,
    /// 앱키
    pub app_key: String,
    /// 앱시크릿
    pub app_secret: String,
    /// 고객 유형 ("P" = 개인)
    pub cust_type: String,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// 레이트리밋으로 분류할 msg_cd 목록
    pub rate_limit_codes: Vec<String>,
}

impl KisConfig {
    /// 새로운 KIS 설정 생성.
    pub fn new(app_key: String, app_secret: String) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            app_key,
            app_secret,
            cust_type: "P".to_string(),
            timeout_secs: 15,
            rate_limit_codes: DEFAULT_RATE_LIMIT_CODES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// 기본 URL 설정 (테스트 서버 주입용).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 타임아웃 설정.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// 환경 변수에서 설정 생성.
    ///
    /// # 환경 변수
    /// - `KIS_APP_KEY`, `KIS_APP_SECRET` (필수)
    /// - `KIS_BASE_URL`, `KIS_CUSTTYPE`, `KIS_TIMEOUT_SECS`
    /// - `KIS_RATE_LIMIT_CODES` (쉼표 구분)
    pub fn from_env() -> Option<Self> {
        let app_key = std::env::var("KIS_APP_KEY").ok()?;
        let app_secret = std::env::var("KIS_APP_SECRET").ok()?;

        let mut config = Self::new(app_key, app_secret);

        if let Ok(url) = std::env::var("KIS_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(cust) = std::env::var("KIS_CUSTTYPE") {
            config.cust_type = cust;
        }
        if let Some(secs) = std::env::var("KIS_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout_secs = secs;
        }
        if let Ok(codes) = std::env::var("KIS_RATE_LIMIT_CODES") {
            let parsed: Vec<String> = codes
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                config.rate_limit_codes = parsed;
            }
        }

        Some(config)
    }

    /// msg_cd가 레이트리밋 코드인지 확인.
    pub fn is_rate_limit_code(&self, msg_cd: &str) -> bool {
        self.rate_limit_codes.iter().any(|c| c == msg_cd)
    }
}
