//! KIS OAuth 2.0 인증 모듈.
//!
//! 접근 토큰 발급 (POST /oauth2/token)과 만료 추적, 조회 헤더 구성을
//! 담당합니다. 토큰 발급도 다른 원격 호출과 같은 조율기를 통과합니다.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::config::KisConfig;
use crate::throttle::RateLimiter;
use crate::ExchangeError;

/// 토큰 갱신 임계값 (남은 시간이 이 값보다 적으면 갱신).
const TOKEN_REFRESH_THRESHOLD_MINS: i64 = 10;
/// 토큰 발급용 슬롯 라벨.
const TOKEN_SLOT_LABEL: &str = "oauth_token";

/// KIS OAuth 토큰 응답.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: i64,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// KIS OAuth 오류 응답 (토큰 발급 실패 시).
#[derive(Debug, Clone, Deserialize)]
pub struct KisOAuthErrorResponse {
    pub error_code: String,
    pub error_description: String,
}

/// 만료 추적이 포함된 토큰 상태.
#[derive(Debug, Clone)]
pub struct TokenState {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenState {
    /// 토큰이 만료되었거나 곧 만료되는지 확인.
    pub fn is_expired_or_expiring(&self) -> bool {
        let threshold = Utc::now() + Duration::minutes(TOKEN_REFRESH_THRESHOLD_MINS);
        self.expires_at <= threshold
    }

    /// 인증 헤더 값 반환.
    pub fn auth_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// KIS OAuth 인증 관리자.
///
/// 자동 갱신을 포함한 토큰 수명 주기를 관리합니다.
pub struct KisOAuth {
    config: KisConfig,
    client: Client,
    limiter: Arc<RateLimiter>,
    token: Arc<RwLock<Option<TokenState>>>,
}

impl KisOAuth {
    /// 새로운 OAuth 관리자 생성.
    ///
    /// # Errors
    /// HTTP 클라이언트 생성에 실패하면 `ExchangeError::NetworkError`를 반환합니다.
    pub fn new(config: KisConfig, limiter: Arc<RateLimiter>) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExchangeError::NetworkError(format!("HTTP client 생성 실패: {}", e)))?;

        Ok(Self {
            config,
            client,
            limiter,
            token: Arc::new(RwLock::new(None)),
        })
    }

    /// 유효한 접근 토큰 반환, 필요시 갱신.
    pub async fn get_token(&self) -> Result<TokenState, ExchangeError> {
        {
            let token_guard = self.token.read().await;
            if let Some(ref token) = *token_guard {
                if !token.is_expired_or_expiring() {
                    debug!("캐시된 KIS 토큰 사용 (만료: {})", token.expires_at);
                    return Ok(token.clone());
                }
                warn!("KIS 토큰 만료 임박 (만료: {}), 갱신 중...", token.expires_at);
            } else {
                info!("캐시된 KIS 토큰 없음, 새 토큰 요청 중...");
            }
        }

        self.refresh_token().await
    }

    /// 접근 토큰 강제 갱신.
    pub async fn refresh_token(&self) -> Result<TokenState, ExchangeError> {
        if self.config.app_key.is_empty() || self.config.app_secret.is_empty() {
            return Err(ExchangeError::Unauthorized(
                "KIS_APP_KEY / KIS_APP_SECRET 환경변수가 설정되지 않았습니다.".to_string(),
            ));
        }

        self.limiter.acquire(TOKEN_SLOT_LABEL).await;

        let url = format!("{}/oauth2/token", self.config.base_url);
        let form = [
            ("grant_type", "client_credentials"),
            ("appkey", self.config.app_key.as_str()),
            ("appsecret", self.config.app_secret.as_str()),
        ];

        let response = self.client.post(&url).form(&form).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("토큰 요청 실패: {} - {}", status, body);

            if let Ok(oauth_error) = serde_json::from_str::<KisOAuthErrorResponse>(&body) {
                return Err(ExchangeError::Unauthorized(format!(
                    "{} ({})",
                    oauth_error.error_description, oauth_error.error_code
                )));
            }

            return Err(ExchangeError::Unauthorized(format!(
                "Token request failed: {}",
                body
            )));
        }

        let token_resp: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            ExchangeError::ParseError(format!("토큰 응답 파싱 실패: {}", e))
        })?;

        let token_state = TokenState {
            access_token: token_resp.access_token,
            token_type: token_resp.token_type,
            expires_at: Utc::now() + Duration::seconds(token_resp.expires_in),
        };

        {
            let mut token_guard = self.token.write().await;
            *token_guard = Some(token_state.clone());
        }

        info!("KIS 접근 토큰 발급 완료 (만료: {})", token_state.expires_at);

        Ok(token_state)
    }

    /// 인증된 조회 요청을 위한 공통 헤더 생성.
    ///
    /// `tr_cont`는 연속 조회 페이지 요청 시 `Some("N")`으로 전달합니다.
    ///
    /// # Errors
    /// 헤더 값 파싱에 실패하면 `ExchangeError::ParseError`를 반환합니다.
    pub async fn build_headers(
        &self,
        tr_id: &str,
        tr_cont: Option<&str>,
    ) -> Result<reqwest::header::HeaderMap, ExchangeError> {
        let token = self.get_token().await?;

        let mut headers = reqwest::header::HeaderMap::new();

        // 상수 문자열은 컴파일 타임에 검증되므로 unwrap() 안전
        headers.insert(
            "Content-Type",
            "application/json; charset=utf-8".parse().unwrap(),
        );

        headers.insert(
            "authorization",
            token.auth_header().parse().map_err(|_| {
                ExchangeError::ParseError(
                    "authorization 헤더에 유효하지 않은 문자 포함".to_string(),
                )
            })?,
        );
        headers.insert(
            "appkey",
            self.config.app_key.parse().map_err(|_| {
                ExchangeError::ParseError("app_key에 유효하지 않은 문자 포함".to_string())
            })?,
        );
        headers.insert(
            "appsecret",
            self.config.app_secret.parse().map_err(|_| {
                ExchangeError::ParseError("app_secret에 유효하지 않은 문자 포함".to_string())
            })?,
        );
        headers.insert(
            "tr_id",
            tr_id.parse().map_err(|_| {
                ExchangeError::ParseError(format!("tr_id에 유효하지 않은 문자 포함: {}", tr_id))
            })?,
        );
        headers.insert(
            "custtype",
            self.config.cust_type.parse().map_err(|_| {
                ExchangeError::ParseError("custtype에 유효하지 않은 문자 포함".to_string())
            })?,
        );

        if let Some(cont) = tr_cont {
            headers.insert(
                "tr_cont",
                cont.parse().map_err(|_| {
                    ExchangeError::ParseError("tr_cont에 유효하지 않은 문자 포함".to_string())
                })?,
            );
        }

        Ok(headers)
    }

    /// 설정 반환.
    pub fn config(&self) -> &KisConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_state_expiry() {
        let token = TokenState {
            access_token: "test".to_string(),
            token_type: "Bearer".to_string(),
            expires_at: Utc::now() + Duration::hours(24),
        };

        assert!(!token.is_expired_or_expiring());
        assert_eq!(token.auth_header(), "Bearer test");
    }

    #[test]
    fn test_token_state_expiring() {
        let token = TokenState {
            access_token: "test".to_string(),
            token_type: "Bearer".to_string(),
            expires_at: Utc::now() + Duration::minutes(5),
        };

        // 10분 임계값 안쪽
        assert!(token.is_expired_or_expiring());
    }

    #[tokio::test]
    async fn test_token_issue_and_cache() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok123","token_type":"Bearer","expires_in":86400}"#)
            .expect(1)
            .create_async()
            .await;

        let config = KisConfig::new("key".to_string(), "secret".to_string())
            .with_base_url(server.url());
        let limiter = Arc::new(RateLimiter::new(None, 50, 200));
        let oauth = KisOAuth::new(config, limiter).unwrap();

        let t1 = oauth.get_token().await.unwrap();
        let t2 = oauth.get_token().await.unwrap();

        assert_eq!(t1.access_token, "tok123");
        // 두 번째 호출은 캐시에서
        assert_eq!(t2.access_token, "tok123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_oauth_error_surfaces_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth2/token")
            .with_status(403)
            .with_body(
                r#"{"error_code":"EGW00103","error_description":"유효하지 않은 AppKey입니다."}"#,
            )
            .create_async()
            .await;

        let config = KisConfig::new("key".to_string(), "secret".to_string())
            .with_base_url(server.url());
        let limiter = Arc::new(RateLimiter::new(None, 50, 200));
        let oauth = KisOAuth::new(config, limiter).unwrap();

        let err = oauth.get_token().await.unwrap_err();
        assert!(err.is_auth_error());
    }
}
