//! KRX 정보데이터시스템 VKOSPI 시가 조회.
//!
//! KRX 응답은 배포 시점마다 래핑 구조와 필드 대소문자가 달라, 고정
//! 경로 대신 JSON 트리 전체를 BFS로 훑어 변동성지수 행을 찾고,
//! 시가 필드도 알려진 이름 후보를 순서대로 시도합니다.

use std::collections::{HashSet, VecDeque};

use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use weather_core::calendar::{adjust_to_business_day, previous_business_day, today_kst};
use weather_core::domain::VkospiOpening;
use weather_core::num::first_numeric_field;

use crate::error::{DataError, Result};

/// 시가를 찾을 필드 이름 후보 (순서 유지).
const OPENING_PRICE_FIELDS: &[&str] = &[
    "OPNPRC_IDX",
    "opnprc_idx",
    "OPNPRC",
    "opnprc",
    "OPEN",
    "open",
    "OPN_PRC",
    "opn_prc",
    "OPRPRC",
    "oprprc",
    "OPEN_PRC",
    "open_prc",
];

/// 행에서 지수 식별자/이름을 찾을 필드.
const IDX_FIELDS: &[&str] = &[
    "IDX_ID",
    "idx_id",
    "IDX_CD",
    "idx_cd",
    "IDX_IND_CD",
    "idx_ind_cd",
    "IDX_IND_NM",
    "idx_ind_nm",
    "IDX_NM",
    "idx_nm",
    "IDX_SRNO",
    "idx_srno",
];

/// KRX API 설정.
#[derive(Debug, Clone)]
pub struct KrxConfig {
    pub base_url: String,
    pub vkospi_path: String,
    pub api_key: String,
    pub referer: Option<String>,
    pub timeout_ms: u64,
    /// 영업일 fallback 예산 (시도할 날짜의 총수)
    pub max_fallback: usize,
    /// 시도할 지수 식별자 후보
    pub index_ids: Vec<String>,
    /// 지수 이름 비교 후보
    pub name_candidates: Vec<String>,
}

impl KrxConfig {
    /// api_key만 받고 나머지는 기본값으로 생성.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: "https://data-dbg.krx.co.kr".to_string(),
            vkospi_path: "/svc/apis/idx/drvprod_dd_trd".to_string(),
            api_key: api_key.into(),
            referer: None,
            timeout_ms: 7_000,
            max_fallback: 15,
            index_ids: ["VKOSPI", "KRDRVFIKR", "KRDRVFIKR01", "901", "KRX:VKOSPI"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            name_candidates: [
                "코스피 200 변동성지수",
                "KOSPI200 변동성지수",
                "KOSPI 200 Volatility Index",
                "KOSPI200 Volatility Index",
                "코스피200 변동성지수",
            ]
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

    /// 환경 변수에서 설정 생성.
    ///
    /// # 환경 변수
    /// - `KRX_API_KEY` (필수)
    /// - `KRX_API_BASE_URL`, `KRX_API_VKOSPI_PATH`, `KRX_API_REFERER`,
    ///   `KRX_API_TIMEOUT_MS`, `KRX_VKOSPI_MAX_FALLBACK`
    /// - `KRX_VKOSPI_IDS`, `KRX_VKOSPI_NAMES` (쉼표 구분)
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("KRX_API_KEY").ok()?;
        let mut config = Self::new(api_key);

        if let Ok(url) = std::env::var("KRX_API_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(path) = std::env::var("KRX_API_VKOSPI_PATH") {
            config.vkospi_path = path;
        }
        config.referer = std::env::var("KRX_API_REFERER").ok();
        if let Some(ms) = std::env::var("KRX_API_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout_ms = ms;
        }
        if let Some(n) = std::env::var("KRX_VKOSPI_MAX_FALLBACK")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.max_fallback = n;
        }
        if let Ok(ids) = std::env::var("KRX_VKOSPI_IDS") {
            let parsed = split_csv(&ids);
            if !parsed.is_empty() {
                config.index_ids = parsed;
            }
        }
        if let Ok(names) = std::env::var("KRX_VKOSPI_NAMES") {
            let parsed = split_csv(&names);
            if !parsed.is_empty() {
                config.name_candidates = parsed;
            }
        }

        Some(config)
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if self.vkospi_path.starts_with('/') {
            format!("{}{}", base, self.vkospi_path)
        } else {
            format!("{}/{}", base, self.vkospi_path)
        }
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// VKOSPI 시가 조회기.
pub struct VkospiResolver {
    config: KrxConfig,
    client: Client,
}

impl VkospiResolver {
    /// 새 조회기 생성.
    pub fn new(config: KrxConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| DataError::ConfigError(format!("HTTP client 생성 실패: {}", e)))?;

        Ok(Self { config, client })
    }

    /// 기준일의 VKOSPI 시가 조회.
    ///
    /// 기준일에 데이터가 없으면 직전 영업일로 물러납니다. `max_fallback`은
    /// 시도하는 날짜의 총수라서, 예산을 다 쓰면 시도 이력의 길이가
    /// 정확히 예산과 같은 상태로 시가 없이 성공을 돌려줍니다. 전송
    /// 오류만 `Err`입니다.
    pub async fn fetch_opening(&self, bas_dd: Option<&str>) -> Result<VkospiOpening> {
        let initial = adjust_to_business_day(bas_dd.unwrap_or(&today_kst()));
        let mut trail: Vec<String> = Vec::new();
        let mut target = initial;
        let budget = self.config.max_fallback.max(1);

        loop {
            if let Some((price, idx_id)) = self.try_date(&target).await? {
                return Ok(VkospiOpening {
                    business_date: target,
                    opening_price: Some(price),
                    matched_index_id: Some(idx_id),
                    fallback_trail: trail,
                });
            }

            trail.push(target.clone());

            if trail.len() >= budget {
                warn!(?trail, "날짜 예산 안에서 VKOSPI 데이터를 찾지 못함");
                return Ok(VkospiOpening {
                    business_date: target,
                    opening_price: None,
                    matched_index_id: None,
                    fallback_trail: trail,
                });
            }

            target = previous_business_day(&target);
        }
    }

    /// 한 기준일에 대해 후보 식별자들을 GET → POST 순으로 시도.
    async fn try_date(&self, target_date: &str) -> Result<Option<(f64, String)>> {
        for idx_id in &self.config.index_ids {
            let idx_id = idx_id.trim();
            if idx_id.is_empty() {
                continue;
            }

            // 1) 문서화된 GET + 쿼리 파라미터
            if let Some(body) = self.call(Method::GET, target_date, idx_id).await? {
                if let Some(price) = self.match_and_extract(&body, idx_id) {
                    debug!(target_date, idx_id, price, "VKOSPI GET 매칭");
                    return Ok(Some((price, idx_id.to_string())));
                }
            }

            // 2) 구버전 샘플의 POST + InBlock 본문
            if let Some(body) = self.call(Method::POST, target_date, idx_id).await? {
                if let Some(price) = self.match_and_extract(&body, idx_id) {
                    debug!(target_date, idx_id, price, "VKOSPI POST 매칭");
                    return Ok(Some((price, idx_id.to_string())));
                }
            }
        }

        Ok(None)
    }

    fn match_and_extract(&self, body: &Value, idx_id: &str) -> Option<f64> {
        let row = pick_vkospi_row(body, Some(idx_id), &self.config.name_candidates)?;
        first_numeric_field(row, OPENING_PRICE_FIELDS)
    }

    /// 엔드포인트 호출. 메서드 불일치(404/405)는 `None`으로 삼키고,
    /// 그 밖의 HTTP 실패는 오류로 전파합니다.
    async fn call(
        &self,
        method: Method,
        target_date: &str,
        idx_id: &str,
    ) -> Result<Option<Value>> {
        let url = self.config.endpoint();
        let is_post = method == Method::POST;

        let mut request = self
            .client
            .request(method, &url)
            .header("Content-Type", "application/json; charset=UTF-8")
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("apikey", &self.config.api_key)
            .header("x-api-key", &self.config.api_key);

        if let Some(referer) = &self.config.referer {
            request = request.header("Referer", referer);
        }

        request = if is_post {
            request.json(&json!({
                "InBlock_1": {
                    "basDd": target_date,
                    "idxId": idx_id,
                    "idxCd": idx_id,
                    "idxIndCd": idx_id,
                }
            }))
        } else {
            request.query(&[
                ("basDd", target_date),
                ("idxId", idx_id),
                ("idxCd", idx_id),
                ("idxIndCd", idx_id),
            ])
        };

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND || (!is_post && status == StatusCode::METHOD_NOT_ALLOWED)
        {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DataError::FetchError(format!(
                "KRX {} 응답: {}",
                status, body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| DataError::ParseError(format!("KRX 응답 파싱 실패: {}", e)))?;
        Ok(Some(body))
    }
}

/// JSON 트리에서 변동성지수 행을 BFS로 탐색.
///
/// 방문 집합은 노드 주소 기준이라 공유 참조가 있어도 무한 순회하지
/// 않습니다.
fn pick_vkospi_row<'a>(
    payload: &'a Value,
    target_id: Option<&str>,
    name_candidates: &[String],
) -> Option<&'a Value> {
    let mut queue: VecDeque<&'a Value> = VecDeque::new();
    let mut visited: HashSet<*const Value> = HashSet::new();
    queue.push_back(payload);

    while let Some(current) = queue.pop_front() {
        if !visited.insert(current as *const Value) {
            continue;
        }

        match current {
            Value::Array(items) => {
                for item in items {
                    if item.is_object() && matches_idx_row(item, target_id, name_candidates) {
                        return Some(item);
                    }
                    if item.is_object() || item.is_array() {
                        queue.push_back(item);
                    }
                }
            }
            Value::Object(map) => {
                if matches_idx_row(current, target_id, name_candidates) {
                    return Some(current);
                }
                for value in map.values() {
                    if value.is_object() || value.is_array() {
                        queue.push_back(value);
                    }
                }
            }
            _ => {}
        }
    }

    None
}

/// 행이 변동성지수인지 판정.
fn matches_idx_row(row: &Value, target_id: Option<&str>, name_candidates: &[String]) -> bool {
    let normalized_target = target_id
        .unwrap_or_default()
        .trim()
        .trim_start_matches("KRX:")
        .trim_start_matches("krx:")
        .to_lowercase();

    let values: Vec<String> = IDX_FIELDS
        .iter()
        .filter_map(|name| row.get(name))
        .filter_map(|v| match v {
            Value::String(s) => Some(s.trim().to_lowercase()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect();

    let lower_name = ["IDX_NM", "idx_nm"]
        .iter()
        .find_map(|name| row.get(name).and_then(|v| v.as_str()))
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    let lower_class = ["IDX_CLSS", "idx_clss"]
        .iter()
        .find_map(|name| row.get(name).and_then(|v| v.as_str()))
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    if !normalized_target.is_empty() {
        if values.iter().any(|v| *v == normalized_target) {
            return true;
        }
        if normalized_target == "vkospi" && values.iter().any(|v| v.contains("vkospi")) {
            return true;
        }
    } else if values.iter().any(|v| v.contains("vkospi")) {
        return true;
    }

    if values.iter().any(|v| v == "vkospi" || v == "901") {
        return true;
    }

    if lower_name.contains("코스피") && lower_name.contains("변동성") {
        return true;
    }
    if lower_class.contains("변동성") {
        return true;
    }
    if lower_name.contains("volatility") && lower_name.contains("kospi") {
        return true;
    }

    name_candidates.iter().any(|candidate| {
        let normalized = candidate.trim().to_lowercase();
        !normalized.is_empty()
            && values
                .iter()
                .any(|v| *v == normalized || v.contains(&normalized))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn test_config(url: &str) -> KrxConfig {
        let mut config = KrxConfig::new("test-key").with_base_url(url);
        config.index_ids = vec!["VKOSPI".to_string()];
        config.max_fallback = 2;
        config
    }

    #[test]
    fn test_matcher_exact_id() {
        let row = serde_json::json!({"IDX_ID": "VKOSPI", "OPNPRC_IDX": "17.42"});
        assert!(matches_idx_row(&row, Some("VKOSPI"), &[]));
        assert!(!matches_idx_row(
            &serde_json::json!({"IDX_ID": "KOSPI200"}),
            Some("VKOSPI"),
            &[]
        ));
    }

    #[test]
    fn test_matcher_korean_name_heuristics() {
        let row = serde_json::json!({"IDX_NM": "코스피 200 변동성지수"});
        assert!(matches_idx_row(&row, Some("nonexistent"), &[]));

        let row = serde_json::json!({"IDX_CLSS": "변동성"});
        assert!(matches_idx_row(&row, Some("nonexistent"), &[]));

        let row = serde_json::json!({"IDX_NM": "KOSPI 200 Volatility Index"});
        assert!(matches_idx_row(&row, Some("nonexistent"), &[]));
    }

    #[test]
    fn test_bfs_finds_nested_row() {
        let payload = serde_json::json!({
            "wrapper": {
                "blocks": [
                    {"rows": [
                        {"IDX_NM": "코스피 200", "OPNPRC_IDX": "350.1"},
                        {"IDX_NM": "코스피 200 변동성지수", "OPNPRC_IDX": "17.42"}
                    ]}
                ]
            }
        });

        let row = pick_vkospi_row(&payload, Some("VKOSPI"), &[]).unwrap();
        assert_eq!(
            first_numeric_field(row, OPENING_PRICE_FIELDS),
            Some(17.42)
        );
    }

    #[test]
    fn test_opening_price_field_order() {
        let row = serde_json::json!({"opnprc": "18.9", "OPNPRC_IDX": "17.42"});
        assert_eq!(first_numeric_field(&row, OPENING_PRICE_FIELDS), Some(17.42));

        let row = serde_json::json!({"open_prc": "1,234.5"});
        assert_eq!(first_numeric_field(&row, OPENING_PRICE_FIELDS), Some(1234.5));
    }

    #[tokio::test]
    async fn test_get_405_falls_back_to_post() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/svc/apis/idx/drvprod_dd_trd")
            .match_query(Matcher::Any)
            .with_status(405)
            .create_async()
            .await;
        server
            .mock("POST", "/svc/apis/idx/drvprod_dd_trd")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "OutBlock_1": [{"IDX_ID": "VKOSPI", "OPNPRC_IDX": "17.42"}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let resolver = VkospiResolver::new(test_config(&server.url())).unwrap();
        let outcome = resolver.fetch_opening(Some("20260828")).await.unwrap();

        assert_eq!(outcome.opening_price, Some(17.42));
        assert_eq!(outcome.business_date, "20260828");
        assert_eq!(outcome.matched_index_id.as_deref(), Some("VKOSPI"));
        assert!(outcome.fallback_trail.is_empty());
    }

    #[tokio::test]
    async fn test_budget_exhausted_returns_trail() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/svc/apis/idx/drvprod_dd_trd")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"OutBlock_1": []}"#)
            .expect_at_least(2)
            .create_async()
            .await;
        server
            .mock("POST", "/svc/apis/idx/drvprod_dd_trd")
            .with_status(200)
            .with_body(r#"{"OutBlock_1": []}"#)
            .expect_at_least(2)
            .create_async()
            .await;

        let config = test_config(&server.url());
        let budget = config.max_fallback;
        let resolver = VkospiResolver::new(config).unwrap();
        let outcome = resolver.fetch_opening(Some("20260828")).await.unwrap();

        assert_eq!(outcome.opening_price, None);
        // 시도한 날짜 수 = 예산
        assert_eq!(outcome.fallback_trail.len(), budget);
        assert_eq!(
            outcome.fallback_trail,
            vec!["20260828".to_string(), "20260827".to_string()]
        );
    }

    #[tokio::test]
    async fn test_server_error_propagates() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/svc/apis/idx/drvprod_dd_trd")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let resolver = VkospiResolver::new(test_config(&server.url())).unwrap();
        let err = resolver.fetch_opening(Some("20260828")).await.unwrap_err();
        assert!(matches!(err, DataError::FetchError(_)));
    }
}
