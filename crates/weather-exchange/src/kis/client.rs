//! KIS 시세 조회 REST API 클라이언트.
//!
//! # 지원 기능
//!
//! - 종목 현재가 조회
//! - 지수 현재가 조회
//! - 종목 뉴스 제목 조회
//! - 기간별 일봉 조회
//! - 업종별 지수 시세 조회
//! - 업종 일자별 등락/거래량 조회 (연속 조회 + 영업일 fallback 포함)

use std::sync::Arc;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use weather_core::calendar::{adjust_to_business_day, previous_business_day, today_kst};
use weather_core::domain::{BreadthRow, VolumePoint};
use weather_core::num::{first_numeric_field, number_from_json};

use super::auth::KisOAuth;
use super::tr_id;
use crate::throttle::RateLimiter;
use crate::ExchangeError;

/// 연속 조회 종료 마커. tr_cont 헤더가 없거나 이 값이면 마지막 페이지.
const TR_CONT_TERMINAL: &[&str] = &["F", "0"];

/// 일자별 지수 행에서 날짜를 찾을 필드 후보.
const DATE_FIELDS: &[&str] = &["stck_bsop_date", "bsop_date", "bstp_nmix_bsop_date", "date"];
/// 일자별 지수 행에서 거래량을 찾을 필드 후보.
const VOLUME_FIELDS: &[&str] = &["acml_vol", "tot_vol", "volume"];

/// 뉴스 조회 파라미터.
#[derive(Debug, Clone)]
pub struct NewsParams {
    pub start_date: String,
    pub start_time: String,
    pub rank_sort: String,
    pub limit: usize,
}

impl Default for NewsParams {
    fn default() -> Self {
        Self {
            start_date: String::new(),
            start_time: String::new(),
            rank_sort: "01".to_string(),
            limit: 40,
        }
    }
}

/// 업종별 지수 시세 조회 파라미터.
#[derive(Debug, Clone)]
pub struct CategoryPriceParams {
    pub market_div: String,
    pub index_code: String,
    pub screen_code: String,
    pub market_cls_code: String,
    pub belong_cls_code: String,
}

impl Default for CategoryPriceParams {
    fn default() -> Self {
        Self {
            market_div: "U".to_string(),
            index_code: "0001".to_string(),
            screen_code: "20214".to_string(),
            market_cls_code: "K".to_string(),
            belong_cls_code: "0".to_string(),
        }
    }
}

/// 업종별 지수 시세 응답.
#[derive(Debug, Clone)]
pub struct CategoryPrice {
    /// 지수 요약 행
    pub output1: Option<Value>,
    /// 구성 업종 행 목록
    pub output2: Vec<Value>,
}

/// 업종 일자별 지수 조회 파라미터.
#[derive(Debug, Clone)]
pub struct BreadthParams {
    pub index_code: String,
    pub market_div: String,
    pub period: String,
    /// 시작일 (`YYYYMMDD`). 없으면 오늘(KST)에서 영업일로 보정.
    pub start_date: Option<String>,
    /// 연속 조회 페이지 상한
    pub max_pages: usize,
    /// 영업일 fallback 예산
    pub fallback_days: usize,
}

impl Default for BreadthParams {
    fn default() -> Self {
        Self {
            index_code: "0001".to_string(),
            market_div: "U".to_string(),
            period: "D".to_string(),
            start_date: None,
            max_pages: 5,
            fallback_days: 5,
        }
    }
}

/// KIS 시세 조회 클라이언트.
///
/// `KisOAuth`와 `RateLimiter`를 `Arc`로 공유하여 동일한 앱키를 쓰는
/// 컴포넌트들이 토큰과 호출 슬롯을 함께 씁니다.
pub struct KisClient {
    oauth: Arc<KisOAuth>,
    limiter: Arc<RateLimiter>,
    client: Client,
}

impl KisClient {
    /// 공유된 OAuth/조율기로 클라이언트 생성.
    ///
    /// # Errors
    /// HTTP 클라이언트 생성에 실패하면 `ExchangeError::NetworkError`를 반환합니다.
    pub fn new(oauth: Arc<KisOAuth>, limiter: Arc<RateLimiter>) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(oauth.config().timeout_secs))
            .build()
            .map_err(|e| ExchangeError::NetworkError(format!("HTTP client 생성 실패: {}", e)))?;

        Ok(Self {
            oauth,
            limiter,
            client,
        })
    }

    /// 내부 OAuth 참조 반환.
    pub fn oauth(&self) -> &Arc<KisOAuth> {
        &self.oauth
    }

    // ========================================
    // Market Data APIs (시세 조회)
    // ========================================

    /// 종목 현재가 조회.
    ///
    /// # 인자
    /// * `ticker` - 종목코드 (예: "005930" 삼성전자)
    /// * `market` - 시장 구분 ("J" = 주식)
    pub async fn get_quote(&self, ticker: &str, market: &str) -> Result<Value, ExchangeError> {
        let url = format!(
            "{}/uapi/domestic-stock/v1/quotations/inquire-price",
            self.oauth.config().base_url
        );
        let headers = self.oauth.build_headers(tr_id::KR_PRICE, None).await?;

        self.limiter.acquire(tr_id::KR_PRICE).await;
        let response = self
            .client
            .get(&url)
            .headers(headers)
            .query(&[
                ("fid_cond_mrkt_div_code", market),
                ("fid_input_iscd", ticker),
            ])
            .send()
            .await?;

        let body = self.read_body(response).await?;
        self.check_envelope(&body)?;

        body.get("output")
            .cloned()
            .ok_or_else(|| ExchangeError::MissingField("output".to_string()))
    }

    /// 지수 현재가 조회.
    ///
    /// 응답이 `output`, `output1`, `output2` 어느 키 아래에 올지, 객체일지
    /// 배열일지 제공자가 정해주지 않으므로 후보를 순서대로 시도합니다.
    pub async fn get_index_quote(
        &self,
        index_code: &str,
        market: &str,
    ) -> Result<Value, ExchangeError> {
        let url = format!(
            "{}/uapi/domestic-stock/v1/quotations/inquire-index-price",
            self.oauth.config().base_url
        );
        let headers = self.oauth.build_headers(tr_id::KR_INDEX_PRICE, None).await?;

        self.limiter.acquire(tr_id::KR_INDEX_PRICE).await;
        let response = self
            .client
            .get(&url)
            .headers(headers)
            .query(&[
                ("FID_COND_MRKT_DIV_CODE", market),
                ("FID_INPUT_ISCD", index_code),
            ])
            .send()
            .await?;

        let body = self.read_body(response).await?;
        self.check_envelope(&body)?;

        for key in ["output", "output1", "output2"] {
            match body.get(key) {
                Some(Value::Array(items)) => {
                    if let Some(first) = items.first() {
                        return Ok(first.clone());
                    }
                }
                Some(v) if v.is_object() => return Ok(v.clone()),
                _ => {}
            }
        }

        Err(ExchangeError::MissingField("output".to_string()))
    }

    /// 종목 뉴스 제목 조회.
    pub async fn get_news(
        &self,
        ticker: &str,
        params: &NewsParams,
    ) -> Result<Vec<Value>, ExchangeError> {
        let url = format!(
            "{}/uapi/domestic-stock/v1/quotations/news-title",
            self.oauth.config().base_url
        );
        let headers = self.oauth.build_headers(tr_id::KR_NEWS_TITLE, None).await?;
        let limit = params.limit.to_string();

        self.limiter.acquire(tr_id::KR_NEWS_TITLE).await;
        let response = self
            .client
            .get(&url)
            .headers(headers)
            .query(&[
                ("FID_NEWS_OFER_ENTP_CODE", "2"),
                ("FID_COND_MRKT_CLS_CODE", "00"),
                ("FID_INPUT_ISCD", ticker),
                ("FID_TITL_CNTT", ""),
                ("FID_INPUT_DATE_1", params.start_date.as_str()),
                ("FID_INPUT_HOUR_1", params.start_time.as_str()),
                ("FID_RANK_SORT_CLS_CODE", params.rank_sort.as_str()),
                ("FID_INPUT_SRNO", "1"),
                ("FID_ROW_COUNT", limit.as_str()),
            ])
            .send()
            .await?;

        let body = self.read_body(response).await?;
        self.check_envelope(&body)?;

        for key in ["output", "output1", "list"] {
            if let Some(Value::Array(items)) = body.get(key) {
                return Ok(items.clone());
            }
        }

        Ok(Vec::new())
    }

    /// 기간별 일봉 조회.
    ///
    /// `period`는 `1M`/`3M`/`6M`/`1Y` 또는 KIS 기간 코드를 그대로 받습니다.
    pub async fn get_daily_chart(
        &self,
        ticker: &str,
        market: &str,
        period: &str,
    ) -> Result<Vec<Value>, ExchangeError> {
        let period_code = match period {
            "1M" => "1",
            "3M" => "3",
            "6M" => "6",
            "1Y" => "12",
            other => other,
        };

        let url = format!(
            "{}/uapi/domestic-stock/v1/quotations/inquire-daily-itemchartprice",
            self.oauth.config().base_url
        );
        let headers = self.oauth.build_headers(tr_id::KR_DAILY_CHART, None).await?;

        self.limiter.acquire(tr_id::KR_DAILY_CHART).await;
        let response = self
            .client
            .get(&url)
            .headers(headers)
            .query(&[
                ("fid_cond_mrkt_div_code", market),
                ("fid_input_iscd", ticker),
                ("fid_period_div_code", period_code),
                ("fid_org_adj_prc", "0"),
                ("fid_input_date_1", ""),
                ("fid_input_date_2", ""),
            ])
            .send()
            .await?;

        let body = self.read_body(response).await?;
        self.check_envelope(&body)?;

        for key in ["output2", "output1", "output"] {
            if let Some(Value::Array(items)) = body.get(key) {
                return Ok(items.clone());
            }
        }

        Ok(Vec::new())
    }

    /// 업종별 지수 시세 조회.
    pub async fn get_index_category_price(
        &self,
        params: &CategoryPriceParams,
    ) -> Result<CategoryPrice, ExchangeError> {
        let url = format!(
            "{}/uapi/domestic-stock/v1/quotations/inquire-index-category-price",
            self.oauth.config().base_url
        );
        let headers = self
            .oauth
            .build_headers(tr_id::KR_INDEX_CATEGORY_PRICE, None)
            .await?;

        self.limiter.acquire(tr_id::KR_INDEX_CATEGORY_PRICE).await;
        let response = self
            .client
            .get(&url)
            .headers(headers)
            .query(&[
                ("FID_COND_MRKT_DIV_CODE", params.market_div.as_str()),
                ("FID_INPUT_ISCD", params.index_code.as_str()),
                ("FID_COND_SCR_DIV_CODE", params.screen_code.as_str()),
                ("FID_MRKT_CLS_CODE", params.market_cls_code.as_str()),
                ("FID_BLNG_CLS_CODE", params.belong_cls_code.as_str()),
            ])
            .send()
            .await?;

        let body = self.read_body(response).await?;
        self.check_envelope(&body)?;

        let output2 = match body.get("output2") {
            Some(Value::Array(items)) => items.clone(),
            Some(v) if v.is_object() => vec![v.clone()],
            _ => Vec::new(),
        };

        Ok(CategoryPrice {
            output1: body.get("output1").cloned(),
            output2,
        })
    }

    /// 업종 일자별 등락 종목 수 조회.
    ///
    /// 날짜별로 연속 조회를 돌고, 사용 가능한 행이 하나도 없으면 직전
    /// 영업일로 물러나며 `fallback_days` 예산 안에서 재시도합니다.
    pub async fn get_index_daily_breadth(
        &self,
        params: &BreadthParams,
    ) -> Result<Vec<BreadthRow>, ExchangeError> {
        let start = adjust_to_business_day(
            params.start_date.as_deref().unwrap_or(&today_kst()),
        );
        let mut tried_dates = Vec::new();
        let mut current = start.clone();

        for _ in 0..=params.fallback_days {
            tried_dates.push(current.clone());
            let pages = self.fetch_daily_pages(params, &current).await?;

            let mut rows: Vec<BreadthRow> = pages
                .iter()
                .filter_map(|row| parse_breadth_row(row))
                .collect();

            if !rows.is_empty() {
                rows.sort_by(|a, b| a.date.cmp(&b.date));
                rows.dedup_by(|a, b| a.date == b.date);
                return Ok(rows);
            }

            current = previous_business_day(&current);
        }

        warn!(
            index_code = %params.index_code,
            start = %start,
            ?tried_dates,
            "일자별 등락 조회 결과 없음 (fallback 소진)"
        );
        Ok(Vec::new())
    }

    /// 업종 일자별 거래량 조회.
    ///
    /// 등락 조회와 달리 fallback 예산 안의 모든 날짜를 훑어 거래량 행을
    /// 합치고, 날짜 기준으로 중복 제거 후 오름차순 정렬해 돌려줍니다.
    pub async fn get_index_daily_volumes(
        &self,
        params: &BreadthParams,
    ) -> Result<Vec<VolumePoint>, ExchangeError> {
        let start = adjust_to_business_day(
            params.start_date.as_deref().unwrap_or(&today_kst()),
        );
        let mut collected: Vec<VolumePoint> = Vec::new();
        let mut current = start;

        for _ in 0..=params.fallback_days {
            let pages = self.fetch_daily_pages(params, &current).await?;
            for row in &pages {
                let Some(date) = first_string_field(row, DATE_FIELDS) else {
                    continue;
                };
                let Some(volume) = first_numeric_field(row, VOLUME_FIELDS) else {
                    continue;
                };
                collected.push(VolumePoint { date, volume });
            }
            current = previous_business_day(&current);
        }

        collected.sort_by(|a, b| a.date.cmp(&b.date));
        // 같은 날짜는 마지막 행 유지
        collected.reverse();
        collected.dedup_by(|a, b| a.date == b.date);
        collected.reverse();
        Ok(collected)
    }

    /// 한 날짜에 대한 일자별 지수 연속 조회.
    ///
    /// tr_cont 응답 헤더가 종료 마커가 아닐 동안 `tr_cont: N` 헤더로
    /// 이어서 요청하며, `max_pages`로 페이지 수를 제한합니다.
    async fn fetch_daily_pages(
        &self,
        params: &BreadthParams,
        target_date: &str,
    ) -> Result<Vec<Value>, ExchangeError> {
        let url = format!(
            "{}/uapi/domestic-stock/v1/quotations/inquire-index-daily-price",
            self.oauth.config().base_url
        );

        let mut rows = Vec::new();
        let mut continuation = false;

        for page in 0..params.max_pages {
            let tr_cont = if continuation { Some("N") } else { None };
            let headers = self
                .oauth
                .build_headers(tr_id::KR_INDEX_DAILY_PRICE, tr_cont)
                .await?;

            self.limiter.acquire(tr_id::KR_INDEX_DAILY_PRICE).await;
            let response = self
                .client
                .get(&url)
                .headers(headers)
                .query(&[
                    ("FID_PERIOD_DIV_CODE", params.period.as_str()),
                    ("FID_COND_MRKT_DIV_CODE", params.market_div.as_str()),
                    ("FID_INPUT_ISCD", params.index_code.as_str()),
                    ("FID_INPUT_DATE_1", target_date),
                ])
                .send()
                .await?;

            let next_cont = response
                .headers()
                .get("tr_cont")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            let body = self.read_body(response).await?;
            self.check_envelope(&body)?;

            let mut page_rows = 0usize;
            for key in ["output1", "output2"] {
                match body.get(key) {
                    Some(Value::Array(items)) => {
                        page_rows += items.len();
                        rows.extend(items.iter().cloned());
                    }
                    Some(v) if v.is_object() => {
                        page_rows += 1;
                        rows.push(v.clone());
                    }
                    _ => {}
                }
            }
            debug!(target_date, page, page_rows, "일자별 지수 페이지 수신");

            match next_cont.as_deref() {
                None => break,
                Some(marker) if TR_CONT_TERMINAL.contains(&marker) => break,
                Some(_) => continuation = true,
            }
        }

        Ok(rows)
    }

    /// 응답 본문을 JSON으로 읽음. HTTP 에러 상태는 본문째 에러로 승격.
    async fn read_body(&self, response: reqwest::Response) -> Result<Value, ExchangeError> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ExchangeError::ApiError {
                code: status.as_u16().to_string(),
                message: text,
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| ExchangeError::ParseError(format!("응답 파싱 실패: {}", e)))
    }

    /// rt_cd 봉투 검사. 레이트리밋 코드는 `RateLimited`로 분류.
    fn check_envelope(&self, body: &Value) -> Result<(), ExchangeError> {
        let rt_cd = body.get("rt_cd").and_then(|v| v.as_str()).unwrap_or("0");
        if rt_cd == "0" {
            return Ok(());
        }

        let msg_cd = body.get("msg_cd").and_then(|v| v.as_str()).unwrap_or("");
        let msg1 = body.get("msg1").and_then(|v| v.as_str()).unwrap_or("");

        if self.oauth.config().is_rate_limit_code(msg_cd) {
            warn!(msg_cd, msg1, "KIS 레이트리밋 응답");
            return Err(ExchangeError::RateLimited);
        }

        Err(ExchangeError::ApiError {
            code: if msg_cd.is_empty() {
                rt_cd.to_string()
            } else {
                msg_cd.to_string()
            },
            message: msg1.to_string(),
        })
    }
}

/// 일자별 지수 행을 등락 행으로 변환. 날짜가 없거나 네 카운터가 모두
/// 비어 있으면 버립니다.
fn parse_breadth_row(row: &Value) -> Option<BreadthRow> {
    let date = first_string_field(row, DATE_FIELDS)?;

    let breadth = BreadthRow {
        date,
        advance: row.get("ascn_issu_cnt").and_then(number_from_json),
        decline: row.get("down_issu_cnt").and_then(number_from_json),
        unchanged: row.get("stnr_issu_cnt").and_then(number_from_json),
        upper: row.get("uplm_issu_cnt").and_then(number_from_json),
        lower: row.get("lslm_issu_cnt").and_then(number_from_json),
    };

    breadth.is_usable().then_some(breadth)
}

/// 후보 필드 이름을 순서대로 시도해 비어 있지 않은 문자열을 반환.
fn first_string_field(value: &Value, candidates: &[&str]) -> Option<String> {
    for name in candidates {
        if let Some(s) = value.get(name).and_then(|v| v.as_str()) {
            if !s.trim().is_empty() {
                return Some(s.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kis::config::KisConfig;
    use mockito::Matcher;
    use serde_json::json;

    async fn client_for(server: &mockito::Server) -> KisClient {
        let config =
            KisConfig::new("key".to_string(), "secret".to_string()).with_base_url(server.url());
        let limiter = Arc::new(RateLimiter::new(None, 50, 200));
        let oauth = Arc::new(KisOAuth::new(config, Arc::clone(&limiter)).unwrap());
        KisClient::new(oauth, limiter).unwrap()
    }

    async fn mock_token(server: &mut mockito::Server) -> mockito::Mock {
        server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok","token_type":"Bearer","expires_in":86400}"#)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_get_quote_returns_output() {
        let mut server = mockito::Server::new_async().await;
        mock_token(&mut server).await;
        server
            .mock("GET", "/uapi/domestic-stock/v1/quotations/inquire-price")
            .match_query(Matcher::UrlEncoded("fid_input_iscd".into(), "005930".into()))
            .with_status(200)
            .with_body(
                json!({
                    "rt_cd": "0",
                    "output": {"stck_prpr": "71,200", "prdy_ctrt": "1.25", "acml_vol": "1234567"}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = client_for(&server).await;
        let output = client.get_quote("005930", "J").await.unwrap();

        assert_eq!(
            first_numeric_field(&output, &["stck_prpr"]),
            Some(71200.0)
        );
    }

    #[tokio::test]
    async fn test_index_quote_candidate_extraction() {
        let mut server = mockito::Server::new_async().await;
        mock_token(&mut server).await;
        server
            .mock("GET", "/uapi/domestic-stock/v1/quotations/inquire-index-price")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "rt_cd": "0",
                    "output1": [{"bstp_nmix_prpr": "2650.11"}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = client_for(&server).await;
        let row = client.get_index_quote("0001", "U").await.unwrap();

        assert_eq!(
            first_numeric_field(&row, &["bstp_nmix_prpr"]),
            Some(2650.11)
        );
    }

    #[tokio::test]
    async fn test_rate_limit_code_classified() {
        let mut server = mockito::Server::new_async().await;
        mock_token(&mut server).await;
        server
            .mock(
                "GET",
                "/uapi/domestic-stock/v1/quotations/inquire-index-category-price",
            )
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({"rt_cd": "1", "msg_cd": "EGW00201", "msg1": "초당 거래건수를 초과하였습니다."})
                    .to_string(),
            )
            .create_async()
            .await;

        let client = client_for(&server).await;
        let err = client
            .get_index_category_price(&CategoryPriceParams::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ExchangeError::RateLimited));
    }

    #[tokio::test]
    async fn test_api_error_code_passthrough() {
        let mut server = mockito::Server::new_async().await;
        mock_token(&mut server).await;
        server
            .mock(
                "GET",
                "/uapi/domestic-stock/v1/quotations/inquire-index-category-price",
            )
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({"rt_cd": "1", "msg_cd": "EGW00123", "msg1": "잘못된 요청"}).to_string(),
            )
            .create_async()
            .await;

        let client = client_for(&server).await;
        let err = client
            .get_index_category_price(&CategoryPriceParams::default())
            .await
            .unwrap_err();

        match err {
            ExchangeError::ApiError { code, .. } => assert_eq!(code, "EGW00123"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_breadth_pagination_accumulates() {
        let mut server = mockito::Server::new_async().await;
        mock_token(&mut server).await;

        let row1 = json!({"stck_bsop_date": "20260827", "ascn_issu_cnt": "400", "down_issu_cnt": "380"});
        let row2 = json!({"stck_bsop_date": "20260828", "ascn_issu_cnt": "510", "down_issu_cnt": "290"});

        // 1페이지: 연속 마커
        server
            .mock("GET", "/uapi/domestic-stock/v1/quotations/inquire-index-daily-price")
            .match_query(Matcher::Any)
            .match_header("tr_cont", Matcher::Missing)
            .with_status(200)
            .with_header("tr_cont", "M")
            .with_body(json!({"rt_cd": "0", "output1": [row1]}).to_string())
            .create_async()
            .await;

        // 2페이지: 종료 마커
        server
            .mock("GET", "/uapi/domestic-stock/v1/quotations/inquire-index-daily-price")
            .match_query(Matcher::Any)
            .match_header("tr_cont", "N")
            .with_status(200)
            .with_header("tr_cont", "F")
            .with_body(json!({"rt_cd": "0", "output1": [row2]}).to_string())
            .create_async()
            .await;

        let client = client_for(&server).await;
        let params = BreadthParams {
            start_date: Some("20260828".to_string()),
            fallback_days: 0,
            ..Default::default()
        };
        let rows = client.get_index_daily_breadth(&params).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, "20260827");
        assert_eq!(rows[1].date, "20260828");
    }

    #[tokio::test]
    async fn test_breadth_business_day_fallback() {
        let mut server = mockito::Server::new_async().await;
        mock_token(&mut server).await;

        // 시작일(금요일 20260828)은 빈 응답
        server
            .mock("GET", "/uapi/domestic-stock/v1/quotations/inquire-index-daily-price")
            .match_query(Matcher::UrlEncoded(
                "FID_INPUT_DATE_1".into(),
                "20260828".into(),
            ))
            .with_status(200)
            .with_body(json!({"rt_cd": "0", "output1": []}).to_string())
            .create_async()
            .await;

        // 직전 영업일(목요일 20260827)에서 데이터
        server
            .mock("GET", "/uapi/domestic-stock/v1/quotations/inquire-index-daily-price")
            .match_query(Matcher::UrlEncoded(
                "FID_INPUT_DATE_1".into(),
                "20260827".into(),
            ))
            .with_status(200)
            .with_body(
                json!({
                    "rt_cd": "0",
                    "output1": [{"stck_bsop_date": "20260827", "ascn_issu_cnt": "400", "down_issu_cnt": "380"}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = client_for(&server).await;
        let params = BreadthParams {
            start_date: Some("20260828".to_string()),
            fallback_days: 2,
            ..Default::default()
        };
        let rows = client.get_index_daily_breadth(&params).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, "20260827");
    }

    #[tokio::test]
    async fn test_volumes_dedupe_and_sort() {
        let mut server = mockito::Server::new_async().await;
        mock_token(&mut server).await;

        // 두 날짜 모두 같은 구간이 겹쳐 내려오는 상황
        server
            .mock("GET", "/uapi/domestic-stock/v1/quotations/inquire-index-daily-price")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "rt_cd": "0",
                    "output2": [
                        {"stck_bsop_date": "20260828", "acml_vol": "900000"},
                        {"stck_bsop_date": "20260827", "acml_vol": "850000"}
                    ]
                })
                .to_string(),
            )
            .expect(2)
            .create_async()
            .await;

        let client = client_for(&server).await;
        let params = BreadthParams {
            start_date: Some("20260828".to_string()),
            fallback_days: 1,
            ..Default::default()
        };
        let rows = client.get_index_daily_volumes(&params).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, "20260827");
        assert_eq!(rows[1].date, "20260828");
        assert_eq!(rows[1].volume, 900000.0);
    }

    #[test]
    fn test_breadth_row_discards_counterless_rows() {
        let row = json!({"stck_bsop_date": "20260828", "stnr_issu_cnt": "12"});
        assert!(parse_breadth_row(&row).is_none());

        let row = json!({"stck_bsop_date": "20260828", "ascn_issu_cnt": "400"});
        assert!(parse_breadth_row(&row).is_some());
    }
}
