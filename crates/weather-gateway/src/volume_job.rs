//! KOSPI 거래량 배수 백그라운드 잡.
//!
//! 일정 주기로 당일 누적 거래량을 최근 영업일 평균과 비교해
//! `macro:volume:ratio:{index}` 키에 캐시합니다. 사이클은 한 번에 하나만
//! 돌며, 다음 실행은 이전 사이클이 끝난 뒤에 예약됩니다.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use weather_core::domain::{VolumePoint, VolumeRatio};
use weather_core::first_numeric_field;
use weather_data::RedisCache;
use weather_exchange::{BreadthParams, CategoryPriceParams, ExchangeError, KisClient};

use crate::config::{GatewayConfig, VolumeJobConfig};
use crate::error::{GatewayError, Result};

/// 거래량 필드 후보 (업종별 지수 요약 행).
const VOLUME_FIELDS: &[&str] = &["acml_vol", "tot_vol", "volume"];

/// 거래량 배수 캐시 키.
pub fn ratio_key(index: &str) -> String {
    format!("macro:volume:ratio:{}", index)
}

/// 거래량 이력 캐시 키.
pub fn history_key(index: &str) -> String {
    format!("macro:volume:history:{}", index)
}

/// 사이클 종료 상태. 다음 대기 시간을 결정합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Success,
    Failed,
    RateLimited,
}

/// 상태별 다음 대기 시간 (jitter 제외).
fn next_delay(config: &VolumeJobConfig, outcome: CycleOutcome) -> Duration {
    match outcome {
        CycleOutcome::Success => config.interval(),
        CycleOutcome::Failed => config.error_interval(),
        CycleOutcome::RateLimited => config.rate_limit_interval(),
    }
}

/// 최근 `lookback` 영업일 평균 거래량.
///
/// 평균이 0 이하이거나 유한하지 않으면 계산에 쓸 수 없습니다.
fn average_volume(points: &[VolumePoint], lookback: usize) -> Option<f64> {
    if points.is_empty() {
        return None;
    }
    let window = if points.len() > lookback {
        &points[points.len() - lookback..]
    } else {
        points
    };
    let avg = window.iter().map(|p| p.volume).sum::<f64>() / window.len() as f64;
    if avg.is_finite() && avg > 0.0 {
        Some(avg)
    } else {
        None
    }
}

/// 거래량 배수 잡.
pub struct VolumeRatioJob {
    client: Arc<KisClient>,
    cache: RedisCache,
    config: GatewayConfig,
}

impl VolumeRatioJob {
    /// 새 잡 생성.
    pub fn new(client: Arc<KisClient>, cache: RedisCache, config: GatewayConfig) -> Self {
        Self {
            client,
            cache,
            config,
        }
    }

    /// 잡 루프 시작. 토큰이 취소되면 깨끗하게 종료합니다.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let job = &self.config.volume_job;
            info!(
                index_code = %self.config.index_code,
                interval_secs = job.interval_secs,
                "거래량 배수 잡 시작"
            );

            let mut delay =
                Duration::from_secs(job.initial_delay_secs) + jitter(job.jitter_secs);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("거래량 배수 잡 종료");
                        break;
                    }
                    _ = sleep(delay) => {}
                }

                let outcome = self.run_cycle().await;
                delay = next_delay(job, outcome) + jitter(job.jitter_secs);
            }
        })
    }

    /// 한 사이클 실행. 일시적 오류는 재시도하고 rate limit은 즉시 중단.
    async fn run_cycle(&self) -> CycleOutcome {
        let job = &self.config.volume_job;

        for attempt in 1..=job.max_attempts {
            match self.try_once().await {
                Ok(ratio) => {
                    info!(
                        ratio = ratio.ratio,
                        volume = ratio.volume,
                        avg_volume = ratio.avg_volume,
                        "거래량 배수 갱신"
                    );
                    return CycleOutcome::Success;
                }
                Err(GatewayError::Exchange(ExchangeError::RateLimited)) => {
                    warn!("호출 한도 초과, 사이클 중단 후 간격 연장");
                    return CycleOutcome::RateLimited;
                }
                Err(e) => {
                    error!(attempt, error = %e, "거래량 배수 계산 실패");
                    if attempt < job.max_attempts {
                        sleep(Duration::from_secs(
                            job.retry_backoff_secs * attempt as u64,
                        ))
                        .await;
                    }
                }
            }
        }

        CycleOutcome::Failed
    }

    async fn try_once(&self) -> Result<VolumeRatio> {
        let volume = self.snapshot_volume().await?;
        let history = self.load_history().await?;

        let job = &self.config.volume_job;
        let avg_volume = average_volume(&history, job.lookback_days).ok_or_else(|| {
            GatewayError::InvalidData("평균 거래량이 0이거나 유효하지 않음".to_string())
        })?;

        let window_len = history.len().min(job.lookback_days);
        let ratio = VolumeRatio {
            ratio: volume / avg_volume * 100.0,
            volume,
            prev_volume: history.last().map(|p| p.volume),
            avg_volume,
            history_days: window_len,
            fetched_at: Utc::now(),
        };

        self.cache
            .set_with_ttl(
                &ratio_key(&self.config.index_code),
                &ratio,
                job.result_ttl_secs(),
            )
            .await
            .map_err(GatewayError::Data)?;

        Ok(ratio)
    }

    /// 업종별 지수 시세에서 당일 누적 거래량 추출.
    async fn snapshot_volume(&self) -> Result<f64> {
        let params = CategoryPriceParams {
            index_code: self.config.index_code.clone(),
            ..CategoryPriceParams::default()
        };
        let snapshot = self.client.get_index_category_price(&params).await?;

        snapshot
            .output1
            .as_ref()
            .and_then(|row| first_numeric_field(row, VOLUME_FIELDS))
            .ok_or_else(|| {
                GatewayError::InvalidData("지수 시세 응답에 거래량 없음".to_string())
            })
    }

    /// 거래량 이력 로드. 캐시에 lookback 이상 남아 있으면 재사용합니다.
    async fn load_history(&self) -> Result<Vec<VolumePoint>> {
        let key = history_key(&self.config.index_code);
        let job = &self.config.volume_job;

        match self.cache.get::<Vec<VolumePoint>>(&key).await {
            Ok(Some(cached)) if cached.len() >= job.lookback_days => return Ok(cached),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "거래량 이력 캐시 읽기 실패"),
        }

        let params = BreadthParams {
            index_code: self.config.index_code.clone(),
            max_pages: self.config.breadth_max_pages,
            fallback_days: self.config.breadth_fallback_days,
            ..BreadthParams::default()
        };
        let history = self.client.get_index_daily_volumes(&params).await?;
        if history.is_empty() {
            return Err(GatewayError::InvalidData(
                "거래량 이력 응답 비어 있음".to_string(),
            ));
        }

        if let Err(e) = self
            .cache
            .set_with_ttl(&key, &history, job.history_ttl_secs)
            .await
        {
            warn!(error = %e, "거래량 이력 캐시 기록 실패");
        }

        Ok(history)
    }
}

/// `0..=max_secs` 범위 무작위 jitter.
fn jitter(max_secs: u64) -> Duration {
    if max_secs == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_secs * 1_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_config() -> VolumeJobConfig {
        VolumeJobConfig {
            interval_secs: 180,
            max_attempts: 3,
            retry_backoff_secs: 10,
            initial_delay_secs: 4,
            jitter_secs: 2,
            lookback_days: 20,
            history_ttl_secs: 1_800,
        }
    }

    fn points(volumes: &[f64]) -> Vec<VolumePoint> {
        volumes
            .iter()
            .enumerate()
            .map(|(i, v)| VolumePoint {
                date: format!("202608{:02}", i + 1),
                volume: *v,
            })
            .collect()
    }

    #[test]
    fn test_next_delay_classes() {
        let config = job_config();
        assert_eq!(
            next_delay(&config, CycleOutcome::Success),
            Duration::from_secs(180)
        );
        assert_eq!(
            next_delay(&config, CycleOutcome::Failed),
            Duration::from_secs(360)
        );
        assert_eq!(
            next_delay(&config, CycleOutcome::RateLimited),
            Duration::from_secs(720)
        );
    }

    #[test]
    fn test_average_volume_trailing_window() {
        let history = points(&[1_000.0, 100.0, 200.0, 300.0]);
        // 최근 3일 평균: (100 + 200 + 300) / 3
        assert_eq!(average_volume(&history, 3), Some(200.0));
    }

    #[test]
    fn test_average_volume_short_history() {
        let history = points(&[100.0, 300.0]);
        assert_eq!(average_volume(&history, 20), Some(200.0));
    }

    #[test]
    fn test_average_volume_rejects_zero() {
        assert_eq!(average_volume(&points(&[0.0, 0.0]), 20), None);
        assert_eq!(average_volume(&[], 20), None);
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..50 {
            let j = jitter(2);
            assert!(j <= Duration::from_secs(2));
        }
        assert_eq!(jitter(0), Duration::ZERO);
    }

    #[test]
    fn test_cache_keys() {
        assert_eq!(ratio_key("0001"), "macro:volume:ratio:0001");
        assert_eq!(history_key("0001"), "macro:volume:history:0001");
    }
}
