//! 시장 날씨 게이트웨이 CLI.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use weather_core::throttle::SlotStore;
use weather_core::{init_logging, LogConfig};
use weather_data::{
    AdrConfig, AdrScraper, CnnConfig, CnnFetcher, KrxConfig, RedisCache, RedisConfig,
    VkospiResolver,
};
use weather_exchange::{KisClient, KisConfig, KisOAuth, RateLimiter};
use weather_gateway::{GatewayConfig, MarketDataService, VolumeRatioJob, WeatherService};

#[derive(Parser)]
#[command(name = "weather-gateway")]
#[command(about = "Market Weather Aggregation Gateway", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// 시장 날씨 리포트 조회 (JSON 출력)
    Weather,

    /// 거래량 배수 잡 실행 (ctrl-c로 종료)
    VolumeJob,

    /// 종목 현재가 조회
    Quote {
        /// 종목코드 (예: "005930")
        ticker: String,
    },

    /// 등락 종목 수 기반 ADR 집계 조회
    Adr,

    /// KRX VKOSPI 시가 조회
    Vkospi,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(LogConfig::new(format!(
        "weather_gateway={},weather_data={},weather_exchange={}",
        cli.log_level, cli.log_level, cli.log_level
    )))?;

    tracing::info!("Market Weather Gateway 시작");

    // KRX 조회는 시세 API와 Redis 없이도 동작한다
    if let Commands::Vkospi = cli.command {
        let Some(krx_config) = KrxConfig::from_env() else {
            return Err("KRX_API_KEY 환경변수가 설정되지 않았습니다".into());
        };
        let resolver = VkospiResolver::new(krx_config)?;
        let opening = resolver.fetch_opening(None).await?;
        println!("{}", serde_json::to_string_pretty(&opening)?);
        return Ok(());
    }

    let config = GatewayConfig::from_env();
    let cache = RedisCache::connect(&RedisConfig::from_env()).await?;
    tracing::info!("Redis 연결 성공");

    let Some(kis_config) = KisConfig::from_env() else {
        return Err("KIS_APP_KEY / KIS_APP_SECRET 환경변수가 설정되지 않았습니다".into());
    };
    let limiter = Arc::new(RateLimiter::new(
        Some(Arc::new(cache.clone()) as Arc<dyn SlotStore>),
        config.limiter.gap_ms,
        config.limiter.max_wait_ms,
    ));
    let oauth = Arc::new(KisOAuth::new(kis_config, limiter.clone())?);
    let client = Arc::new(KisClient::new(oauth, limiter)?);

    match cli.command {
        Commands::Weather => {
            let market = Arc::new(MarketDataService::new(
                client,
                Some(cache.clone()),
                config.clone(),
            ));
            let vkospi = match KrxConfig::from_env() {
                Some(krx_config) => Some(VkospiResolver::new(krx_config)?),
                None => {
                    tracing::warn!("KRX_API_KEY 미설정, VKOSPI 입력 없이 계산합니다");
                    None
                }
            };
            let cnn = CnnFetcher::new(CnnConfig::from_env(), Some(cache.clone()))?;
            let adr = AdrScraper::new(AdrConfig::from_env(), Some(cache))?;

            let service = WeatherService::new(market, vkospi, cnn, adr, config);
            let report = service.fetch().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::VolumeJob => {
            let job = VolumeRatioJob::new(client, cache, config);
            let token = CancellationToken::new();
            let handle = job.spawn(token.clone());

            tokio::signal::ctrl_c().await?;
            tracing::info!("종료 신호 수신, 잡 종료 중...");
            token.cancel();
            handle.await?;
        }
        Commands::Quote { ticker } => {
            let market = MarketDataService::new(client, Some(cache), config);
            let outcome = market.fetch_quote(&ticker).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Adr => {
            let days = config.adr_days;
            let market = MarketDataService::new(client, Some(cache), config);
            let outcome = market.fetch_adr(days, None).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Vkospi => unreachable!(),
    }

    tracing::info!("Market Weather Gateway 종료");
    Ok(())
}
