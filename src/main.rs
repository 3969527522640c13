//! USDT/RUB rate bot: binary entrypoint.
//! Loads configuration, wires the rate pipeline, then runs the channel
//! publisher, the Telegram command loop and the status API until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use usdt_rate_bot::api::{self, AppState};
use usdt_rate_bot::bot::{self, BotContext};
use usdt_rate_bot::config::{load_sources_default, BotConfig};
use usdt_rate_bot::notify::{LogMessenger, Messenger, TelegramClient};
use usdt_rate_bot::publish::{PublishScheduler, PublishTarget, ScheduleState};
use usdt_rate_bot::rates::{build_sources, RateAggregator, RateCache, RateSource};
use usdt_rate_bot::service::RateService;
use usdt_rate_bot::stats::UsageStats;
use usdt_rate_bot::telemetry::{install_prometheus, EventSink, Telemetry};
use usdt_rate_bot::users::UserRegistry;
use usdt_rate_bot::DEFAULT_LOG_FILTER;

/// `RUST_LOG` overrides the filter; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer().compact()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when the file is absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = BotConfig::from_env()?;
    let sources_cfg = load_sources_default()?;

    let metrics = match install_prometheus() {
        Ok(h) => Some(h),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "metrics disabled");
            None
        }
    };

    // --- Rate pipeline ---
    let stats = Arc::new(UsageStats::new());
    let events: Arc<dyn EventSink> = Arc::new(Telemetry::new(stats.clone()));
    let fetch_timeout = Duration::from_secs(cfg.fetch_timeout_secs);

    let sources: Vec<Arc<dyn RateSource>> = build_sources(&sources_cfg, fetch_timeout)?
        .into_iter()
        .map(|s| Arc::new(s) as Arc<dyn RateSource>)
        .collect();
    let aggregator = Arc::new(RateAggregator::new(sources, fetch_timeout, events.clone()));
    info!(sources = ?aggregator.source_names(), "rate sources ready");

    let cache = Arc::new(RateCache::new(
        aggregator,
        Duration::from_secs(cfg.cache_ttl_secs),
        events.clone(),
    ));

    // --- Publisher ---
    let telegram = TelegramClient::new(&cfg.token);
    let channel: Arc<dyn Messenger> = if cfg.dry_run {
        warn!("DRY_RUN=1: channel posts are logged, not sent");
        Arc::new(LogMessenger)
    } else {
        Arc::new(telegram.clone())
    };
    let interval = i64::try_from(cfg.publish_interval_secs).context("SLEEP_TIME out of range")?;
    let scheduler = PublishScheduler::new(
        ScheduleState::new(interval)?,
        cache.clone(),
        channel,
        PublishTarget {
            channel: cfg.channel_id.clone(),
            topic: cfg.topic_id.clone(),
        },
        events.clone(),
    )
    .with_policy(cfg.policy)
    .fire_on_start(cfg.publish_on_start);
    metrics::gauge!("rate_publish_interval_secs").set(cfg.publish_interval_secs as f64);

    let service = RateService::new(cache, scheduler.handle());

    // --- Chat + HTTP ---
    let users = Arc::new(UserRegistry::load(&cfg.users_path)?);
    let bot_ctx = Arc::new(BotContext {
        service: service.clone(),
        users,
        stats: stats.clone(),
        admins: cfg.admins.clone(),
    });
    let app = api::router(AppState { service, stats }, metrics);
    let listener = tokio::net::TcpListener::bind(&cfg.http_addr)
        .await
        .with_context(|| format!("bind {}", cfg.http_addr))?;
    info!(addr = %cfg.http_addr, admins = cfg.admins.len(), "status API listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let publisher = tokio::spawn(scheduler.run(shutdown_rx.clone()));
    let poller = tokio::spawn(bot::run_polling(telegram, bot_ctx, shutdown_rx.clone()));
    let mut http_stop = shutdown_rx;
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_stop.wait_for(|stop| *stop).await;
            })
            .await
    });

    tokio::signal::ctrl_c()
        .await
        .context("listen for ctrl-c")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    if let Err(e) = publisher.await {
        warn!(error = %e, "publisher task ended abnormally");
    }
    if let Err(e) = poller.await {
        warn!(error = %e, "bot polling task ended abnormally");
    }
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "http server error"),
        Err(e) => warn!(error = %e, "http server task ended abnormally"),
    }
    info!("bye");
    Ok(())
}
