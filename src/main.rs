use std::{net::SocketAddr, process, sync::Arc};

use stockdesk::{
    application::{error::AppError, repos::ProviderCacheRepo},
    cache::{CacheConfig, MemoryCacheStore, TieredCache},
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, ClientIpPolicy, HttpState, RateLimitConfig, RateLimiter},
        telemetry,
    },
    market::MarketCalendar,
};
use time::OffsetDateTime;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Sweep(_) => run_sweep(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let db = match settings.database.url.as_deref() {
        Some(url) => Some(init_repositories(url, &settings).await?),
        None => {
            warn!("database url is not configured; provider cache is process-local");
            None
        }
    };
    let store: Arc<dyn ProviderCacheRepo> = match db.as_ref() {
        Some(repos) => Arc::clone(repos) as Arc<dyn ProviderCacheRepo>,
        None => Arc::new(MemoryCacheStore::new()),
    };
    let local_store = db.is_none();

    let calendar = MarketCalendar::new(&settings.cache.market_timezone);
    let cache = Arc::new(TieredCache::new(
        CacheConfig::from(&settings.cache),
        calendar,
        store,
    ));
    // The shared database is purged by the `sweep` command.
    let purger = local_store.then(|| cache.spawn_purger(settings.cache.purge_interval));

    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::from(&settings.rate_limit)));
    let sweeper = limiter.spawn_sweeper();

    let router = http::build_router(
        HttpState { cache, db },
        limiter,
        ClientIpPolicy {
            trust_proxy_headers: settings.server.trust_proxy_headers,
        },
    );

    let addr = settings.server.addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| AppError::from(InfraError::Bind { addr, source }))?;
    info!(%addr, "listening");

    let result = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|err| AppError::unexpected(format!("server error: {err}")));

    sweeper.stop().await;
    if let Some(purger) = purger {
        purger.stop().await;
    }
    info!("shutdown complete");
    result
}

async fn run_sweep(settings: config::Settings) -> Result<(), AppError> {
    let url = settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| InfraError::configuration("sweep requires database.url"))?;
    let repositories = init_repositories(url, &settings).await?;

    let now = OffsetDateTime::now_utc();
    let purged = repositories.purge_expired(now).await?;
    metrics::counter!("stockdesk_cache_purged_total").increment(purged);
    info!(purged, "purged expired provider cache rows");
    Ok(())
}

async fn init_repositories(
    url: &str,
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let pool = PostgresRepositories::connect(url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
