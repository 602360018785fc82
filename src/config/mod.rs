//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::*;

use std::{
    collections::{BTreeMap, HashMap},
    net::SocketAddr,
    num::NonZeroU32,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{DataSource, DataTypeConfig, default_data_types};
use crate::market::US_EQUITIES_TIMEZONE;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "stockdesk";
const ENV_PREFIX: &str = "STOCKDESK";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_RATE_LIMIT_REQUESTS_PER_SECOND: u64 = 100;
const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 1_000;
const DEFAULT_RATE_LIMIT_IDLE_RETENTION_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_CACHE_OFF_HOURS_MULTIPLIER: u64 = 6;
const DEFAULT_CACHE_OPERATION_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_CACHE_PURGE_INTERVAL_SECS: u64 = 300;
/// Upper bound for every seconds-valued interval; larger values overflow timers.
const MAX_INTERVAL_SECS: u64 = 86_400;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub rate_limit: RateLimitSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub trust_proxy_headers: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// Without a URL the cache runs on the in-process store.
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub requests_per_second: NonZeroU32,
    pub window: Duration,
    pub idle_retention: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Registered data types: the built-in table with file/env entries merged on top.
    pub data_types: BTreeMap<String, DataTypeConfig>,
    pub off_hours_multiplier: NonZeroU32,
    pub market_timezone: String,
    pub operation_timeout: Duration,
    /// Cadence of the expired-row purge for the in-process store.
    pub purge_interval: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Sweep(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    rate_limit: RawRateLimitSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(trust) = overrides.trust_proxy_headers {
            self.server.trust_proxy_headers = Some(trust);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(limit) = overrides.rate_limit_requests_per_second {
            self.rate_limit.requests_per_second = Some(limit);
        }
        if let Some(window) = overrides.rate_limit_window_ms {
            self.rate_limit.window_ms = Some(window);
        }
        if let Some(retention) = overrides.rate_limit_idle_retention_seconds {
            self.rate_limit.idle_retention_seconds = Some(retention);
        }
        if let Some(interval) = overrides.rate_limit_sweep_interval_seconds {
            self.rate_limit.sweep_interval_seconds = Some(interval);
        }
        if let Some(multiplier) = overrides.cache_off_hours_multiplier {
            self.cache.off_hours_multiplier = Some(multiplier);
        }
        if let Some(timezone) = overrides.cache_market_timezone.as_ref() {
            self.cache.market_timezone = Some(timezone.clone());
        }
        if let Some(timeout) = overrides.cache_operation_timeout_ms {
            self.cache.operation_timeout_ms = Some(timeout);
        }
        if let Some(interval) = overrides.cache_purge_interval_seconds {
            self.cache.purge_interval_seconds = Some(interval);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            rate_limit,
            cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings {
        addr,
        trust_proxy_headers: server.trust_proxy_headers.unwrap_or(false),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = non_zero_u32(max_connections.into(), "database.max_connections")?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let requests_per_second = non_zero_u32(
        rate_limit
            .requests_per_second
            .unwrap_or(DEFAULT_RATE_LIMIT_REQUESTS_PER_SECOND),
        "rate_limit.requests_per_second",
    )?;

    let window = positive_duration(
        rate_limit.window_ms.unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_MS),
        Duration::from_millis,
        "rate_limit.window_ms",
    )?;
    let idle_retention = bounded_seconds(
        rate_limit
            .idle_retention_seconds
            .unwrap_or(DEFAULT_RATE_LIMIT_IDLE_RETENTION_SECS),
        "rate_limit.idle_retention_seconds",
    )?;
    let sweep_interval = bounded_seconds(
        rate_limit
            .sweep_interval_seconds
            .unwrap_or(DEFAULT_RATE_LIMIT_SWEEP_INTERVAL_SECS),
        "rate_limit.sweep_interval_seconds",
    )?;

    if idle_retention < window {
        return Err(LoadError::invalid(
            "rate_limit.idle_retention_seconds",
            "must not be shorter than the rate limit window",
        ));
    }

    Ok(RateLimitSettings {
        requests_per_second,
        window,
        idle_retention,
        sweep_interval,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let off_hours_multiplier = non_zero_u32(
        cache
            .off_hours_multiplier
            .unwrap_or(DEFAULT_CACHE_OFF_HOURS_MULTIPLIER),
        "cache.off_hours_multiplier",
    )?;

    let market_timezone = cache
        .market_timezone
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| US_EQUITIES_TIMEZONE.to_string());

    let operation_timeout = positive_duration(
        cache
            .operation_timeout_ms
            .unwrap_or(DEFAULT_CACHE_OPERATION_TIMEOUT_MS),
        Duration::from_millis,
        "cache.operation_timeout_ms",
    )?;
    let purge_interval = bounded_seconds(
        cache
            .purge_interval_seconds
            .unwrap_or(DEFAULT_CACHE_PURGE_INTERVAL_SECS),
        "cache.purge_interval_seconds",
    )?;

    let mut data_types = default_data_types();
    for (tag, entry) in cache.data_types {
        let tag = tag.trim().to_string();
        if tag.is_empty() {
            return Err(LoadError::invalid(
                "cache.data_types",
                "data type tags must not be empty",
            ));
        }
        let merged = merge_data_type(&tag, data_types.get(&tag).copied(), entry)?;
        data_types.insert(tag, merged);
    }

    Ok(CacheSettings {
        data_types,
        off_hours_multiplier,
        market_timezone,
        operation_timeout,
        purge_interval,
    })
}

/// Overlay a configured entry on the built-in policy for `tag`, if any.
fn merge_data_type(
    tag: &str,
    builtin: Option<DataTypeConfig>,
    entry: RawDataTypeSettings,
) -> Result<DataTypeConfig, LoadError> {
    let source = match entry.source {
        Some(value) => DataSource::from_str(&value)
            .map_err(|err| LoadError::invalid("cache.data_types", format!("{tag}: {err}")))?,
        None => match builtin {
            Some(config) => config.source,
            None => {
                return Err(LoadError::invalid(
                    "cache.data_types",
                    format!("{tag}: `source` is required for a new data type"),
                ));
            }
        },
    };

    let base_ttl = match entry.base_ttl_seconds {
        Some(0) => {
            return Err(LoadError::invalid(
                "cache.data_types",
                format!("{tag}: `base_ttl_seconds` must be greater than zero"),
            ));
        }
        Some(seconds) => Duration::from_secs(seconds),
        None => match builtin {
            Some(config) => config.base_ttl,
            None => {
                return Err(LoadError::invalid(
                    "cache.data_types",
                    format!("{tag}: `base_ttl_seconds` is required for a new data type"),
                ));
            }
        },
    };

    Ok(DataTypeConfig::new(base_ttl, source))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    trust_proxy_headers: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    requests_per_second: Option<u64>,
    window_ms: Option<u64>,
    idle_retention_seconds: Option<u64>,
    sweep_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    off_hours_multiplier: Option<u64>,
    market_timezone: Option<String>,
    operation_timeout_ms: Option<u64>,
    purge_interval_seconds: Option<u64>,
    data_types: HashMap<String, RawDataTypeSettings>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDataTypeSettings {
    base_ttl_seconds: Option<u64>,
    source: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_duration(
    value: u64,
    unit: fn(u64) -> Duration,
    key: &'static str,
) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(unit(value))
}

fn bounded_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value > MAX_INTERVAL_SECS {
        return Err(LoadError::invalid(
            key,
            format!("must not exceed {MAX_INTERVAL_SECS} seconds"),
        ));
    }
    positive_duration(value, Duration::from_secs, key)
}
