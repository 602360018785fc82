use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the stockdesk binary.
#[derive(Debug, Parser)]
#[command(
    name = "stockdesk",
    version,
    about = "Market-aware provider cache and rate-limited API"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "STOCKDESK_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Delete cache rows that are stale under every TTL regime.
    Sweep(SweepArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Trust X-Forwarded-For / X-Real-IP for client identity.
    #[arg(
        long = "trust-proxy-headers",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub trust_proxy_headers: Option<bool>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the per-client request ceiling per window.
    #[arg(long = "rate-limit-requests-per-second", value_name = "COUNT")]
    pub rate_limit_requests_per_second: Option<u64>,

    /// Override the rate limit window length.
    #[arg(long = "rate-limit-window-ms", value_name = "MILLIS")]
    pub rate_limit_window_ms: Option<u64>,

    /// Override how long an idle client stays tracked.
    #[arg(long = "rate-limit-idle-retention-seconds", value_name = "SECONDS")]
    pub rate_limit_idle_retention_seconds: Option<u64>,

    /// Override the idle sweep cadence.
    #[arg(long = "rate-limit-sweep-interval-seconds", value_name = "SECONDS")]
    pub rate_limit_sweep_interval_seconds: Option<u64>,

    /// Override the off-hours TTL multiplier for price-sensitive data.
    #[arg(long = "cache-off-hours-multiplier", value_name = "FACTOR")]
    pub cache_off_hours_multiplier: Option<u64>,

    /// Override the exchange timezone used for the session check.
    #[arg(long = "cache-market-timezone", value_name = "TZ")]
    pub cache_market_timezone: Option<String>,

    /// Override the timeout applied to each cache store operation.
    #[arg(long = "cache-operation-timeout-ms", value_name = "MILLIS")]
    pub cache_operation_timeout_ms: Option<u64>,

    /// Override how often the in-process store drops expired rows.
    #[arg(long = "cache-purge-interval-seconds", value_name = "SECONDS")]
    pub cache_purge_interval_seconds: Option<u64>,
}
