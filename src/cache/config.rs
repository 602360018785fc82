//! Cache policy table.
//!
//! Every data-type tag the application caches under is registered here with a
//! base TTL and a source classification. Price-sensitive data stays fresh for
//! `base_ttl` while the market is open and `base_ttl * off_hours_multiplier`
//! while it is closed; every other source uses `base_ttl` unconditionally.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_OFF_HOURS_MULTIPLIER: u32 = 6;
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// Classifies whether a data type is subject to the off-hours TTL extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Quotes, snapshots and bars: stale within minutes while trading.
    PriceSensitive,
    /// Profiles and statements: change on filing cadence.
    Fundamental,
    /// Scores derived from fundamentals.
    Computed,
}

impl DataSource {
    pub fn is_price_sensitive(self) -> bool {
        matches!(self, DataSource::PriceSensitive)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataSource::PriceSensitive => "price_sensitive",
            DataSource::Fundamental => "fundamental",
            DataSource::Computed => "computed",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDataSource(pub String);

impl fmt::Display for UnknownDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown data source `{}` (expected price_sensitive, fundamental or computed)",
            self.0
        )
    }
}

impl std::error::Error for UnknownDataSource {}

impl FromStr for DataSource {
    type Err = UnknownDataSource;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "price_sensitive" => Ok(DataSource::PriceSensitive),
            "fundamental" => Ok(DataSource::Fundamental),
            "computed" => Ok(DataSource::Computed),
            _ => Err(UnknownDataSource(value.to_string())),
        }
    }
}

/// TTL policy for a single data-type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTypeConfig {
    pub base_ttl: Duration,
    pub source: DataSource,
}

impl DataTypeConfig {
    pub const fn new(base_ttl: Duration, source: DataSource) -> Self {
        Self { base_ttl, source }
    }

    pub const fn price_sensitive(base_ttl: Duration) -> Self {
        Self::new(base_ttl, DataSource::PriceSensitive)
    }

    pub const fn fundamental(base_ttl: Duration) -> Self {
        Self::new(base_ttl, DataSource::Fundamental)
    }

    pub const fn computed(base_ttl: Duration) -> Self {
        Self::new(base_ttl, DataSource::Computed)
    }
}

/// Tags registered by [`CacheConfig::default_registry`].
pub fn default_data_types() -> BTreeMap<String, DataTypeConfig> {
    [
        (
            "snapshot",
            DataTypeConfig::price_sensitive(Duration::from_secs(5 * MINUTE)),
        ),
        (
            "quote",
            DataTypeConfig::price_sensitive(Duration::from_secs(MINUTE)),
        ),
        (
            "bars",
            DataTypeConfig::price_sensitive(Duration::from_secs(15 * MINUTE)),
        ),
        (
            "profile",
            DataTypeConfig::fundamental(Duration::from_secs(24 * HOUR)),
        ),
        (
            "financials",
            DataTypeConfig::fundamental(Duration::from_secs(24 * HOUR)),
        ),
        (
            "scores",
            DataTypeConfig::computed(Duration::from_secs(6 * HOUR)),
        ),
    ]
    .into_iter()
    .map(|(tag, config)| (tag.to_string(), config))
    .collect()
}

/// Immutable policy table handed to the tiered cache at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    data_types: BTreeMap<String, DataTypeConfig>,
    off_hours_multiplier: u32,
    operation_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::default_registry()
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            data_types: settings.data_types.clone(),
            off_hours_multiplier: settings.off_hours_multiplier.get(),
            operation_timeout: settings.operation_timeout,
        }
    }
}

impl CacheConfig {
    /// A table with no registered data types.
    pub fn empty() -> Self {
        Self {
            data_types: BTreeMap::new(),
            off_hours_multiplier: DEFAULT_OFF_HOURS_MULTIPLIER,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// The deployed table: price data, fundamentals and computed scores.
    pub fn default_registry() -> Self {
        Self {
            data_types: default_data_types(),
            ..Self::empty()
        }
    }

    pub fn register(mut self, tag: impl Into<String>, config: DataTypeConfig) -> Self {
        self.data_types.insert(tag.into(), config);
        self
    }

    /// Multipliers below one are clamped to one.
    pub fn with_off_hours_multiplier(mut self, multiplier: u32) -> Self {
        self.off_hours_multiplier = multiplier.max(1);
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn data_type(&self, tag: &str) -> Option<&DataTypeConfig> {
        self.data_types.get(tag)
    }

    pub fn data_types(&self) -> impl Iterator<Item = (&str, &DataTypeConfig)> {
        self.data_types.iter().map(|(tag, config)| (tag.as_str(), config))
    }

    pub fn off_hours_multiplier(&self) -> u32 {
        self.off_hours_multiplier
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// TTL applied at read time, or `None` for an unregistered tag.
    pub fn effective_ttl(&self, tag: &str, market_open: bool) -> Option<Duration> {
        let config = self.data_type(tag)?;
        if config.source.is_price_sensitive() && !market_open {
            Some(self.extended(config.base_ttl))
        } else {
            Some(config.base_ttl)
        }
    }

    /// Longest TTL the tag can have under any market state.
    pub fn max_possible_ttl(&self, tag: &str) -> Option<Duration> {
        let config = self.data_type(tag)?;
        if config.source.is_price_sensitive() {
            Some(self.extended(config.base_ttl))
        } else {
            Some(config.base_ttl)
        }
    }

    fn extended(&self, base: Duration) -> Duration {
        base.checked_mul(self.off_hours_multiplier)
            .unwrap_or(Duration::MAX)
    }
}
