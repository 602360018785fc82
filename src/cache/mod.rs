//! Tiered provider cache.
//!
//! Upstream market data is cached in a shared store keyed by
//! `(data_type, key)`. Each data type carries a TTL policy; price-sensitive
//! types stay fresh longer while the exchange is closed.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! off_hours_multiplier = 6
//! operation_timeout_ms = 2000
//! market_timezone = "America/New_York"
//! purge_interval_seconds = 300
//!
//! [cache.data_types.news]
//! base_ttl_seconds = 120
//! source = "price_sensitive"
//! ```

mod clock;
mod config;
mod lock;
mod memory;
mod purge;
mod tiered;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, DataSource, DataTypeConfig, UnknownDataSource, default_data_types};
pub use memory::MemoryCacheStore;
pub use purge::{MAX_PURGE_INTERVAL, PurgeHandle};
pub use tiered::{CacheError, TieredCache};
