//! Market-aware provider cache with per-client rate limiting.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
pub mod market;
pub mod util;
