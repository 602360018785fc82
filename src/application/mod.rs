//! Application layer: error types and persistence contracts.

pub mod error;
pub mod repos;
