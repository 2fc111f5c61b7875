//! Redpanda transport for raw attribution records.

pub mod config;
pub mod consumer;
pub mod health;

pub use config::*;
pub use consumer::*;
