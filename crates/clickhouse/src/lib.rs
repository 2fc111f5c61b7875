//! ClickHouse backend for the attribution engine.
//!
//! Implements [`event_store::RawEventStore`] and [`event_store::DerivedStore`]
//! on one database; see [`store::ClickHouseStore`].

pub mod client;
pub mod config;
pub mod insert;
pub mod query;
pub mod schema;
pub mod store;

pub use client::*;
pub use config::*;
pub use schema::init_schema;
pub use store::ClickHouseStore;
