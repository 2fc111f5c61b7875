//! Storage for the attribution engine.
//!
//! - [`RawEventStore`]: append-only impressions, clicks and app events
//! - [`DerivedStore`]: attribution records and rollups, replaced per range
//! - [`IngestFunnel`]: validates batches and appends them to the raw store
//! - [`MemoryStore`]: in-process implementation of both stores

pub mod funnel;
pub mod memory;
pub mod retry;
pub mod store;

pub use funnel::{FunnelConfig, IngestFunnel, IngestReceipt};
pub use memory::MemoryStore;
pub use retry::RetryPolicy;
pub use store::{AppendReceipt, DerivedCommit, DerivedStore, RawEventStore};
