//! Core types, validation, attribution and rollup logic for the attribution engine.

pub mod attribution;
pub mod error;
pub mod events;
pub mod limits;
pub mod query;
pub mod range;
pub mod rollup;
pub mod schema;
pub mod snapshot;

pub use attribution::*;
pub use error::{Error, ErrorKind, Result, ValidationErrorCode};
pub use events::*;
pub use query::*;
pub use range::DateRange;
pub use rollup::{AggregationEngine, AggregationInput, RollupConfig, RollupSet, RollupStage};
pub use schema::ValidatedBatch;
pub use snapshot::RawSnapshot;
