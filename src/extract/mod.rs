//! Surveillance extraction: feed records to outbreak triples.
//!
//! The stages are pure functions of their inputs, applied per disease:
//!
//! 1. [`feed`]: fetch raw indicator rows (the only I/O)
//! 2. [`normalize`]: coerce rows into typed [`normalize::Record`]s
//! 3. [`latest`]: keep the most recent qualifying record per entity
//! 4. [`outbreak`]: threshold and exclusion filter into triples

pub mod feed;
pub mod latest;
pub mod normalize;
pub mod outbreak;

pub use feed::{GhoClient, IndicatorFeed};
pub use latest::{LatestRecord, select_latest};
pub use normalize::{FieldMap, Record, normalize};
pub use outbreak::{AGGREGATE_REGION_CODES, OutbreakRule};
