//! Time-series buffer (C3) and retention/downsampling store (C8).

pub mod buffer;
pub mod store;

pub use buffer::{TimeSeriesBuffer, TimeSeriesConfig, TimeSeriesPoint, TimeSeriesStatistics};
pub use store::{TimeSeriesQuery, TimeSeriesQueryResult, TimeSeriesStore};
