// src/rates/mod.rs
//! Rate acquisition: source parsers, the fallback aggregator and the TTL cache.

pub mod aggregator;
pub mod cache;
pub mod error;
pub mod parsers;
pub mod source;
pub mod types;

pub use aggregator::RateAggregator;
pub use cache::RateCache;
pub use error::{AllSourcesFailed, InvalidConfigError, SourceError, SourceFailure};
pub use source::{build_sources, WebSource};
pub use types::{QuoteProvider, RateQuote, RateSource};
