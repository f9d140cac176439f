//! REST Adapters
//!
//! - `RateLimitedFetcher`: single GET with exponential backoff on throttling
//!   and transient failures
//! - `RestMarketDataApi`: `MarketDataApi` over the provider's REST endpoints

mod api;
mod fetcher;

pub use api::{ApiPaths, RestMarketDataApi};
pub use fetcher::{RateLimitedFetcher, RetryConfig};
