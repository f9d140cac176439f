//! REST Market Data Adapter
//!
//! Implements [`MarketDataApi`] over the provider's quote and profile
//! endpoints. Each endpoint is a template relative to the base URL, with
//! `{symbol}` substituted into path segments or query values, e.g.
//! `quote?symbol={symbol}` or `quote/{symbol}`. The API token travels in a
//! header so it never appears in logged URLs.

use async_trait::async_trait;
use reqwest::Url;

use super::fetcher::{RateLimitedFetcher, RetryConfig};
use crate::application::ports::{CompanyProfile, FetchError, MarketDataApi, QuoteSnapshot};
use crate::domain::streaming::Symbol;

/// Header carrying the API token.
pub const TOKEN_HEADER: &str = "X-Finnhub-Token";

/// Placeholder replaced with the symbol in endpoint templates.
pub const SYMBOL_PLACEHOLDER: &str = "{symbol}";

/// Endpoint templates relative to the REST base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiPaths {
    /// Quote endpoint template.
    pub quote: String,
    /// Profile endpoint template.
    pub profile: String,
}

impl Default for ApiPaths {
    fn default() -> Self {
        Self {
            quote: "quote?symbol={symbol}".to_string(),
            profile: "stock/profile2?symbol={symbol}".to_string(),
        }
    }
}

/// Provider REST client.
#[derive(Clone)]
pub struct RestMarketDataApi {
    fetcher: RateLimitedFetcher,
    base_url: Url,
    paths: ApiPaths,
    token: String,
}

impl std::fmt::Debug for RestMarketDataApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestMarketDataApi")
            .field("base_url", &self.base_url.as_str())
            .field("paths", &self.paths)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl RestMarketDataApi {
    /// Create a client for `base_url` using the default endpoint paths.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` cannot carry path segments or the
    /// HTTP client cannot be built.
    pub fn new(base_url: Url, token: impl Into<String>, retry: RetryConfig) -> Result<Self, FetchError> {
        if base_url.cannot_be_a_base() {
            return Err(FetchError::Transport(format!(
                "base URL cannot carry paths: {base_url}"
            )));
        }
        Ok(Self {
            fetcher: RateLimitedFetcher::new(retry)?,
            base_url,
            paths: ApiPaths::default(),
            token: token.into(),
        })
    }

    /// Replace the endpoint templates.
    #[must_use]
    pub fn with_paths(mut self, paths: ApiPaths) -> Self {
        self.paths = paths;
        self
    }

    fn endpoint(&self, template: &str, symbol: &Symbol) -> Result<Url, FetchError> {
        let (path, query) = template.split_once('?').unwrap_or((template, ""));
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| FetchError::Transport("base URL cannot carry paths".into()))?;
            segments.pop_if_empty();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                segments.push(&segment.replace(SYMBOL_PLACEHOLDER, symbol.as_str()));
            }
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                pairs.append_pair(key, &value.replace(SYMBOL_PLACEHOLDER, symbol.as_str()));
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl MarketDataApi for RestMarketDataApi {
    async fn quote(&self, symbol: &Symbol) -> Result<QuoteSnapshot, FetchError> {
        let url = self.endpoint(&self.paths.quote, symbol)?;
        self.fetcher
            .get_json(&url, |request| request.header(TOKEN_HEADER, &self.token))
            .await
    }

    async fn profile(&self, symbol: &Symbol) -> Result<CompanyProfile, FetchError> {
        let url = self.endpoint(&self.paths.profile, symbol)?;
        self.fetcher
            .get_json(&url, |request| request.header(TOKEN_HEADER, &self.token))
            .await
    }
}
