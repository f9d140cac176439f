//! Feed Configuration Settings
//!
//! Configuration types for the market feed, loaded from environment
//! variables. Parsing runs over a lookup function so tests never touch the
//! process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::application::services::{LogoPolicy, MetadataConfig, PollerConfig};
use crate::domain::streaming::SymbolUniverse;
use crate::infrastructure::http::{ApiPaths, RetryConfig};
use crate::infrastructure::stream::{
    GuardConfig, ReconnectConfig, SessionConfig, StreamClientConfig,
};

/// Default REST base URL.
pub const DEFAULT_REST_URL: &str = "https://finnhub.io/api/v1";

/// Default push channel URL.
pub const DEFAULT_WS_URL: &str = "wss://ws.finnhub.io";

/// Provider API token.
#[derive(Clone)]
pub struct ApiToken(String);

impl ApiToken {
    /// Wrap a token.
    #[must_use]
    pub const fn new(token: String) -> Self {
        Self(token)
    }

    /// The raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiToken([REDACTED])")
    }
}

/// Provider endpoints.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    /// REST base URL.
    pub rest_url: Url,
    /// Quote and profile templates relative to `rest_url`.
    pub paths: ApiPaths,
    /// Push channel URL, without the token.
    pub ws_url: Url,
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health, snapshot and metrics HTTP port.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8083 }
    }
}

/// Push channel settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Minimum spacing between connect attempts.
    pub connect_guard: Duration,
    /// Silence threshold while live.
    pub silence: Duration,
    /// Restart-flood window.
    pub flood_window: Duration,
    /// Attempts allowed inside the window.
    pub flood_cap: usize,
    /// First reconnect delay.
    pub reconnect_base: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_cap: Duration,
    /// Absolute session lifetime.
    pub hard_stop: Duration,
    /// Upper bound on one connect.
    pub connect_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            connect_guard: Duration::from_millis(1250),
            silence: Duration::from_secs(18),
            flood_window: Duration::from_secs(60),
            flood_cap: 8,
            reconnect_base: Duration::from_millis(1200),
            reconnect_cap: Duration::from_secs(15),
            hard_stop: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl StreamSettings {
    /// Session state machine tunables.
    #[must_use]
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            guard: GuardConfig {
                min_interval: self.connect_guard,
                window: self.flood_window,
                cap: self.flood_cap,
            },
            reconnect: ReconnectConfig::new(self.reconnect_base, self.reconnect_cap, 0.0),
            silence_threshold: self.silence,
            hard_stop: self.hard_stop,
        }
    }
}

/// Complete feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Provider token.
    pub token: ApiToken,
    /// Symbols to track, in priority order.
    pub symbols: SymbolUniverse,
    /// Provider endpoints.
    pub endpoints: EndpointSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Durable cache directory.
    pub cache_dir: PathBuf,
    /// REST retry policy.
    pub fetch: RetryConfig,
    /// Batch poller pacing.
    pub poller: PollerConfig,
    /// Profile cache settings.
    pub metadata: MetadataConfig,
    /// Push channel settings.
    pub stream: StreamSettings,
}

impl FeedConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the token or symbols are missing, or a URL is
    /// malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`FeedConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = required(&lookup, "MARKET_FEED_API_TOKEN")?;

        let symbols = SymbolUniverse::parse_list(&required(&lookup, "MARKET_FEED_SYMBOLS")?);
        if symbols.is_empty() {
            return Err(ConfigError::EmptyValue("MARKET_FEED_SYMBOLS".to_string()));
        }

        let path_defaults = ApiPaths::default();
        let endpoints = EndpointSettings {
            rest_url: parse_url(&lookup, "MARKET_FEED_REST_URL", DEFAULT_REST_URL)?,
            paths: ApiPaths {
                quote: parse_template(&lookup, "MARKET_FEED_QUOTE_PATH", path_defaults.quote),
                profile: parse_template(&lookup, "MARKET_FEED_PROFILE_PATH", path_defaults.profile),
            },
            ws_url: parse_url(&lookup, "MARKET_FEED_WS_URL", DEFAULT_WS_URL)?,
        };

        let server = ServerSettings {
            http_port: parse_or(&lookup, "MARKET_FEED_HTTP_PORT", ServerSettings::default().http_port),
        };

        let cache_dir = lookup("MARKET_FEED_CACHE_DIR")
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| PathBuf::from(".cache/market-feed"), PathBuf::from);

        let fetch_defaults = RetryConfig::default();
        let fetch = RetryConfig {
            max_attempts: parse_or(&lookup, "MARKET_FEED_FETCH_MAX_ATTEMPTS", fetch_defaults.max_attempts),
            base_delay: parse_millis(&lookup, "MARKET_FEED_FETCH_BASE_MS", fetch_defaults.base_delay),
            max_delay: parse_millis(&lookup, "MARKET_FEED_FETCH_CAP_MS", fetch_defaults.max_delay),
            request_timeout: parse_millis(
                &lookup,
                "MARKET_FEED_REQUEST_TIMEOUT_MS",
                fetch_defaults.request_timeout,
            ),
        };

        let poller_defaults = PollerConfig::default();
        let poller = PollerConfig {
            batch_size: parse_or(&lookup, "MARKET_FEED_BATCH_SIZE", poller_defaults.batch_size).max(1),
            item_delay: parse_millis(&lookup, "MARKET_FEED_ITEM_DELAY_MS", poller_defaults.item_delay),
            batch_delay: parse_millis(&lookup, "MARKET_FEED_BATCH_DELAY_MS", poller_defaults.batch_delay),
            priority_count: parse_or(&lookup, "MARKET_FEED_PRIORITY_COUNT", poller_defaults.priority_count),
            priority_profile_delay: parse_millis(
                &lookup,
                "MARKET_FEED_PRIORITY_PROFILE_DELAY_MS",
                poller_defaults.priority_profile_delay,
            ),
            background_profile_delay: parse_millis(
                &lookup,
                "MARKET_FEED_BACKGROUND_PROFILE_DELAY_MS",
                poller_defaults.background_profile_delay,
            ),
            cycle_delay: parse_millis(&lookup, "MARKET_FEED_CYCLE_DELAY_MS", poller_defaults.cycle_delay),
        };

        let logo_defaults = LogoPolicy::default();
        let metadata = MetadataConfig {
            ttl: parse_secs(&lookup, "MARKET_FEED_PROFILE_TTL_SECS", MetadataConfig::default().ttl),
            logo: LogoPolicy {
                favicon_template: lookup("MARKET_FEED_FAVICON_TEMPLATE")
                    .filter(|v| v.contains("{domain}"))
                    .unwrap_or(logo_defaults.favicon_template),
                fallback_url: lookup("MARKET_FEED_LOGO_FALLBACK_URL")
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or(logo_defaults.fallback_url),
            },
        };

        let stream_defaults = StreamSettings::default();
        let stream = StreamSettings {
            connect_guard: parse_millis(&lookup, "MARKET_FEED_CONNECT_GUARD_MS", stream_defaults.connect_guard),
            silence: parse_secs(&lookup, "MARKET_FEED_SILENCE_SECS", stream_defaults.silence),
            flood_window: parse_secs(&lookup, "MARKET_FEED_FLOOD_WINDOW_SECS", stream_defaults.flood_window),
            flood_cap: parse_or(&lookup, "MARKET_FEED_FLOOD_CAP", stream_defaults.flood_cap),
            reconnect_base: parse_millis(&lookup, "MARKET_FEED_RECONNECT_BASE_MS", stream_defaults.reconnect_base),
            reconnect_cap: parse_millis(&lookup, "MARKET_FEED_RECONNECT_CAP_MS", stream_defaults.reconnect_cap),
            hard_stop: parse_secs(&lookup, "MARKET_FEED_HARD_STOP_SECS", stream_defaults.hard_stop),
            connect_timeout: stream_defaults.connect_timeout,
        };

        Ok(Self {
            token: ApiToken::new(token),
            symbols,
            endpoints,
            server,
            cache_dir,
            fetch,
            poller,
            metadata,
            stream,
        })
    }

    /// Push channel URL with the token attached.
    #[must_use]
    pub fn stream_url(&self) -> String {
        let mut url = self.endpoints.ws_url.clone();
        url.query_pairs_mut().append_pair("token", self.token.expose());
        url.into()
    }

    /// Push channel client configuration.
    #[must_use]
    pub fn stream_client(&self) -> StreamClientConfig {
        StreamClientConfig {
            session: self.stream.session(),
            connect_timeout: self.stream.connect_timeout,
            ..StreamClientConfig::new(self.stream_url())
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable is not a usable URL.
    #[error("environment variable {key} is not a valid URL: {reason}")]
    InvalidUrl {
        /// Variable name.
        key: String,
        /// Parse failure.
        reason: String,
    },
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value.to_string())
}

fn parse_url<F>(lookup: &F, key: &str, default: &str) -> Result<Url, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string());
    Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidUrl {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Endpoint template; values without a `{symbol}` placeholder are ignored.
fn parse_template<F>(lookup: &F, key: &str, default: String) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().trim_start_matches('/').to_string())
        .filter(|v| v.contains("{symbol}"))
        .unwrap_or(default)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<FeedConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        FeedConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const BASE: &[(&str, &str)] = &[
        ("MARKET_FEED_API_TOKEN", "tok"),
        ("MARKET_FEED_SYMBOLS", "AAPL, MSFT,AAPL"),
    ];

    #[test]
    fn defaults_are_applied() {
        let config = config(BASE).unwrap();

        assert_eq!(config.symbols.len(), 2);
        assert_eq!(config.server.http_port, 8083);
        assert_eq!(config.endpoints.rest_url.as_str(), "https://finnhub.io/api/v1");
        assert_eq!(config.endpoints.paths.quote, "quote?symbol={symbol}");
        assert_eq!(config.endpoints.paths.profile, "stock/profile2?symbol={symbol}");
        assert_eq!(config.fetch.max_attempts, 5);
        assert_eq!(config.fetch.base_delay, Duration::from_millis(900));
        assert_eq!(config.fetch.max_delay, Duration::from_secs(12));
        assert_eq!(config.poller.batch_size, 5);
        assert_eq!(config.poller.item_delay, Duration::from_millis(220));
        assert_eq!(config.poller.batch_delay, Duration::from_millis(950));
        assert_eq!(config.poller.priority_count, 12);
        assert_eq!(config.metadata.ttl, Duration::from_secs(86_400));
        assert_eq!(config.stream.connect_guard, Duration::from_millis(1250));
        assert_eq!(config.stream.silence, Duration::from_secs(18));
        assert_eq!(config.stream.flood_window, Duration::from_secs(60));
        assert_eq!(config.stream.flood_cap, 8);
        assert_eq!(config.stream.reconnect_base, Duration::from_millis(1200));
        assert_eq!(config.stream.reconnect_cap, Duration::from_secs(15));
        assert_eq!(config.stream.hard_stop, Duration::from_secs(300));
    }

    #[test]
    fn missing_token_is_an_error() {
        let result = config(&[("MARKET_FEED_SYMBOLS", "AAPL")]);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(k)) if k == "MARKET_FEED_API_TOKEN"));
    }

    #[test]
    fn blank_token_is_an_error() {
        let result = config(&[("MARKET_FEED_API_TOKEN", "  "), ("MARKET_FEED_SYMBOLS", "AAPL")]);
        assert!(matches!(result, Err(ConfigError::EmptyValue(k)) if k == "MARKET_FEED_API_TOKEN"));
    }

    #[test]
    fn symbols_without_entries_are_an_error() {
        let result = config(&[("MARKET_FEED_API_TOKEN", "tok"), ("MARKET_FEED_SYMBOLS", " , ,")]);
        assert!(matches!(result, Err(ConfigError::EmptyValue(k)) if k == "MARKET_FEED_SYMBOLS"));
    }

    #[test]
    fn invalid_url_is_an_error() {
        let mut vars = BASE.to_vec();
        vars.push(("MARKET_FEED_WS_URL", "not a url"));
        assert!(matches!(config(&vars), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn overrides_are_applied_and_garbage_falls_back() {
        let mut vars = BASE.to_vec();
        vars.extend([
            ("MARKET_FEED_HTTP_PORT", "9000"),
            ("MARKET_FEED_FLOOD_CAP", "3"),
            ("MARKET_FEED_HARD_STOP_SECS", "60"),
            ("MARKET_FEED_BATCH_SIZE", "many"),
            ("MARKET_FEED_CACHE_DIR", "/tmp/feed"),
        ]);
        let config = config(&vars).unwrap();

        assert_eq!(config.server.http_port, 9000);
        assert_eq!(config.stream.flood_cap, 3);
        assert_eq!(config.stream.hard_stop, Duration::from_secs(60));
        assert_eq!(config.poller.batch_size, 5);
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/feed"));

        let session = config.stream.session();
        assert_eq!(session.guard.cap, 3);
        assert_eq!(session.hard_stop, Duration::from_secs(60));
    }

    #[test]
    fn favicon_template_requires_placeholder() {
        let mut vars = BASE.to_vec();
        vars.push(("MARKET_FEED_FAVICON_TEMPLATE", "https://icons.example.com/fixed.png"));
        let config = config(&vars).unwrap();
        assert_eq!(config.metadata.logo.favicon_template, LogoPolicy::default().favicon_template);
    }

    #[test]
    fn endpoint_templates_require_placeholder() {
        let mut vars = BASE.to_vec();
        vars.extend([
            ("MARKET_FEED_QUOTE_PATH", "/quote/{symbol}"),
            ("MARKET_FEED_PROFILE_PATH", "profile/fixed"),
        ]);
        let config = config(&vars).unwrap();
        assert_eq!(config.endpoints.paths.quote, "quote/{symbol}");
        assert_eq!(config.endpoints.paths.profile, ApiPaths::default().profile);
    }

    #[test]
    fn stream_url_carries_token() {
        let config = config(BASE).unwrap();
        assert_eq!(config.stream_url(), "wss://ws.finnhub.io/?token=tok");
        assert_eq!(config.stream_client().session.hard_stop, Duration::from_secs(300));
    }

    #[test]
    fn token_redacted_debug() {
        let config = config(BASE).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("\"tok\""));
        assert!(debug.contains("[REDACTED]"));
    }
}
