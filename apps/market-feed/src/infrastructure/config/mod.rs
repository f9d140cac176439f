//! Configuration Module
//!
//! Configuration loading for the market feed service.

mod settings;

pub use settings::{
    ApiToken, ConfigError, DEFAULT_REST_URL, DEFAULT_WS_URL, EndpointSettings, FeedConfig,
    ServerSettings, StreamSettings,
};
