//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Rate-limited REST client and market data adapter.
pub mod http;

/// WebSocket push channel: codec, connection state machine and client.
pub mod stream;

/// Durable and in-memory cache stores.
pub mod persistence;

/// Configuration loading.
pub mod config;

/// Health, snapshot and restart HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry trace export.
pub mod telemetry;
