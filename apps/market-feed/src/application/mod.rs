//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (REST endpoints, durable cache).
pub mod ports;

/// Application services for polling, metadata and the consumer facade.
pub mod services;
