//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `RunRegistry`: Run ids and cancellation for poller runs
//! - `MetadataCache`: Two-layer profile cache with in-flight deduplication
//! - `BatchPoller`: Paced REST refresh of quotes and profiles
//! - `MarketFeed`: Consumer-facing snapshot, status and restart action

pub mod feed;
pub mod metadata;
pub mod poller;
pub mod run;

pub use feed::{FeedError, FeedSnapshot, MarketFeed};
pub use metadata::{CachedProfile, LogoPolicy, MetadataCache, MetadataConfig, ProfileView, Resolution};
pub use poller::{BatchPoller, PollerConfig};
pub use run::{RunContext, RunRegistry};
