//! Push Channel
//!
//! WebSocket streaming of trade updates. The pieces are layered so that
//! everything but [`client`] is synchronous and clock-injected:
//!
//! - [`messages`] / [`codec`]: wire frames and JSON handling
//! - [`reconnect`]: exponential backoff schedule
//! - [`guard`]: minimum interval and restart-flood window
//! - [`watchdog`]: silence detection while live
//! - [`session`]: the connection state machine
//! - [`client`]: socket I/O driving the session

pub mod client;
pub mod codec;
pub mod guard;
pub mod messages;
pub mod reconnect;
pub mod session;
pub mod watchdog;

pub use client::{StreamClient, StreamClientConfig, StreamClientError};
pub use codec::{CodecError, JsonCodec};
pub use guard::{AttemptDecision, GuardConfig, RestartGuard};
pub use messages::{FeedFrame, SubscribeRequest, TradeRecord};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use session::{ConnectionSession, SessionAction, SessionConfig, SessionEvent, SessionState};
pub use watchdog::SilenceWatchdog;
