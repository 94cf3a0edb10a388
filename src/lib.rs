//! Bridge between request/response callers and a fleet of Nostr relays.
//!
//! The library fans a single logical operation out to every configured
//! relay: publishes are broadcast and acknowledged per relay, queries merge
//! and deduplicate stored events across relays, and long-lived
//! subscriptions are unified into one event stream with one end-of-stream
//! signal. One broken relay never aborts the others.

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod filter;
pub mod frame;
pub mod pool;

pub use connection::{ConnectionState, PublishAck, RelayConnection, SubscriptionHandlers};
pub use coordinator::SubscriptionCoordinator;
pub use error::RelayError;
pub use event::{Event, Tag};
pub use filter::Filter;
pub use pool::{PublishSummary, RelayPool, RelayPublish};
