//! Error taxonomy for the fan-out layer.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by connections, the pool, and the coordinator.
///
/// Per-relay failures inside a fan-out operation are captured as data in the
/// operation's result and never raised through this type; only
/// whole-operation preconditions and single-connection operations fail.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Opening the socket to a relay failed.
    #[error("connection to {url} failed: {source}")]
    Connection {
        url: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// No acknowledgement arrived for a published event within the window.
    #[error("no acknowledgement from {url} within {timeout:?}")]
    AckTimeout { url: String, timeout: Duration },

    /// Construction was attempted with an empty relay list.
    #[error("no relays configured")]
    NoRelays,

    /// A subscription with this id is already tracked.
    #[error("subscription {0} already exists")]
    SubscriptionExists(String),

    /// The event failed the structural precondition.
    #[error("event rejected: {0}")]
    InvalidEvent(String),

    /// Subscribing failed on at least one relay; the whole subscription was
    /// unwound. Each entry is `(relay url, error)`.
    #[error("subscribe failed on {} of {} relays", .failures.len(), .total)]
    SubscribeFailed {
        total: usize,
        failures: Vec<(String, String)>,
    },
}

impl RelayError {
    /// Wrap a transport-level failure for `url`.
    pub fn connection(
        url: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        RelayError::Connection {
            url: url.into(),
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_display_names_the_relay() {
        let err = RelayError::connection("ws://relay.one", "refused");
        assert_eq!(err.to_string(), "connection to ws://relay.one failed: refused");
    }

    #[test]
    fn subscribe_failed_display_counts_relays() {
        let err = RelayError::SubscribeFailed {
            total: 3,
            failures: vec![
                ("ws://a".into(), "refused".into()),
                ("ws://b".into(), "timeout".into()),
            ],
        };
        assert_eq!(err.to_string(), "subscribe failed on 2 of 3 relays");
    }
}
