//! Fan-out operations across the full relay set.
//!
//! Every operation here follows the same discipline: run against all
//! relays concurrently, wait for every outcome, and never let one broken
//! relay abort or starve the others. Per-relay failures are captured as
//! data in the merged result.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::connection::{RelayConnection, SubscriptionHandlers};
use crate::error::RelayError;
use crate::event::{self, Event};
use crate::filter::Filter;

/// How long a query waits per relay for end-of-stream before settling.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of publishing one event to one relay.
#[derive(Debug, Clone, Serialize)]
pub struct RelayPublish {
    /// Endpoint the result belongs to.
    pub relay_url: String,
    /// Whether the exchange with this relay completed at all.
    pub success: bool,
    /// Whether the relay accepted the event.
    pub accepted: bool,
    /// Relay-provided detail, or the local error when `success` is false.
    pub message: String,
}

/// Aggregate outcome of a fan-out publish.
#[derive(Debug, Clone, Serialize)]
pub struct PublishSummary {
    /// True when at least one relay accepted the event.
    pub accepted: bool,
    /// Message from the first accepting relay, or the first result's.
    pub message: String,
    /// Id of the published event.
    pub event_id: String,
    /// One entry per configured relay.
    pub relay_results: Vec<RelayPublish>,
    /// Count of relays that accepted.
    pub accepted_count: usize,
    /// Count of configured relays.
    pub total_relays: usize,
}

/// The full set of relay connections and the fan-out operations over them.
pub struct RelayPool {
    connections: Vec<Arc<RelayConnection>>,
    query_timeout: Duration,
}

impl RelayPool {
    /// Build a pool from an ordered relay URL list, optionally dialing
    /// through a SOCKS5 proxy. An empty list is a construction error.
    pub fn new(urls: &[String], proxy: Option<String>) -> Result<Self, RelayError> {
        if urls.is_empty() {
            return Err(RelayError::NoRelays);
        }
        let connections = urls
            .iter()
            .map(|url| Arc::new(RelayConnection::new(url.clone(), proxy.clone())))
            .collect();
        Ok(Self {
            connections,
            query_timeout: QUERY_TIMEOUT,
        })
    }

    /// Build a pool over already-constructed connections. An empty set is a
    /// construction error.
    pub fn from_connections(connections: Vec<Arc<RelayConnection>>) -> Result<Self, RelayError> {
        if connections.is_empty() {
            return Err(RelayError::NoRelays);
        }
        Ok(Self {
            connections,
            query_timeout: QUERY_TIMEOUT,
        })
    }

    /// Override the per-relay query settle window.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// The pool's connections, in configuration order.
    pub fn connections(&self) -> &[Arc<RelayConnection>] {
        &self.connections
    }

    /// Publish `event` to every relay concurrently and capture every
    /// outcome. Returns exactly one entry per relay; an individual relay
    /// failing is data, not an error.
    pub async fn broadcast_publish(&self, event: &Event) -> Vec<RelayPublish> {
        join_all(self.connections.iter().map(|conn| {
            let conn = conn.clone();
            let event = event.clone();
            async move {
                match conn.publish(&event).await {
                    Ok(ack) => RelayPublish {
                        relay_url: conn.url().to_string(),
                        success: true,
                        accepted: ack.accepted,
                        message: ack.message,
                    },
                    Err(e) => {
                        warn!(url = %conn.url(), error = %e, "publish failed");
                        RelayPublish {
                            relay_url: conn.url().to_string(),
                            success: false,
                            accepted: false,
                            message: e.to_string(),
                        }
                    }
                }
            }
        }))
        .await
    }

    /// Publish with the structural precondition enforced, summarized for a
    /// request/response caller.
    pub async fn publish(&self, event: &Event) -> Result<PublishSummary, RelayError> {
        if let Err(reason) = event::validate(event) {
            return Err(RelayError::InvalidEvent(reason));
        }
        let relay_results = self.broadcast_publish(event).await;
        let accepted_count = relay_results.iter().filter(|r| r.accepted).count();
        let message = relay_results
            .iter()
            .find(|r| r.accepted)
            .or(relay_results.first())
            .map(|r| r.message.clone())
            .unwrap_or_default();
        Ok(PublishSummary {
            accepted: accepted_count > 0,
            message,
            event_id: event.id.clone(),
            total_relays: relay_results.len(),
            accepted_count,
            relay_results,
        })
    }

    /// Query every relay with a transient subscription and merge the
    /// results, deduplicated by event id (first seen wins).
    ///
    /// Each relay gets an index-suffixed subscription id to avoid
    /// collisions, and settles on whichever comes first of end-of-stream,
    /// a relay-side close, or the timeout; the subscription is then closed
    /// unconditionally. A relay that never answers contributes nothing and
    /// is not an error; a relay-side close is a warning and its partial
    /// events still count.
    pub async fn query(&self, filters: &[Filter], subscription_id: &str) -> Vec<Event> {
        let collector: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        join_all(self.connections.iter().enumerate().map(|(index, conn)| {
            let scoped = format!("{subscription_id}-{index}");
            let conn = conn.clone();
            let filters = filters.to_vec();
            let collector = collector.clone();
            let settle = self.query_timeout;
            async move {
                let url = conn.url().to_string();
                let done = Arc::new(Notify::new());
                let handlers = SubscriptionHandlers {
                    on_event: {
                        let collector = collector.clone();
                        Arc::new(move |ev: Event| collector.lock().unwrap().push(ev))
                    },
                    on_eose: {
                        let done = done.clone();
                        Arc::new(move || done.notify_one())
                    },
                    on_closed: {
                        let done = done.clone();
                        let url = url.clone();
                        Arc::new(move |reason: String| {
                            warn!(url = %url, %reason, "subscription closed during query");
                            done.notify_one();
                        })
                    },
                };
                if let Err(e) = conn.subscribe(&scoped, &filters, handlers).await {
                    warn!(url = %url, error = %e, "query subscribe failed");
                    return;
                }
                if timeout(settle, done.notified()).await.is_err() {
                    debug!(url = %url, "query timed out waiting for end of stream");
                }
                conn.unsubscribe(&scoped);
            }
        }))
        .await;

        let mut seen = HashSet::new();
        let collected = std::mem::take(&mut *collector.lock().unwrap());
        collected
            .into_iter()
            .filter(|ev| seen.insert(ev.id.clone()))
            .collect()
    }
}
