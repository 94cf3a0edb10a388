//! Long-lived subscriptions spanning every relay.
//!
//! The coordinator presents N per-relay subscriptions as one: events are
//! deduplicated by id before reaching the caller, the per-relay
//! end-of-stream signals aggregate into a single signal that fires exactly
//! once (with a fallback timer guarding against a silent relay), and a
//! relay-side close tears the whole subscription down everywhere.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use crate::connection::{
    ClosedHandler, EoseHandler, EventHandler, RelayConnection, SubscriptionHandlers,
};
use crate::error::RelayError;
use crate::event::Event;
use crate::filter::Filter;

/// How long to wait for every relay's end-of-stream before firing the
/// unified signal anyway.
const EOSE_FALLBACK: Duration = Duration::from_secs(10);

struct LiveSubscription {
    /// Relays actually subscribed, with their scoped subscription ids.
    relays: Vec<(Arc<RelayConnection>, String)>,
    fallback: Option<JoinHandle<()>>,
}

/// Tracks long-lived subscriptions across the full relay set.
#[derive(Clone)]
pub struct SubscriptionCoordinator {
    connections: Vec<Arc<RelayConnection>>,
    subs: Arc<Mutex<HashMap<String, LiveSubscription>>>,
    eose_fallback: Duration,
}

impl SubscriptionCoordinator {
    /// Build a coordinator over the connection set. An empty set is a
    /// construction error.
    pub fn new(connections: Vec<Arc<RelayConnection>>) -> Result<Self, RelayError> {
        if connections.is_empty() {
            return Err(RelayError::NoRelays);
        }
        Ok(Self {
            connections,
            subs: Arc::new(Mutex::new(HashMap::new())),
            eose_fallback: EOSE_FALLBACK,
        })
    }

    /// Override the end-of-stream fallback window.
    pub fn eose_fallback(mut self, fallback: Duration) -> Self {
        self.eose_fallback = fallback;
        self
    }

    /// Open one logical subscription across every relay.
    ///
    /// Fails with [`RelayError::SubscriptionExists`] when the id is already
    /// tracked. Each relay gets an index-suffixed subscription id. Events
    /// pass through a subscription-scoped dedup set, so the caller sees
    /// each event id once regardless of how many relays deliver it. The
    /// unified `on_eose` fires exactly once: when every relay has signaled
    /// end-of-stream, or at the fallback timeout, whichever comes first.
    /// Any relay closing the subscription invokes `on_closed` and tears
    /// everything down. If subscribing fails on any relay the whole
    /// subscription is unwound and the error lists each failing relay.
    pub async fn create_subscription(
        &self,
        subscription_id: &str,
        filters: &[Filter],
        on_event: EventHandler,
        on_eose: EoseHandler,
        on_closed: ClosedHandler,
    ) -> Result<(), RelayError> {
        {
            let mut subs = self.subs.lock().unwrap();
            if subs.contains_key(subscription_id) {
                return Err(RelayError::SubscriptionExists(subscription_id.to_string()));
            }
            // Placeholder claims the id before any socket work happens.
            subs.insert(
                subscription_id.to_string(),
                LiveSubscription {
                    relays: Vec::new(),
                    fallback: None,
                },
            );
        }

        let seen: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let eose_flags = Arc::new(Mutex::new(vec![false; self.connections.len()]));
        let eose_fired = Arc::new(AtomicBool::new(false));
        let closed_fired = Arc::new(AtomicBool::new(false));

        let results = join_all(self.connections.iter().enumerate().map(|(index, conn)| {
            let scoped = format!("{subscription_id}-{index}");
            let conn = conn.clone();
            let filters = filters.to_vec();
            let handlers = SubscriptionHandlers {
                on_event: {
                    let seen = seen.clone();
                    let on_event = on_event.clone();
                    Arc::new(move |ev: Event| {
                        if seen.lock().unwrap().insert(ev.id.clone()) {
                            on_event(ev);
                        }
                    })
                },
                on_eose: {
                    let flags = eose_flags.clone();
                    let fired = eose_fired.clone();
                    let on_eose = on_eose.clone();
                    let subs = self.subs.clone();
                    let id = subscription_id.to_string();
                    Arc::new(move || {
                        let all = {
                            let mut flags = flags.lock().unwrap();
                            flags[index] = true;
                            flags.iter().all(|&done| done)
                        };
                        if all && !fired.swap(true, Ordering::SeqCst) {
                            if let Some(live) = subs.lock().unwrap().get_mut(&id) {
                                if let Some(timer) = live.fallback.take() {
                                    timer.abort();
                                }
                            }
                            on_eose();
                        }
                    })
                },
                on_closed: {
                    let fired = closed_fired.clone();
                    let on_closed = on_closed.clone();
                    let subs = self.subs.clone();
                    let id = subscription_id.to_string();
                    Arc::new(move |reason: String| {
                        if !fired.swap(true, Ordering::SeqCst) {
                            on_closed(reason);
                            teardown(&subs, &id);
                        }
                    })
                },
            };
            async move {
                let result = conn.subscribe(&scoped, &filters, handlers).await;
                (conn, scoped, result)
            }
        }))
        .await;

        let total = self.connections.len();
        let mut subscribed = Vec::new();
        let mut failures = Vec::new();
        for (conn, scoped, result) in results {
            match result {
                Ok(()) => subscribed.push((conn, scoped)),
                Err(e) => failures.push((conn.url().to_string(), e.to_string())),
            }
        }
        if !failures.is_empty() {
            for (conn, scoped) in &subscribed {
                conn.unsubscribe(scoped);
            }
            self.subs.lock().unwrap().remove(subscription_id);
            return Err(RelayError::SubscribeFailed { total, failures });
        }

        let timer = tokio::spawn({
            let fired = eose_fired.clone();
            let on_eose = on_eose.clone();
            let fallback = self.eose_fallback;
            let id = subscription_id.to_string();
            async move {
                sleep(fallback).await;
                if !fired.swap(true, Ordering::SeqCst) {
                    debug!(subscription = %id, "end-of-stream fallback fired");
                    on_eose();
                }
            }
        });

        let mut subs = self.subs.lock().unwrap();
        match subs.get_mut(subscription_id) {
            Some(live) => {
                live.relays = subscribed;
                live.fallback = Some(timer);
                Ok(())
            }
            None => {
                // A relay-side close raced the setup and already tore the
                // subscription down; unwind what this call created.
                timer.abort();
                for (conn, scoped) in &subscribed {
                    conn.unsubscribe(scoped);
                }
                Ok(())
            }
        }
    }

    /// Close a subscription everywhere. Idempotent: closing an untracked
    /// id is a no-op. Cancels the fallback timer, unsubscribes every
    /// relay best-effort, and deletes the coordinator state exactly once.
    pub fn close_subscription(&self, subscription_id: &str) {
        teardown(&self.subs, subscription_id);
    }

    /// Whether `subscription_id` is currently tracked. No side effects.
    pub fn has_subscription(&self, subscription_id: &str) -> bool {
        self.subs.lock().unwrap().contains_key(subscription_id)
    }
}

fn teardown(subs: &Mutex<HashMap<String, LiveSubscription>>, subscription_id: &str) {
    let live = subs.lock().unwrap().remove(subscription_id);
    if let Some(live) = live {
        if let Some(timer) = live.fallback {
            timer.abort();
        }
        for (conn, scoped) in live.relays {
            conn.unsubscribe(&scoped);
        }
    }
}
