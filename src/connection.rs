//! Client connection to a single relay.
//!
//! A [`RelayConnection`] owns one WebSocket to one relay endpoint: the
//! connect/reconnect lifecycle, the outbound queue that flushes once the
//! socket is up, the publish-acknowledgement correlation map, and the
//! per-subscription handler registry that inbound frames are routed
//! through. Correlation and handler state belong to the orchestration
//! layer's lifetime, not the socket's: dropping the transport never clears
//! them.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::RelayError;
use crate::event::Event;
use crate::filter::Filter;
use crate::frame::{self, RelayFrame};

/// How long to wait for a publish acknowledgement.
const ACK_TIMEOUT: Duration = Duration::from_secs(10);
/// Fixed delay between automatic reconnect attempts.
const RETRY_DELAY: Duration = Duration::from_secs(3);
/// Automatic reconnect attempts before giving up until the next operation.
const MAX_RETRIES: u32 = 5;

/// Callback invoked for each event delivered on a subscription.
pub type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;
/// Callback invoked when a relay signals end of stored events.
pub type EoseHandler = Arc<dyn Fn() + Send + Sync>;
/// Callback invoked when a relay terminates a subscription, with the reason.
pub type ClosedHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Callbacks registered for one subscription on one relay.
#[derive(Clone)]
pub struct SubscriptionHandlers {
    pub on_event: EventHandler,
    pub on_eose: EoseHandler,
    pub on_closed: ClosedHandler,
}

/// Relay acknowledgement for a published event.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishAck {
    pub accepted: bool,
    pub message: String,
}

/// Transport state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Registered {
    /// Kept so the subscription can be replayed after a reconnect.
    filters: Vec<Filter>,
    handlers: SubscriptionHandlers,
}

struct Shared {
    state: ConnectionState,
    /// Reconnect attempts since the last successful connect.
    attempts: u32,
    /// Bumped per installed socket; stale reader tasks compare against it
    /// so a superseded socket's closure cannot clobber a newer one.
    epoch: u64,
    writer: Option<mpsc::UnboundedSender<Message>>,
    /// Outbound frames waiting for the socket; flushed FIFO on connect.
    queue: VecDeque<String>,
    pending: HashMap<String, oneshot::Sender<PublishAck>>,
    subs: HashMap<String, Registered>,
}

/// Connection to a single relay endpoint.
#[derive(Clone)]
pub struct RelayConnection {
    url: String,
    proxy: Option<String>,
    ack_timeout: Duration,
    retry_delay: Duration,
    max_retries: u32,
    shared: Arc<Mutex<Shared>>,
    /// Serializes connect attempts so concurrent callers share one socket.
    connect_gate: Arc<tokio::sync::Mutex<()>>,
}

impl RelayConnection {
    /// Create a connection for `url`, optionally dialing through a SOCKS5
    /// proxy. No socket is opened until the first operation needs one.
    pub fn new(url: impl Into<String>, proxy: Option<String>) -> Self {
        Self {
            url: url.into(),
            proxy,
            ack_timeout: ACK_TIMEOUT,
            retry_delay: RETRY_DELAY,
            max_retries: MAX_RETRIES,
            shared: Arc::new(Mutex::new(Shared {
                state: ConnectionState::Disconnected,
                attempts: 0,
                epoch: 0,
                writer: None,
                queue: VecDeque::new(),
                pending: HashMap::new(),
                subs: HashMap::new(),
            })),
            connect_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Override the publish acknowledgement window.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Override the delay between automatic reconnect attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Override the automatic reconnect attempt cap.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Relay endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current transport state.
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().unwrap().state
    }

    /// Open the socket. Idempotent: a no-op while connected. On success the
    /// outbound queue is flushed FIFO, every registered subscription is
    /// re-issued, and the reconnect counter resets.
    pub async fn connect(&self) -> Result<(), RelayError> {
        let _gate = self.connect_gate.lock().await;
        {
            let mut s = self.shared.lock().unwrap();
            if s.state == ConnectionState::Connected && s.writer.is_some() {
                return Ok(());
            }
            s.state = ConnectionState::Connecting;
        }
        match open_socket(&self.url, self.proxy.as_deref()).await {
            Ok(ws) => {
                self.install(ws);
                Ok(())
            }
            Err(e) => {
                self.shared.lock().unwrap().state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Close the socket if open and mark the connection disconnected.
    /// Pending acknowledgements and subscription handlers are untouched;
    /// they belong to the orchestration layer.
    pub fn disconnect(&self) {
        let mut s = self.shared.lock().unwrap();
        s.epoch += 1;
        s.state = ConnectionState::Disconnected;
        if let Some(writer) = s.writer.take() {
            let _ = writer.send(Message::Close(None));
        }
    }

    /// Publish an event and wait for the relay's acknowledgement. When
    /// disconnected the frame is queued and a connect is triggered first.
    /// The pending correlation entry is removed exactly once: on the ack,
    /// on timeout, or when the connect fails.
    pub async fn publish(&self, event: &Event) -> Result<PublishAck, RelayError> {
        let (tx, rx) = oneshot::channel();
        let text = frame::publish_frame(event);
        let mut need_connect = false;
        {
            let mut s = self.shared.lock().unwrap();
            s.pending.insert(event.id.clone(), tx);
            let sent = s.state == ConnectionState::Connected
                && s.writer
                    .as_ref()
                    .is_some_and(|w| w.send(Message::Text(text.clone())).is_ok());
            if !sent {
                s.queue.push_back(text);
                need_connect = true;
            }
        }
        if need_connect {
            if let Err(e) = self.connect().await {
                self.shared.lock().unwrap().pending.remove(&event.id);
                return Err(e);
            }
        }
        match timeout(self.ack_timeout, rx).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) | Err(_) => {
                self.shared.lock().unwrap().pending.remove(&event.id);
                Err(RelayError::AckTimeout {
                    url: self.url.clone(),
                    timeout: self.ack_timeout,
                })
            }
        }
    }

    /// Register a subscription and send its `REQ` frame, connecting first
    /// when necessary. Idempotent per id: re-subscribing an active id is a
    /// no-op. The filters are retained so a reconnect can resume the
    /// subscription.
    pub async fn subscribe(
        &self,
        subscription_id: &str,
        filters: &[Filter],
        handlers: SubscriptionHandlers,
    ) -> Result<(), RelayError> {
        {
            let mut s = self.shared.lock().unwrap();
            if s.subs.contains_key(subscription_id) {
                return Ok(());
            }
            s.subs.insert(
                subscription_id.to_string(),
                Registered {
                    filters: filters.to_vec(),
                    handlers,
                },
            );
            if s.state == ConnectionState::Connected {
                if let Some(writer) = &s.writer {
                    let _ = writer.send(Message::Text(frame::req_frame(subscription_id, filters)));
                    return Ok(());
                }
            }
        }
        // The connect path replays every registered subscription, which
        // covers the one just inserted.
        match self.connect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.lock().unwrap().subs.remove(subscription_id);
                Err(e)
            }
        }
    }

    /// Drop the handlers for `subscription_id` and send a `CLOSE` frame
    /// best-effort while connected. Never fails outward.
    pub fn unsubscribe(&self, subscription_id: &str) {
        let mut s = self.shared.lock().unwrap();
        s.subs.remove(subscription_id);
        if s.state == ConnectionState::Connected {
            if let Some(writer) = &s.writer {
                let _ = writer.send(Message::Text(frame::close_frame(subscription_id)));
            }
        }
    }

    /// Adopt a freshly opened socket: spawn the writer and reader tasks,
    /// flush the outbound queue FIFO, replay registered subscriptions, and
    /// reset the reconnect counter.
    fn install(&self, ws: WsStream) {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let (epoch, backlog, resubs) = {
            let mut s = self.shared.lock().unwrap();
            s.epoch += 1;
            s.state = ConnectionState::Connected;
            s.attempts = 0;
            s.writer = Some(tx.clone());
            let backlog: Vec<String> = s.queue.drain(..).collect();
            let resubs: Vec<(String, Vec<Filter>)> = s
                .subs
                .iter()
                .map(|(id, reg)| (id.clone(), reg.filters.clone()))
                .collect();
            (s.epoch, backlog, resubs)
        };
        for text in backlog {
            let _ = tx.send(Message::Text(text));
        }
        for (id, filters) in resubs {
            let _ = tx.send(Message::Text(frame::req_frame(&id, &filters)));
        }

        let conn = self.clone();
        tokio::spawn(async move {
            while let Some(res) = stream.next().await {
                match res {
                    Ok(Message::Text(text)) => conn.dispatch(RelayFrame::parse(&text)),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            conn.transport_closed(epoch);
        });
    }

    /// Route one parsed inbound frame. Handlers run outside the state lock,
    /// so a callback may re-enter this connection without deadlocking.
    fn dispatch(&self, frame: RelayFrame) {
        match frame {
            RelayFrame::Ack {
                event_id,
                accepted,
                message,
            } => {
                let pending = self.shared.lock().unwrap().pending.remove(&event_id);
                match pending {
                    Some(tx) => {
                        let _ = tx.send(PublishAck { accepted, message });
                    }
                    None => debug!(url = %self.url, %event_id, "ack with no pending publish"),
                }
            }
            RelayFrame::Event {
                subscription_id,
                event,
            } => {
                let handler = {
                    let s = self.shared.lock().unwrap();
                    s.subs
                        .get(&subscription_id)
                        .map(|reg| reg.handlers.on_event.clone())
                };
                if let Some(on_event) = handler {
                    on_event(event);
                }
            }
            RelayFrame::EndOfStream { subscription_id } => {
                let handler = {
                    let s = self.shared.lock().unwrap();
                    s.subs
                        .get(&subscription_id)
                        .map(|reg| reg.handlers.on_eose.clone())
                };
                if let Some(on_eose) = handler {
                    on_eose();
                }
            }
            RelayFrame::Closed {
                subscription_id,
                reason,
            } => {
                let handler = self
                    .shared
                    .lock()
                    .unwrap()
                    .subs
                    .remove(&subscription_id)
                    .map(|reg| reg.handlers.on_closed.clone());
                if let Some(on_closed) = handler {
                    on_closed(reason);
                }
            }
            RelayFrame::Notice { message } => {
                info!(url = %self.url, %message, "relay notice");
            }
            RelayFrame::Unknown => {}
        }
    }

    /// Called by the reader task when its socket closes. Stale epochs are
    /// ignored: the socket was already replaced or deliberately closed.
    fn transport_closed(&self, epoch: u64) {
        let retry = {
            let mut s = self.shared.lock().unwrap();
            if s.epoch != epoch {
                return;
            }
            s.state = ConnectionState::Disconnected;
            s.writer = None;
            s.attempts < self.max_retries
        };
        warn!(url = %self.url, "connection closed unexpectedly");
        if retry {
            let conn = self.clone();
            tokio::spawn(async move { conn.reconnect_loop().await });
        }
    }

    /// Fixed-delay retry loop, bounded by the attempt cap. A successful
    /// connect resets the counter; past the cap the connection stays
    /// disconnected until the next operation triggers a fresh connect.
    async fn reconnect_loop(&self) {
        loop {
            {
                let mut s = self.shared.lock().unwrap();
                if s.state != ConnectionState::Disconnected {
                    return;
                }
                if s.attempts >= self.max_retries {
                    warn!(url = %self.url, attempts = s.attempts, "reconnect attempts exhausted");
                    return;
                }
                s.attempts += 1;
            }
            sleep(self.retry_delay).await;
            match self.connect().await {
                Ok(()) => {
                    debug!(url = %self.url, "reconnected");
                    return;
                }
                Err(e) => warn!(url = %self.url, error = %e, "reconnect attempt failed"),
            }
        }
    }
}

type WsStream = WebSocketStream<Box<dyn AsyncReadWrite + Unpin + Send>>;

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
async fn open_socket(url: &str, proxy: Option<&str>) -> Result<WsStream, RelayError> {
    let parsed = Url::parse(url).map_err(|e| RelayError::connection(url, e))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| RelayError::connection(url, "missing host"))?
        .to_string();
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| RelayError::connection(url, "missing port"))?;
    let request = url
        .into_client_request()
        .map_err(|e| RelayError::connection(url, e))?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = proxy {
        Box::new(
            Socks5Stream::connect(proxy, (host.as_str(), port))
                .await
                .map_err(|e| RelayError::connection(url, e))?,
        )
    } else {
        Box::new(
            TcpStream::connect((host.as_str(), port))
                .await
                .map_err(|e| RelayError::connection(url, e))?,
        )
    };
    let (ws, _) = client_async(request, stream)
        .await
        .map_err(|e| RelayError::connection(url, e))?;
    Ok(ws)
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
