use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::metrics::Metrics;
use crate::models::common::StreamConfig;
use crate::models::events::InboundFrame;
use crate::models::filter::{FilterSpec, SubscriptionRequest};
use crate::stream::timer::DebounceTimer;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Whether the host is in the foreground. Reconnects attempted while hidden are deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

#[derive(Debug)]
pub enum StreamEvent {
    /// Raw events of one inbound frame, in wire order.
    Batch(Vec<Value>),
    /// The connection was lost and a reconnect has been scheduled.
    Closed,
    /// The pending reconnect timer fired; the caller should call [`ConnectionManager::connect`].
    ReconnectDue,
}

/// Owns the single connection to the event stream and its reconnect timer.
///
/// No failure escapes this type: every lifecycle error is logged and turned into a scheduled
/// reconnect. Retries are unbounded.
pub struct ConnectionManager {
    settings: StreamConfig,
    socket: Option<Socket>,
    reconnect: DebounceTimer,
    metrics: Option<Arc<Metrics>>,
}

impl ConnectionManager {
    pub fn new(settings: StreamConfig, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            settings,
            socket: None,
            reconnect: DebounceTimer::new(),
            metrics,
        }
    }

    pub fn is_active(&self) -> bool {
        self.socket.is_some()
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.reconnect.is_pending()
    }

    pub fn reconnect_deadline(&self) -> Option<tokio::time::Instant> {
        self.reconnect.deadline()
    }

    /// Schedules a reconnect attempt, replacing any pending one.
    pub fn schedule_reconnect(&mut self, delay: Duration) {
        debug!("Scheduling reconnect in {:?}", delay);
        self.reconnect.schedule(delay);
    }

    /// Opens a connection subscribed with `filter`. While hidden the attempt is deferred by the
    /// hidden retry delay instead. An already open connection is torn down first.
    pub async fn connect(&mut self, filter: &FilterSpec, visibility: Visibility) {
        self.reconnect.cancel();

        if visibility == Visibility::Hidden {
            debug!(
                "Host is hidden, deferring connection for {:?}",
                self.settings.hidden_retry_delay()
            );
            if let Some(metrics) = &self.metrics {
                metrics.reconnects_deferred.add(1, &metrics.labels());
            }
            self.schedule_reconnect(self.settings.hidden_retry_delay());
            return;
        }

        if self.is_active() {
            self.close().await;
        }

        match self.open(filter).await {
            Ok(socket) => {
                info!(
                    "Connection to {} has been established (actor filter: {})",
                    self.settings.endpoint,
                    filter.actor_account().unwrap_or("none")
                );
                if let Some(metrics) = &self.metrics {
                    metrics.connections_opened.add(1, &metrics.labels());
                }
                self.socket = Some(socket);
            }
            Err(e) => {
                warn!("Failed to connect to {}: {:#}", self.settings.endpoint, e);
                self.schedule_reconnect(self.settings.reconnect_delay());
            }
        }
    }

    async fn open(&self, filter: &FilterSpec) -> Result<Socket> {
        let (mut socket, _) = tokio::time::timeout(
            self.settings.connect_timeout(),
            connect_async(self.settings.endpoint.as_str()),
        )
        .await
        .map_err(|_| anyhow!("timed out after {:?}", self.settings.connect_timeout()))?
        .context("failed to open websocket")?;

        let request = SubscriptionRequest {
            secret: &self.settings.secret,
            filter,
            fetch_past_events: self.settings.fetch_past_events,
        };
        let payload =
            serde_json::to_string(&request).context("failed to encode subscription request")?;
        socket
            .send(Message::Text(payload))
            .await
            .context("failed to send subscription request")?;

        Ok(socket)
    }

    /// Closes the current connection, if any. Does not schedule a reconnect.
    pub async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).await {
                debug!("Error while closing WS connection: {}", e);
            }
            info!("WS connection has been closed");
        }
    }

    /// Waits for the next event batch or for the pending reconnect to come due. Frames that are
    /// not JSON are dropped without closing the connection; frames without an `events` field are
    /// ignored. Pending forever while there is neither a connection nor a pending reconnect.
    /// Cancel-safe.
    pub async fn next_event(&mut self) -> StreamEvent {
        loop {
            let message = tokio::select! {
                _ = self.reconnect.fired() => return StreamEvent::ReconnectDue,
                message = next_message(&mut self.socket) => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.frames_received.add(1, &metrics.labels());
                    }
                    match serde_json::from_str::<InboundFrame>(&text) {
                        Ok(InboundFrame {
                            events: Some(events),
                        }) => return StreamEvent::Batch(events),
                        Ok(_) => debug!("Ignoring frame without events"),
                        Err(e) => {
                            warn!("Dropping malformed frame: {}", e);
                            if let Some(metrics) = &self.metrics {
                                metrics.frames_malformed.add(1, &metrics.labels());
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("WS connection closed by server: {:?}", frame);
                    return self.handle_disconnect();
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    return self.handle_disconnect();
                }
                None => {
                    info!("WS stream ended");
                    return self.handle_disconnect();
                }
            }
        }
    }

    fn handle_disconnect(&mut self) -> StreamEvent {
        self.socket = None;
        if let Some(metrics) = &self.metrics {
            metrics.disconnects.add(1, &metrics.labels());
        }
        self.schedule_reconnect(self.settings.reconnect_delay());
        StreamEvent::Closed
    }
}

async fn next_message(socket: &mut Option<Socket>) -> Option<Result<Message, WsError>> {
    match socket.as_mut() {
        Some(socket) => socket.next().await,
        None => pending().await,
    }
}
