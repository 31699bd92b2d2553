//! Quote stream client.
//!
//! Connects to the backend quote WebSocket, forwards every text frame as a raw message,
//! and reconnects forever with a fixed delay. Each (re)connect is announced with a
//! [`ConnectionStatus`] event so the consumer can reset its session state.

use crate::{error::FeedError, timeout::TimeoutStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

/// Quote stream client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteStreamConfig {
    /// WebSocket endpoint delivering one JSON quote per text frame.
    pub url: String,
    /// Ping interval to keep the connection alive.
    pub ping_interval: Duration,
    /// Delay before reconnecting after a disconnect.
    pub reconnect_delay: Duration,
    /// Capacity of the event channel handed to the consumer.
    pub channel_buffer_size: usize,
    /// Idle period after which the connection is considered dead.
    pub read_timeout: Duration,
}

impl Default for QuoteStreamConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8088/ws/quotes".to_string(),
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            channel_buffer_size: 10_000,
            read_timeout: crate::timeout::DEFAULT_READ_TIMEOUT,
        }
    }
}

impl QuoteStreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Parse the configured url, accepting only `ws` and `wss` schemes.
    pub fn endpoint(&self) -> Result<Url, FeedError> {
        let url = Url::parse(&self.url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            scheme => Err(FeedError::Url(format!(
                "unsupported scheme {scheme} in {}",
                self.url
            ))),
        }
    }
}

/// Connection status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Item delivered to the consumer of a [`QuoteStreamClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Status(ConnectionStatus),
    /// Raw text frame, expected to hold one quote.
    Message(String),
}

#[derive(Debug)]
pub struct QuoteStreamClient {
    config: QuoteStreamConfig,
}

impl QuoteStreamClient {
    pub fn new(config: QuoteStreamConfig) -> Self {
        Self { config }
    }

    /// Spawn the connection loop and return the event receiver.
    ///
    /// The loop stops once the receiver is dropped.
    pub fn start(self) -> Result<mpsc::Receiver<FeedEvent>, FeedError> {
        let endpoint = self.config.endpoint()?;
        let (event_tx, event_rx) = mpsc::channel(self.config.channel_buffer_size.max(1));

        tokio::spawn(async move {
            run_quote_stream_loop(self.config, endpoint, event_tx).await;
        });

        Ok(event_rx)
    }
}

async fn run_quote_stream_loop(
    config: QuoteStreamConfig,
    endpoint: Url,
    event_tx: mpsc::Sender<FeedEvent>,
) {
    info!(url = %endpoint, "starting quote stream client");

    loop {
        if send_status(&event_tx, ConnectionStatus::Reconnecting)
            .await
            .is_err()
        {
            break;
        }

        match run_connection(&config, &endpoint, &event_tx).await {
            Err(FeedError::ChannelClosed) => {
                warn!("event receiver dropped, stopping quote stream client");
                break;
            }
            Err(error) if error.is_terminal() => {
                warn!(%error, "quote stream connection lost, will reconnect");
            }
            Err(error) => {
                error!(%error, "quote stream error, will reconnect");
            }
            Ok(()) => {
                info!("quote stream closed by server, will reconnect");
            }
        }

        if send_status(&event_tx, ConnectionStatus::Disconnected)
            .await
            .is_err()
        {
            break;
        }

        debug!(delay = ?config.reconnect_delay, "waiting before reconnecting");
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn send_status(
    event_tx: &mpsc::Sender<FeedEvent>,
    status: ConnectionStatus,
) -> Result<(), FeedError> {
    event_tx
        .send(FeedEvent::Status(status))
        .await
        .map_err(|_| FeedError::ChannelClosed)
}

/// Drive one connection until it closes, errors or goes idle.
async fn run_connection(
    config: &QuoteStreamConfig,
    endpoint: &Url,
    event_tx: &mpsc::Sender<FeedEvent>,
) -> Result<(), FeedError> {
    let (ws_stream, _) = connect_async(endpoint.as_str())
        .await
        .map_err(|error| FeedError::Connect(error.to_string()))?;

    info!(url = %endpoint, "connected to quote stream");
    send_status(event_tx, ConnectionStatus::Connected).await?;

    let (mut write, read) = ws_stream.split();

    let ping_interval = config.ping_interval;
    let (ping_shutdown_tx, mut ping_shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ping_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if write.send(Message::Ping(vec![].into())).await.is_err() {
                        debug!("failed to send ping, connection likely dead");
                        break;
                    }
                }
                _ = ping_shutdown_rx.recv() => {
                    debug!("ping task shutting down");
                    break;
                }
            }
        }
    });

    let mut read = TimeoutStream::new(read, config.read_timeout);
    let result = forward_messages(&mut read, event_tx).await;
    let _ = ping_shutdown_tx.send(()).await;

    match result {
        Ok(()) if read.timed_out() => Err(FeedError::ReadTimeout(config.read_timeout.as_secs())),
        other => other,
    }
}

async fn forward_messages<S>(read: &mut S, event_tx: &mpsc::Sender<FeedEvent>) -> Result<(), FeedError>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(message) = read.next().await {
        match message? {
            Message::Text(text) => {
                event_tx
                    .send(FeedEvent::Message(text.as_str().to_owned()))
                    .await
                    .map_err(|_| FeedError::ChannelClosed)?;
            }
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    event_tx
                        .send(FeedEvent::Message(text.to_owned()))
                        .await
                        .map_err(|_| FeedError::ChannelClosed)?;
                }
                Err(_) => debug!(len = bytes.len(), "ignoring non-utf8 binary frame"),
            },
            Message::Close(frame) => {
                debug!(?frame, "server closed quote stream");
                return Ok(());
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    Ok(())
}
