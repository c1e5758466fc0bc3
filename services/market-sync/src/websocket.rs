//! Push channel connector
//!
//! The push side of the sync engine. A connector opens one channel and
//! yields its decoded messages as a stream; the stream ends (or yields an
//! error) when the channel is lost. Reconnecting is not the connector's job:
//! the supervisor decides when a new channel is opened.
//!
//! Flow per session: handshake → `Connected` → messages → `Disconnected`.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use types::errors::ChannelError;

use crate::events::{decode_frame, ChannelEvent, PushMessage};
use crate::supervisor::SessionId;

/// Messages of one open channel.
pub type PushStream = BoxStream<'static, Result<PushMessage, ChannelError>>;

/// Opens push channels.
#[async_trait]
pub trait PushConnector: Send + Sync {
    /// Perform the handshake and return the channel's message stream.
    async fn connect(&self) -> Result<PushStream, ChannelError>;
}

/// Push connector over a WebSocket carrying JSON envelopes.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self) -> Result<PushStream, ChannelError> {
        debug!(url = %self.url, "Connecting to push channel");

        let (ws_stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ChannelError::ConnectFailed(e.to_string()))?;
        info!(url = %self.url, "Push channel handshake complete");

        let stream = ws_stream.filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(text)) => decode_frame(&text).transpose(),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => decode_frame(&text).transpose(),
                    Err(_) => Some(Err(ChannelError::Protocol(
                        "binary frame is not UTF-8".to_string(),
                    ))),
                },
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    Some(Err(ChannelError::Dropped(reason)))
                }
                // Pings are answered by tungstenite itself.
                Ok(_) => None,
                Err(e) => Some(Err(ChannelError::Dropped(e.to_string()))),
            }
        });

        Ok(stream.boxed())
    }
}

/// Run one channel session to completion, reporting through `events`.
///
/// Always ends with exactly one `Disconnected` unless the receiver is gone
/// or the task is aborted.
pub async fn drive_session(
    connector: &dyn PushConnector,
    session: SessionId,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let connected = tokio::time::timeout(connect_timeout, connector.connect()).await;
    let mut stream = match connected {
        Ok(Ok(stream)) => stream,
        Ok(Err(error)) => {
            let _ = events.send(ChannelEvent::Disconnected { session, error });
            return;
        }
        Err(_) => {
            let error = ChannelError::HandshakeTimeout {
                after_ms: connect_timeout.as_millis() as u64,
            };
            let _ = events.send(ChannelEvent::Disconnected { session, error });
            return;
        }
    };

    if events.send(ChannelEvent::Connected { session }).is_err() {
        return;
    }

    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => {
                if events
                    .send(ChannelEvent::Message { session, message })
                    .is_err()
                {
                    return;
                }
            }
            Err(error) => {
                warn!(session = session.0, %error, "Push channel failed");
                let _ = events.send(ChannelEvent::Disconnected { session, error });
                return;
            }
        }
    }

    let error = ChannelError::Dropped("stream ended".to_string());
    let _ = events.send(ChannelEvent::Disconnected { session, error });
}
