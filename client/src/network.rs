//! WebSocket client connection
//!
//! The write half stays with the `Client` so sends are awaited by the
//! caller. The read half runs in a background task that forwards frames, in
//! arrival order, as [`ClientEvent`]s.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{CloseCode, Message, CLIENT_CLOSING_REASON};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `disconnect` waits for the server to finish the closing handshake.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("failed to send message: {0}")]
    Send(#[source] tungstenite::Error),

    #[error("not connected")]
    NotConnected,
}

/// Close frame received from the server
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloseInfo {
    /// `None` when the connection ended without a close frame.
    pub code: Option<CloseCode>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Message(Message),
    /// Always the last event of a connection.
    Closed(CloseInfo),
}

pub struct Client {
    url: String,
    sink: SplitSink<WsStream, WsMessage>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    connected: Arc<AtomicBool>,
    close_info: Option<CloseInfo>,
    reader: JoinHandle<()>,
}

impl Client {
    /// Opens a connection to `url`, e.g. `ws://127.0.0.1:8080/chat`.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (ws, response) = connect_async(url)
            .await
            .map_err(|source| ClientError::Connect {
                url: url.to_string(),
                source,
            })?;
        debug!("Handshake with {} answered {}", url, response.status());

        let (sink, stream) = ws.split();
        let (tx, events) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_frames(stream, tx, Arc::clone(&connected)));

        info!("Connected to {}", url);
        Ok(Self {
            url: url.to_string(),
            sink,
            events,
            connected,
            close_info: None,
            reader,
        })
    }

    /// False once the server has sent a close frame or the stream ended.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub async fn send(&mut self, message: impl Into<Message>) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let frame = match message.into() {
            Message::Text(text) => WsMessage::Text(text.to_string()),
            Message::Binary(data) => WsMessage::Binary(data.to_vec()),
        };
        self.sink.send(frame).await.map_err(ClientError::Send)
    }

    /// Waits for the next event. Returns `None` after `Closed` was delivered.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        let event = self.events.recv().await?;
        if let ClientEvent::Closed(info) = &event {
            self.close_info = Some(info.clone());
        }
        Some(event)
    }

    /// Waits for the next message, or `None` once the connection is closed.
    pub async fn receive(&mut self) -> Option<Message> {
        loop {
            match self.next_event().await? {
                ClientEvent::Message(message) => return Some(message),
                ClientEvent::Closed(_) => continue,
            }
        }
    }

    /// How the server closed the connection, once that event was observed.
    pub fn close_info(&self) -> Option<&CloseInfo> {
        self.close_info.as_ref()
    }

    /// Sends a normal close frame and waits briefly for the server to answer.
    pub async fn disconnect(mut self) {
        if self.is_connected() {
            let frame = WsMessage::Close(Some(CloseFrame {
                code: WsCloseCode::from(CloseCode::Normal.as_u16()),
                reason: CLIENT_CLOSING_REASON.into(),
            }));
            if let Err(e) = self.sink.send(frame).await {
                debug!("Close frame to {} not sent: {}", self.url, e);
            }
        }
        let _ = self.sink.close().await;

        if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut self.reader)
            .await
            .is_err()
        {
            warn!("Server at {} did not finish closing in time", self.url);
        }
        info!("Disconnected from {}", self.url);
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url)
            .field("connected", &self.is_connected())
            .field("close_info", &self.close_info)
            .finish()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_frames(
    mut stream: SplitStream<WsStream>,
    events: mpsc::UnboundedSender<ClientEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut close_info = CloseInfo::default();

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                let _ = events.send(ClientEvent::Message(Message::text(text)));
            }
            Ok(WsMessage::Binary(data)) => {
                let _ = events.send(ClientEvent::Message(Message::binary(data)));
            }
            Ok(WsMessage::Close(frame)) => {
                connected.store(false, Ordering::Release);
                if let Some(frame) = frame {
                    close_info = CloseInfo {
                        code: Some(CloseCode::from(u16::from(frame.code))),
                        reason: frame.reason.into_owned(),
                    };
                }
                debug!("Close frame received: {:?}", close_info);
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Read failed: {}", e);
                break;
            }
        }
    }

    connected.store(false, Ordering::Release);
    let _ = events.send(ClientEvent::Closed(close_info));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tokio_test::{assert_err, assert_ok};
    use tokio_tungstenite::accept_async;

    /// Echoes every data frame; answers the first frame with `close_with`
    /// instead when set.
    async fn spawn_server(close_with: Option<(u16, &'static str)>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(frame)) = ws.next().await {
                        if !(frame.is_text() || frame.is_binary()) {
                            continue;
                        }
                        let reply = match close_with {
                            Some((code, reason)) => WsMessage::Close(Some(CloseFrame {
                                code: WsCloseCode::from(code),
                                reason: reason.into(),
                            })),
                            None => frame,
                        };
                        if ws.send(reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let result = Client::connect("ws://127.0.0.1:1/").await;
        assert_err!(&result);
        assert!(matches!(result, Err(ClientError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        assert_err!(Client::connect("not a url").await);
    }

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let addr = spawn_server(None).await;
        let mut client = assert_ok!(Client::connect(&format!("ws://{}/", addr)).await);
        assert!(client.is_connected());

        assert_ok!(client.send("first").await);
        assert_ok!(client.send(vec![1u8, 2, 3]).await);
        assert_ok!(client.send("third").await);

        assert_eq!(client.receive().await, Some(Message::text("first")));
        assert_eq!(client.receive().await, Some(Message::binary(vec![1u8, 2, 3])));
        assert_eq!(client.receive().await, Some(Message::text("third")));

        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_server_close_is_reported() {
        let addr = spawn_server(Some((1008, "go away"))).await;
        let mut client = assert_ok!(Client::connect(&format!("ws://{}/", addr)).await);

        assert_ok!(client.send("trigger").await);
        assert_eq!(
            client.next_event().await,
            Some(ClientEvent::Closed(CloseInfo {
                code: Some(CloseCode::PolicyViolation),
                reason: "go away".to_string(),
            }))
        );
        assert!(client.next_event().await.is_none());
        assert!(!client.is_connected());
        assert_eq!(
            client.close_info().and_then(|info| info.code),
            Some(CloseCode::PolicyViolation)
        );
        assert!(matches!(
            client.send("late").await,
            Err(ClientError::NotConnected)
        ));
    }
}
