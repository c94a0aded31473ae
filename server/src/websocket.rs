//! WebSocket transport built on tokio-tungstenite
//!
//! The listener is bound synchronously in `listen` so bind errors surface
//! before the event loop starts. `run_event_loop` then builds its own
//! multi-threaded runtime and blocks on the accept loop. Each accepted
//! socket gets one task that owns the stream: it reports the handshake's
//! requested resource, forwards inbound frames, and writes whatever the
//! core queues for it through an unbounded channel.

use crate::error::TransportError;
use crate::transport::{ConnectionEvents, ConnectionHandle, Transport};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use shared::{CloseCode, Message, SERVER_CLOSED_REASON};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// How long the accept loop waits for open connections to finish closing
/// after shutdown before aborting them.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type Peers = Arc<Mutex<HashMap<ConnectionHandle, mpsc::UnboundedSender<WsMessage>>>>;

pub struct WsTransport {
    host: String,
    listener: Mutex<Option<std::net::TcpListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
    peers: Peers,
    shutdown: watch::Sender<bool>,
}

impl WsTransport {
    pub fn new(host: impl Into<String>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            host: host.into(),
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
            peers: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        }
    }

    /// Address the listener is bound to, once `listen` succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Number of sockets with a completed handshake.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    async fn accept_loop(
        &self,
        listener: std::net::TcpListener,
        events: Arc<dyn ConnectionEvents>,
    ) -> Result<(), TransportError> {
        let listener = TcpListener::from_std(listener).map_err(TransportError::Runtime)?;
        let mut shutdown = self.shutdown.subscribe();
        let mut connections = JoinSet::new();

        while !*shutdown.borrow_and_update() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted TCP connection from {}", addr);
                        connections.spawn(serve_connection(
                            stream,
                            addr,
                            Arc::clone(&self.peers),
                            Arc::clone(&events),
                        ));
                    }
                    Err(e) => {
                        warn!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        warn!("Connection task failed: {}", e);
                    }
                }
            }
        }

        info!("Accept loop stopped, {} connections still open", connections.len());
        let drained = tokio::time::timeout(CLOSE_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Connections did not close within {:?}, aborting them", CLOSE_TIMEOUT);
        }
        self.peers.lock().clear();
        Ok(())
    }
}

impl Transport for WsTransport {
    fn listen(&self, port: u16) -> Result<(), TransportError> {
        let bind_error = |source| TransportError::Bind { port, source };
        let listener =
            std::net::TcpListener::bind((self.host.as_str(), port)).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;

        let addr = listener.local_addr().map_err(bind_error)?;
        info!("WebSocket listener bound to {}", addr);
        *self.local_addr.lock() = Some(addr);
        *self.listener.lock() = Some(listener);
        self.shutdown.send_replace(false);
        Ok(())
    }

    fn run_event_loop(&self, events: Arc<dyn ConnectionEvents>) -> Result<(), TransportError> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or(TransportError::NotListening)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("ws-io")
            .build()
            .map_err(TransportError::Runtime)?;

        let result = runtime.block_on(self.accept_loop(listener, events));
        *self.local_addr.lock() = None;
        result
    }

    fn stop_event_loop(&self) {
        let peers = self.peers.lock();
        for sender in peers.values() {
            let _ = sender.send(close_frame(CloseCode::GoingAway, SERVER_CLOSED_REASON));
        }
        debug!("Sent close to {} peers", peers.len());
        drop(peers);
        self.shutdown.send_replace(true);
    }

    fn send_bytes(
        &self,
        handle: ConnectionHandle,
        payload: &Message,
    ) -> Result<(), TransportError> {
        let peers = self.peers.lock();
        let sender = peers
            .get(&handle)
            .ok_or(TransportError::UnknownConnection(handle))?;
        sender
            .send(to_ws_message(payload))
            .map_err(|_| TransportError::ConnectionClosed(handle))
    }

    fn close_connection(&self, handle: ConnectionHandle, code: CloseCode, reason: &str) {
        match self.peers.lock().get(&handle) {
            Some(sender) => {
                if sender.send(close_frame(code, reason)).is_err() {
                    debug!("{} already gone before close", handle);
                }
            }
            None => debug!("Close requested for unknown {}", handle),
        }
    }
}

/// Runs one connection from handshake to teardown
async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    peers: Peers,
    events: Arc<dyn ConnectionEvents>,
) {
    let mut resource = String::new();
    let record_resource = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let uri = request.uri();
        resource = uri
            .path_and_query()
            .map(|path| path.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string());
        Ok(response)
    };

    let ws = match accept_hdr_async(stream, record_resource).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let handle = ConnectionHandle::next();
    let (mut sink, mut inbound) = ws.split();
    let (tx, mut outbound) = mpsc::unbounded_channel();
    peers.lock().insert(handle, tx);
    debug!("{} opened from {} requesting {:?}", handle, addr, resource);
    events.on_open(handle, &resource);

    loop {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(message) => {
                    let closing = matches!(message, WsMessage::Close(_));
                    if let Err(e) = sink.send(message).await {
                        debug!("Write to {} failed: {}", handle, e);
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                None => break,
            },
            received = inbound.next() => match received {
                Some(Ok(WsMessage::Text(text))) => events.on_message(handle, &Message::text(text)),
                Some(Ok(WsMessage::Binary(data))) => events.on_message(handle, &Message::binary(data)),
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!("{} sent close: {:?}", handle, frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Read from {} failed: {}", handle, e);
                    break;
                }
                None => break,
            },
        }
    }

    let _ = sink.close().await;
    peers.lock().remove(&handle);
    events.on_close(handle);
}

fn to_ws_message(message: &Message) -> WsMessage {
    match message {
        Message::Text(text) => WsMessage::Text(text.to_string()),
        Message::Binary(data) => WsMessage::Binary(data.to_vec()),
    }
}

fn close_frame(code: CloseCode, reason: &str) -> WsMessage {
    WsMessage::Close(Some(CloseFrame {
        code: WsCloseCode::from(code.as_u16()),
        reason: reason.to_string().into(),
    }))
}
