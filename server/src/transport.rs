//! Boundary between the connection core and the byte-moving transport
//!
//! The core never touches sockets. A transport turns accepted connections
//! into three lifecycle events (`ConnectionEvents`) and offers the primitives
//! the core needs in return (`Transport`): deliver one message, close one
//! connection, and run or stop its event loop.

pub mod memory;

use crate::error::TransportError;
use shared::{CloseCode, Message};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one live connection
///
/// Handles are minted by the transport from a process-wide counter, so two
/// handles compare equal only when they name the same connection. Ordering
/// and hashing follow the identity token and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// Mints a handle that has never been issued before in this process.
    pub fn next() -> Self {
        ConnectionHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle events raised by a transport.
///
/// Implementations must tolerate concurrent calls from several I/O threads.
pub trait ConnectionEvents: Send + Sync + 'static {
    /// A handshake completed and the client asked for `requested_path`.
    fn on_open(&self, handle: ConnectionHandle, requested_path: &str);

    /// A complete text or binary message arrived.
    fn on_message(&self, handle: ConnectionHandle, payload: &Message);

    /// The connection is gone. Raised at most once per handle.
    fn on_close(&self, handle: ConnectionHandle);
}

/// Primitives the core calls on the transport
pub trait Transport: Send + Sync + 'static {
    /// Binds the listening socket. Port 0 lets the OS pick one.
    fn listen(&self, port: u16) -> Result<(), TransportError>;

    /// Accepts connections and reports their events until
    /// [`Transport::stop_event_loop`] is called. Blocks the calling thread.
    fn run_event_loop(&self, events: Arc<dyn ConnectionEvents>) -> Result<(), TransportError>;

    fn stop_event_loop(&self);

    /// Hands one message to the connection. Must not block on the peer.
    fn send_bytes(&self, handle: ConnectionHandle, payload: &Message)
        -> Result<(), TransportError>;

    fn close_connection(&self, handle: ConnectionHandle, code: CloseCode, reason: &str);
}
