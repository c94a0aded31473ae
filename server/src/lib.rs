//! # Socket Server Library
//!
//! This library provides the connection-management and message-dispatch core
//! of a WebSocket server. It accepts connections for one configured resource
//! path, keeps an outbound queue per connection, and delivers messages to
//! individual clients or to every connected client at once.
//!
//! ## Core Responsibilities
//!
//! ### Connection Validation
//! Every completed handshake is checked against the server's resource path.
//! Clients asking for anything else receive a short text explanation and are
//! closed with a policy-violation code. They never appear in the registry.
//!
//! ### Ordered Delivery
//! Each accepted connection owns a FIFO queue and a dedicated dispatch loop.
//! Messages sent to one connection arrive in the order they were sent, no
//! matter how many threads are sending concurrently.
//!
//! ### Lifecycle Management
//! The server can be started, stopped and started again. Stopping wakes every
//! dispatch loop, waits for all of them to finish, then shuts the transport
//! down and discards whatever was still queued.
//!
//! ## Architecture Design
//!
//! ### One Lock, One Condition Variable
//! The registry, the running flag and the resource path live behind a single
//! mutex. Dispatch loops sleep on one shared condition variable and re-check
//! their own predicate on every wake, so a notification meant for one
//! connection never causes work on another. The lock is never held while the
//! transport is writing.
//!
//! ### Transport Boundary
//! The core does not know about sockets. It talks to a [`Transport`] that
//! reports connection events and delivers bytes. [`WsTransport`] is the
//! production implementation on tokio-tungstenite; [`MemoryTransport`] drives
//! the same core in-process for tests and benchmarks.
//!
//! ## Module Organization
//!
//! ### Control Module (`control`)
//! Public lifecycle and messaging API:
//! - `start`/`stop` and the accepted resource path
//! - Path validation for new connections
//! - Unicast `send` and snapshot-based `broadcast`
//! - Optional inbound-message observer and connection monitor
//!
//! ### Registry Module (`registry`)
//! Connection states and bounded or unbounded outbound queues.
//!
//! ### Dispatch Module (`dispatch`)
//! The per-connection delivery loop.
//!
//! ### Transport Modules (`transport`, `websocket`)
//! The transport traits, connection handles, and both implementations.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{ServerConfig, ServerControl, WsTransport};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), server::ServerError> {
//!     let transport = Arc::new(WsTransport::new("127.0.0.1"));
//!     let server = ServerControl::new(transport, ServerConfig::new("/chat"));
//!
//!     // Echo every inbound message back to its sender
//!     server.set_message_observer(|server, handle, message| {
//!         server.send(handle, message.clone());
//!     });
//!
//!     // Blocks until another clone of `server` calls `stop()`
//!     server.start(8080)
//! }
//! ```

pub mod config;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod transport;
pub mod websocket;
pub mod worker;

pub use config::{OverflowPolicy, ServerConfig};
pub use control::{MessageObserver, ServerControl};
pub use error::{ServerError, TransportError};
pub use transport::memory::MemoryTransport;
pub use transport::{ConnectionEvents, ConnectionHandle, Transport};
pub use websocket::WsTransport;
