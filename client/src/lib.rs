//! # Socket Client Library
//!
//! This library provides a small WebSocket client for talking to the socket
//! server. It is used by the `client` binary for interactive sessions and by
//! the workspace integration tests to drive a real server over real sockets.
//!
//! ## Architecture Overview
//!
//! A [`Client`] owns the write half of the connection and awaits each send
//! directly. The read half runs in a background task that turns incoming
//! frames into [`ClientEvent`]s and hands them over through a channel, so
//! messages are observed in exactly the order the server sent them.
//!
//! When the server closes the connection the task records the close code and
//! reason, emits one final [`ClientEvent::Closed`], and from then on sends
//! fail with [`ClientError::NotConnected`].
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), client::ClientError> {
//!     let mut client = Client::connect("ws://127.0.0.1:8080/").await?;
//!     client.send("hello").await?;
//!
//!     if let Some(reply) = client.receive().await {
//!         println!("server said: {}", reply);
//!     }
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod network;

pub use network::{Client, ClientError, ClientEvent, CloseInfo};
