use crate::transport::ConnectionHandle;
use std::io;
use thiserror::Error;

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to start transport runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("transport is not listening")]
    NotListening,

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionHandle),

    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionHandle),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
