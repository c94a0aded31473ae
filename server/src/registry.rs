//! Connection registry and per-connection outbound queues
//!
//! This module holds the single source of truth about which connections are
//! live and what is waiting to be sent to each of them:
//! - Connection lifecycle (register, mark closing, unregister)
//! - One FIFO outbound queue per connection
//! - Optional queue bounds with a configurable overflow policy
//! - Point-in-time snapshots of live handles for broadcasting
//!
//! The registry itself is not synchronized. The server keeps it behind one
//! lock together with the running flag, and every mutation happens while
//! that lock is held.

use crate::config::OverflowPolicy;
use crate::transport::ConnectionHandle;
use log::{debug, warn};
use shared::Message;
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    /// The transport reported the connection gone; its dispatch loop will
    /// discard the queue and unregister it.
    Closing,
}

/// A registered connection and the messages waiting for it
#[derive(Debug)]
struct Connection {
    state: ConnectionState,
    queue: VecDeque<Message>,
}

impl Connection {
    fn new() -> Self {
        Self {
            state: ConnectionState::Active,
            queue: VecDeque::new(),
        }
    }
}

/// Result of trying to queue a message for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// Queue was full; the oldest message was evicted to make room.
    EvictedOldest,
    /// Queue was full; the new message was discarded.
    DroppedNewest,
    /// Queue was full and the policy asks the sender to be told.
    Rejected,
    /// Handle unknown or no longer active; the message was discarded.
    NotActive,
}

/// What a dispatch loop should do next for its connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Nothing to send yet.
    Idle,
    Send(Message),
    /// Connection is closing or already gone.
    Exit,
}

/// Tracks every live connection and its outbound queue
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionHandle, Connection>,
    capacity: Option<usize>,
    overflow_policy: OverflowPolicy,
}

impl ConnectionRegistry {
    /// Creates an empty registry with unbounded queues.
    pub fn new() -> Self {
        Self::with_capacity(None, OverflowPolicy::default())
    }

    /// Creates an empty registry whose queues hold at most `capacity`
    /// messages each, applying `overflow_policy` once a queue is full.
    pub fn with_capacity(capacity: Option<usize>, overflow_policy: OverflowPolicy) -> Self {
        Self {
            connections: BTreeMap::new(),
            capacity,
            overflow_policy,
        }
    }

    /// Inserts a new active connection with an empty queue
    ///
    /// Returns false and leaves the existing entry untouched if the handle
    /// is already registered.
    pub fn register(&mut self, handle: ConnectionHandle) -> bool {
        if self.connections.contains_key(&handle) {
            return false;
        }
        self.connections.insert(handle, Connection::new());
        debug!("Registered {} ({} live)", handle, self.connections.len());
        true
    }

    /// Removes a connection and discards its queue
    ///
    /// Returns the number of messages that were still pending, or `None`
    /// if the handle was not registered.
    pub fn unregister(&mut self, handle: ConnectionHandle) -> Option<usize> {
        let connection = self.connections.remove(&handle)?;
        debug!(
            "Unregistered {} ({} pending discarded, {} live)",
            handle,
            connection.queue.len(),
            self.connections.len()
        );
        Some(connection.queue.len())
    }

    /// Moves a connection to `Closing`. Returns false if it is not registered.
    pub fn mark_closing(&mut self, handle: ConnectionHandle) -> bool {
        match self.connections.get_mut(&handle) {
            Some(connection) => {
                connection.state = ConnectionState::Closing;
                true
            }
            None => false,
        }
    }

    /// Appends a message to an active connection's queue
    ///
    /// Messages for unknown or closing connections are discarded. When the
    /// queue is bounded and full, the configured overflow policy decides
    /// which message is lost.
    pub fn enqueue(&mut self, handle: ConnectionHandle, message: Message) -> Enqueued {
        let Some(connection) = self.connections.get_mut(&handle) else {
            return Enqueued::NotActive;
        };
        if connection.state != ConnectionState::Active {
            return Enqueued::NotActive;
        }

        let full = self
            .capacity
            .is_some_and(|capacity| connection.queue.len() >= capacity);
        if !full {
            connection.queue.push_back(message);
            return Enqueued::Queued;
        }

        match self.overflow_policy {
            OverflowPolicy::DropOldest => {
                connection.queue.pop_front();
                connection.queue.push_back(message);
                warn!("Queue for {} full, evicted oldest message", handle);
                Enqueued::EvictedOldest
            }
            OverflowPolicy::DropNewest => {
                warn!("Queue for {} full, dropped new message", handle);
                Enqueued::DroppedNewest
            }
            OverflowPolicy::Reject => {
                warn!("Queue for {} full, rejected new message", handle);
                Enqueued::Rejected
            }
        }
    }

    /// Returns the handles registered right now
    ///
    /// The result is a copy: connections that open or close afterwards do
    /// not change it.
    pub fn snapshot_handles(&self) -> Vec<ConnectionHandle> {
        self.connections.keys().copied().collect()
    }

    /// True when the dispatch loop for `handle` has something to react to:
    /// a queued message, a closing state, or a missing entry.
    pub fn has_work(&self, handle: ConnectionHandle) -> bool {
        match self.connections.get(&handle) {
            Some(connection) => {
                connection.state != ConnectionState::Active || !connection.queue.is_empty()
            }
            None => true,
        }
    }

    /// Takes the next step for a dispatch loop
    ///
    /// A closing connection yields `Exit` even if messages remain queued;
    /// they are never delivered.
    pub fn next_outbound(&mut self, handle: ConnectionHandle) -> Outbound {
        let Some(connection) = self.connections.get_mut(&handle) else {
            return Outbound::Exit;
        };
        if connection.state != ConnectionState::Active {
            return Outbound::Exit;
        }
        match connection.queue.pop_front() {
            Some(message) => Outbound::Send(message),
            None => Outbound::Idle,
        }
    }

    pub fn state(&self, handle: ConnectionHandle) -> Option<ConnectionState> {
        self.connections.get(&handle).map(|connection| connection.state)
    }

    /// Number of messages waiting for `handle` (0 if unknown).
    pub fn pending(&self, handle: ConnectionHandle) -> usize {
        self.connections
            .get(&handle)
            .map_or(0, |connection| connection.queue.len())
    }

    pub fn contains(&self, handle: ConnectionHandle) -> bool {
        self.connections.contains_key(&handle)
    }

    /// Drops every connection and queue.
    pub fn clear(&mut self) {
        self.connections.clear();
    }

    /// Returns the number of currently registered connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns true if no connections are currently registered
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
