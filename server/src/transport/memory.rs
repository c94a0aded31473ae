//! In-process transport for driving the core without sockets
//!
//! `MemoryTransport` records every delivery and close the core asks for and
//! lets callers inject the three lifecycle events by hand. It can also be told
//! to fail or hold back deliveries, which makes slow or vanished peers easy
//! to reproduce.

use super::{ConnectionEvents, ConnectionHandle, Transport};
use crate::error::TransportError;
use parking_lot::{Condvar, Mutex};
use shared::{CloseCode, Message};
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// A `close_connection` call observed by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedConnection {
    pub handle: ConnectionHandle,
    pub code: CloseCode,
    pub reason: String,
}

#[derive(Default)]
struct MemoryState {
    port: Option<u16>,
    refuse_listen: bool,
    stopped: bool,
    paused: bool,
    events: Option<Arc<dyn ConnectionEvents>>,
    sent: Vec<(ConnectionHandle, Message)>,
    failed_sends: usize,
    failing: HashSet<ConnectionHandle>,
    closed: Vec<ClosedConnection>,
}

#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
    changed: Condvar,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `listen` fail as if the port were taken.
    pub fn refuse_listen(&self) {
        self.state.lock().refuse_listen = true;
    }

    /// Port passed to the last successful `listen`, while the loop has not ended.
    pub fn listening_port(&self) -> Option<u16> {
        self.state.lock().port
    }

    /// Simulates a client completing a handshake for `path`
    ///
    /// Returns `None` when no event loop is running to report it to.
    pub fn open(&self, path: &str) -> Option<ConnectionHandle> {
        let events = self.events()?;
        let handle = ConnectionHandle::next();
        events.on_open(handle, path);
        Some(handle)
    }

    /// Simulates an inbound message. Returns false when no event loop is running.
    pub fn receive(&self, handle: ConnectionHandle, payload: &Message) -> bool {
        match self.events() {
            Some(events) => {
                events.on_message(handle, payload);
                true
            }
            None => false,
        }
    }

    /// Simulates the peer going away. Returns false when no event loop is running.
    pub fn disconnect(&self, handle: ConnectionHandle) -> bool {
        match self.events() {
            Some(events) => {
                events.on_close(handle);
                true
            }
            None => false,
        }
    }

    /// Makes every delivery to `handle` fail until [`MemoryTransport::restore`].
    pub fn fail_sends_to(&self, handle: ConnectionHandle) {
        self.state.lock().failing.insert(handle);
    }

    pub fn restore(&self, handle: ConnectionHandle) {
        self.state.lock().failing.remove(&handle);
    }

    /// Holds every delivery inside `send_bytes` until [`MemoryTransport::resume_sends`].
    pub fn pause_sends(&self) {
        self.state.lock().paused = true;
    }

    pub fn resume_sends(&self) {
        self.state.lock().paused = false;
        self.changed.notify_all();
    }

    /// Messages delivered to one connection, in delivery order.
    pub fn sent_to(&self, handle: ConnectionHandle) -> Vec<Message> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|(to, _)| *to == handle)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn send_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    pub fn failed_sends(&self) -> usize {
        self.state.lock().failed_sends
    }

    pub fn closed(&self) -> Vec<ClosedConnection> {
        self.state.lock().closed.clone()
    }

    /// Waits until `run_event_loop` is accepting simulated connections.
    pub fn wait_for_event_loop(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        self.changed
            .wait_while_for(&mut state, |state| state.events.is_none(), timeout);
        state.events.is_some()
    }

    /// Waits until at least `count` deliveries succeeded. Returns false on timeout.
    pub fn wait_for_sends(&self, count: usize, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        self.changed
            .wait_while_for(&mut state, |state| state.sent.len() < count, timeout);
        state.sent.len() >= count
    }

    /// Waits until at least `count` deliveries failed. Returns false on timeout.
    pub fn wait_for_failures(&self, count: usize, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        self.changed
            .wait_while_for(&mut state, |state| state.failed_sends < count, timeout);
        state.failed_sends >= count
    }

    fn events(&self) -> Option<Arc<dyn ConnectionEvents>> {
        self.state.lock().events.clone()
    }
}

impl Transport for MemoryTransport {
    fn listen(&self, port: u16) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.refuse_listen {
            return Err(TransportError::Bind {
                port,
                source: io::Error::new(io::ErrorKind::AddrInUse, "listen refused"),
            });
        }
        state.port = Some(port);
        state.stopped = false;
        Ok(())
    }

    fn run_event_loop(&self, events: Arc<dyn ConnectionEvents>) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.port.is_none() {
            return Err(TransportError::NotListening);
        }
        state.events = Some(events);
        self.changed.notify_all();
        self.changed.wait_while(&mut state, |state| !state.stopped);
        state.events = None;
        state.port = None;
        Ok(())
    }

    fn stop_event_loop(&self) {
        self.state.lock().stopped = true;
        self.changed.notify_all();
    }

    fn send_bytes(
        &self,
        handle: ConnectionHandle,
        payload: &Message,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        self.changed.wait_while(&mut state, |state| state.paused);
        let result = if state.failing.contains(&handle) {
            state.failed_sends += 1;
            Err(TransportError::ConnectionClosed(handle))
        } else {
            state.sent.push((handle, payload.clone()));
            Ok(())
        };
        self.changed.notify_all();
        result
    }

    fn close_connection(&self, handle: ConnectionHandle, code: CloseCode, reason: &str) {
        self.state.lock().closed.push(ClosedConnection {
            handle,
            code,
            reason: reason.to_string(),
        });
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_records_sends_and_closes() {
        let transport = MemoryTransport::new();
        let handle = ConnectionHandle::next();

        transport.send_bytes(handle, &Message::text("one")).unwrap();
        transport.close_connection(handle, CloseCode::Normal, "bye");

        assert_eq!(transport.sent_to(handle), vec![Message::text("one")]);
        assert_eq!(
            transport.closed(),
            vec![ClosedConnection {
                handle,
                code: CloseCode::Normal,
                reason: "bye".to_string(),
            }]
        );
    }

    #[test]
    fn test_failing_handle() {
        let transport = MemoryTransport::new();
        let handle = ConnectionHandle::next();
        transport.fail_sends_to(handle);

        assert!(transport.send_bytes(handle, &Message::text("x")).is_err());
        assert_eq!(transport.failed_sends(), 1);

        transport.restore(handle);
        assert!(transport.send_bytes(handle, &Message::text("y")).is_ok());
        assert_eq!(transport.send_count(), 1);
    }

    #[test]
    fn test_event_loop_requires_listen() {
        struct NoEvents;
        impl ConnectionEvents for NoEvents {
            fn on_open(&self, _: ConnectionHandle, _: &str) {}
            fn on_message(&self, _: ConnectionHandle, _: &Message) {}
            fn on_close(&self, _: ConnectionHandle) {}
        }

        let transport = MemoryTransport::new();
        let result = transport.run_event_loop(Arc::new(NoEvents));
        assert!(matches!(result, Err(TransportError::NotListening)));
    }

    #[test]
    fn test_refused_listen() {
        let transport = MemoryTransport::new();
        transport.refuse_listen();
        assert!(matches!(
            transport.listen(9000),
            Err(TransportError::Bind { port: 9000, .. })
        ));
    }

    #[test]
    fn test_events_without_loop_are_ignored() {
        let transport = MemoryTransport::new();
        assert!(transport.open("/").is_none());
        assert!(!transport.disconnect(ConnectionHandle::next()));
    }

    #[test]
    fn test_pause_holds_sends() {
        let transport = Arc::new(MemoryTransport::new());
        let handle = ConnectionHandle::next();
        transport.pause_sends();

        let sender = {
            let transport = Arc::clone(&transport);
            thread::spawn(move || transport.send_bytes(handle, &Message::text("held")))
        };

        assert!(!transport.wait_for_sends(1, Duration::from_millis(30)));
        transport.resume_sends();
        assert!(transport.wait_for_sends(1, Duration::from_secs(5)));
        assert!(sender.join().unwrap().is_ok());
    }
}
