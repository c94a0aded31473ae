//! Server lifecycle and the public send/broadcast API
//!
//! `ServerControl` owns the shared core: the connection registry, the
//! running flag and the accepted resource path, all behind one mutex, plus
//! the condition variable every dispatch loop sleeps on. It validates new
//! connections reported by the transport, starts a dispatch loop for each
//! accepted one, and tears everything down again on `stop`.
//!
//! Locking rules:
//! - Every registry mutation and every read of the running flag happens
//!   under the core mutex.
//! - Every change a dispatch loop may be waiting for is followed by
//!   `notify_all`.
//! - The mutex is never held across a transport call.

use crate::config::ServerConfig;
use crate::dispatch;
use crate::error::ServerError;
use crate::registry::{ConnectionRegistry, Enqueued};
use crate::transport::{ConnectionEvents, ConnectionHandle, Transport};
use crate::worker::WorkerTracker;
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex, RwLock};
use shared::{CloseCode, Message, INVALID_PATH_REASON, REJECTION_TEXT, SERVER_CLOSED_REASON};
use std::sync::Arc;
use std::thread;

/// Callback invoked for every inbound message
///
/// It runs on the transport's I/O thread and receives the server itself so
/// it can reply or broadcast without keeping a reference of its own.
pub type MessageObserver<T> =
    Arc<dyn Fn(&ServerControl<T>, ConnectionHandle, &Message) + Send + Sync>;

/// Everything guarded by the core mutex
pub(crate) struct ServerState {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) running: bool,
    /// Set for the whole duration of `start`, including listen and teardown.
    pub(crate) serving: bool,
    /// `stop` arrived while `start` was still listening.
    pub(crate) stop_requested: bool,
    /// A `stop` call is between clearing `running` and clearing the registry.
    pub(crate) stopping: bool,
    pub(crate) path: String,
}

pub(crate) struct Core<T: Transport> {
    pub(crate) state: Mutex<ServerState>,
    pub(crate) changed: Condvar,
    pub(crate) transport: Arc<T>,
    pub(crate) workers: Arc<WorkerTracker>,
    pub(crate) config: ServerConfig,
    observer: RwLock<Option<MessageObserver<T>>>,
}

impl<T: Transport> Core<T> {
    pub(crate) fn new(transport: Arc<T>, config: ServerConfig) -> Self {
        Self {
            state: Mutex::new(ServerState {
                registry: ConnectionRegistry::with_capacity(
                    config.queue_capacity,
                    config.overflow_policy,
                ),
                running: false,
                serving: false,
                stop_requested: false,
                stopping: false,
                path: config.resource_path.clone(),
            }),
            changed: Condvar::new(),
            transport,
            workers: Arc::new(WorkerTracker::new()),
            config,
            observer: RwLock::new(None),
        }
    }
}

/// Handle to a server instance
///
/// Cloning is cheap and every clone controls the same server, so one clone
/// can block in [`ServerControl::start`] while others send, broadcast and
/// eventually call [`ServerControl::stop`].
pub struct ServerControl<T: Transport> {
    core: Arc<Core<T>>,
}

impl<T: Transport> Clone for ServerControl<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Transport> ServerControl<T> {
    pub fn new(transport: Arc<T>, config: ServerConfig) -> Self {
        Self {
            core: Arc::new(Core::new(transport, config)),
        }
    }

    /// Listens on `port` and runs the transport's event loop on the calling
    /// thread until [`ServerControl::stop`] is called
    ///
    /// Fails with [`ServerError::AlreadyRunning`] if another call to `start`
    /// or the `stop` that ends it is still in progress, and with the
    /// transport's error if the port cannot be bound.
    pub fn start(&self, port: u16) -> Result<(), ServerError> {
        self.core.config.validate()?;
        {
            let mut state = self.core.state.lock();
            if state.serving {
                return Err(ServerError::AlreadyRunning);
            }
            state.serving = true;
            state.stop_requested = false;
        }

        let result = self.serve(port);
        {
            let mut state = self.core.state.lock();
            state.serving = false;
            state.stop_requested = false;
        }
        result
    }

    fn serve(&self, port: u16) -> Result<(), ServerError> {
        self.core.transport.listen(port)?;
        let events: Arc<dyn ConnectionEvents> = Arc::new(self.clone());
        {
            let mut state = self.core.state.lock();
            if state.stop_requested {
                drop(state);
                info!("Stop requested while starting, shutting the listener down");
                self.core.transport.stop_event_loop();
                return self
                    .core
                    .transport
                    .run_event_loop(events)
                    .map_err(ServerError::from);
            }
            state.running = true;
            info!("Server listening on port {} for path {:?}", port, state.path);
        }
        self.spawn_monitor();

        let result = self.core.transport.run_event_loop(events);
        if let Err(e) = &result {
            error!("Event loop failed: {}", e);
        }

        // Without a stop() in charge, the teardown happens here.
        let was_running = std::mem::replace(&mut self.core.state.lock().running, false);
        if was_running {
            if result.is_ok() {
                warn!("Event loop ended before stop was requested");
            }
            self.core.changed.notify_all();
            self.wait_for_workers();
            self.core.state.lock().registry.clear();
        }

        let mut state = self.core.state.lock();
        self.core.changed.wait_while(&mut state, |state| state.stopping);
        drop(state);
        debug!("Event loop exited");
        result.map_err(ServerError::from)
    }

    /// Stops accepting and delivering, then shuts the transport down
    ///
    /// Waits for every dispatch loop to finish before the event loop is
    /// stopped, so no loop can touch the transport afterwards. A call that
    /// lands while `start` is still binding makes that `start` return
    /// without serving. Otherwise, calling it when the server is not
    /// running does nothing.
    pub fn stop(&self) {
        {
            let mut state = self.core.state.lock();
            if !state.running {
                if state.serving && !state.stopping {
                    info!("Stop requested before the server finished starting");
                    state.stop_requested = true;
                } else {
                    debug!("Stop requested while not running");
                }
                return;
            }
            state.running = false;
            state.stopping = true;
        }
        self.core.changed.notify_all();
        info!("Stopping server");

        self.wait_for_workers();
        self.core.transport.stop_event_loop();

        let discarded = {
            let mut state = self.core.state.lock();
            let count = state.registry.len();
            state.registry.clear();
            state.stopping = false;
            count
        };
        self.core.changed.notify_all();
        info!("Server stopped ({} connections discarded)", discarded);
    }

    /// Queues `message` for one connection
    ///
    /// Returns false if the server is not running, or if the connection's
    /// queue is full under [`OverflowPolicy::Reject`](crate::config::OverflowPolicy::Reject).
    /// Messages for unknown or closing connections are dropped silently.
    pub fn send(&self, handle: ConnectionHandle, message: impl Into<Message>) -> bool {
        let message = message.into();
        let outcome = {
            let mut state = self.core.state.lock();
            if !state.running {
                debug!("Send to {} refused: server not running", handle);
                return false;
            }
            state.registry.enqueue(handle, message)
        };

        match outcome {
            Enqueued::Queued | Enqueued::EvictedOldest => {
                self.core.changed.notify_all();
                true
            }
            Enqueued::DroppedNewest => true,
            Enqueued::Rejected => false,
            Enqueued::NotActive => {
                debug!("Dropped message for inactive {}", handle);
                true
            }
        }
    }

    /// Queues `message` for every connection registered at the time of the call
    ///
    /// Returns false only if the server is not running.
    pub fn broadcast(&self, message: impl Into<Message>) -> bool {
        let message = message.into();
        let (queued, total) = {
            let mut state = self.core.state.lock();
            if !state.running {
                debug!("Broadcast refused: server not running");
                return false;
            }
            let handles = state.registry.snapshot_handles();
            let queued = handles
                .iter()
                .filter(|&&handle| {
                    matches!(
                        state.registry.enqueue(handle, message.clone()),
                        Enqueued::Queued | Enqueued::EvictedOldest
                    )
                })
                .count();
            (queued, handles.len())
        };

        self.core.changed.notify_all();
        debug!(
            "Broadcast {} bytes queued for {} of {} connections",
            message.len(),
            queued,
            total
        );
        true
    }

    /// Replaces the accepted resource path. Only connections opened
    /// afterwards are checked against the new value.
    pub fn set_path(&self, path: impl Into<String>) {
        let path = path.into();
        let previous = std::mem::replace(&mut self.core.state.lock().path, path.clone());
        info!("Resource path changed from {:?} to {:?}", previous, path);
    }

    pub fn path(&self) -> String {
        self.core.state.lock().path.clone()
    }

    pub fn is_running(&self) -> bool {
        self.core.state.lock().running
    }

    pub fn connection_count(&self) -> usize {
        self.core.state.lock().registry.len()
    }

    /// Messages still queued for `handle`.
    pub fn pending(&self, handle: ConnectionHandle) -> usize {
        self.core.state.lock().registry.pending(handle)
    }

    /// Dispatch loops and monitor threads that have not finished yet.
    pub fn live_workers(&self) -> usize {
        self.core.workers.live()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.core.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.core.transport
    }

    /// Installs the callback run for each inbound message, replacing any previous one.
    pub fn set_message_observer<F>(&self, observer: F)
    where
        F: Fn(&ServerControl<T>, ConnectionHandle, &Message) + Send + Sync + 'static,
    {
        *self.core.observer.write() = Some(Arc::new(observer));
    }

    fn wait_for_workers(&self) {
        let grace = self.core.config.shutdown_grace;
        while !self.core.workers.wait_idle(grace) {
            warn!(
                "Still waiting for {} workers to finish",
                self.core.workers.live()
            );
        }
    }

    /// Periodically logs the number of live connections until the server stops.
    fn spawn_monitor(&self) {
        let Some(interval) = self.core.config.monitor_interval else {
            return;
        };
        let guard = self.core.workers.enter();
        let core = Arc::clone(&self.core);

        let spawned = thread::Builder::new()
            .name("connection-monitor".to_string())
            .spawn(move || {
                let _guard = guard;
                let mut state = core.state.lock();
                while state.running {
                    let result =
                        core.changed
                            .wait_while_for(&mut state, |state| state.running, interval);
                    if result.timed_out() {
                        info!("Current live connections: {}", state.registry.len());
                    }
                }
                debug!("Connection monitor stopped");
            });

        if let Err(e) = spawned {
            warn!("Failed to start connection monitor: {}", e);
        }
    }
}

impl<T: Transport> ConnectionEvents for ServerControl<T> {
    fn on_open(&self, handle: ConnectionHandle, requested_path: &str) {
        let mut state = self.core.state.lock();

        if !state.running {
            drop(state);
            info!("Refusing {}: server is not running", handle);
            self.core
                .transport
                .close_connection(handle, CloseCode::GoingAway, SERVER_CLOSED_REASON);
            return;
        }

        if requested_path != state.path {
            let expected = state.path.clone();
            drop(state);
            warn!(
                "Rejecting {}: requested {:?}, serving {:?}",
                handle, requested_path, expected
            );
            if let Err(e) = self
                .core
                .transport
                .send_bytes(handle, &Message::text(REJECTION_TEXT))
            {
                debug!("Could not notify {} of rejection: {}", handle, e);
            }
            self.core.transport.close_connection(
                handle,
                CloseCode::PolicyViolation,
                INVALID_PATH_REASON,
            );
            return;
        }

        if !state.registry.register(handle) {
            warn!("Ignoring duplicate open for {}", handle);
            return;
        }
        let guard = self.core.workers.enter();
        let live = state.registry.len();
        drop(state);
        info!("Accepted {} on {:?} ({} live)", handle, requested_path, live);

        if let Err(e) = dispatch::spawn(Arc::clone(&self.core), handle, guard) {
            error!("Failed to start dispatch loop for {}: {}", handle, e);
            self.core.state.lock().registry.unregister(handle);
            self.core.transport.close_connection(
                handle,
                CloseCode::InternalError,
                "dispatch unavailable",
            );
        }
    }

    fn on_message(&self, handle: ConnectionHandle, payload: &Message) {
        debug!("Received from {}: {}", handle, payload);
        let observer = self.core.observer.read().clone();
        if let Some(observer) = observer {
            observer(self, handle, payload);
        }
    }

    fn on_close(&self, handle: ConnectionHandle) {
        let marked = self.core.state.lock().registry.mark_closing(handle);
        if marked {
            self.core.changed.notify_all();
            info!("Connection {} closed", handle);
        } else {
            debug!("Close for unregistered {}", handle);
        }
    }
}
