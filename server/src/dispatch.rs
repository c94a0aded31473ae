//! Per-connection delivery loop
//!
//! Each accepted connection gets one dedicated thread that sleeps on the
//! shared condition variable until its queue has something in it, the
//! connection is closing, or the server is stopping. Messages leave in the
//! order they were queued and the shared lock is never held while the
//! transport is writing.

use crate::control::Core;
use crate::registry::Outbound;
use crate::transport::{ConnectionHandle, Transport};
use crate::worker::WorkerGuard;
use log::{debug, warn};
use std::io;
use std::sync::Arc;
use std::thread;

/// Why a dispatch loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchExit {
    /// The server stopped. The registry entry is left for `stop` to clear.
    Shutdown,
    /// The connection closed and its queue drained. The entry was removed.
    Closed,
}

/// Starts the loop for `handle` on its own thread
///
/// `guard` keeps the loop counted until the thread finishes, so a failed
/// spawn releases it immediately.
pub(crate) fn spawn<T: Transport>(
    core: Arc<Core<T>>,
    handle: ConnectionHandle,
    guard: WorkerGuard,
) -> io::Result<()> {
    thread::Builder::new()
        .name(format!("dispatch-{}", handle.id()))
        .spawn(move || {
            let _guard = guard;
            run(&core, handle);
        })
        .map(|_| ())
}

/// Delivers queued messages for one connection until it closes or the server stops.
pub(crate) fn run<T: Transport>(core: &Core<T>, handle: ConnectionHandle) -> DispatchExit {
    let mut delivered: u64 = 0;
    let mut failed: u64 = 0;

    loop {
        let message = {
            let mut state = core.state.lock();
            core.changed.wait_while(&mut state, |state| {
                state.running && !state.registry.has_work(handle)
            });

            if !state.running {
                debug!(
                    "Dispatch for {} stopping with server ({} delivered, {} failed)",
                    handle, delivered, failed
                );
                return DispatchExit::Shutdown;
            }

            match state.registry.next_outbound(handle) {
                Outbound::Send(message) => message,
                Outbound::Idle => continue,
                Outbound::Exit => {
                    state.registry.unregister(handle);
                    debug!(
                        "Dispatch for {} finished ({} delivered, {} failed)",
                        handle, delivered, failed
                    );
                    return DispatchExit::Closed;
                }
            }
        };

        match core.transport.send_bytes(handle, &message) {
            Ok(()) => delivered += 1,
            Err(e) => {
                failed += 1;
                warn!("Failed to deliver {} bytes to {}: {}", message.len(), handle, e);
            }
        }
    }
}
