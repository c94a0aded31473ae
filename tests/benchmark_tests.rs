//! Performance benchmarks for the connection core

use server::registry::{ConnectionRegistry, Outbound};
use server::{
    ConnectionHandle, MemoryTransport, OverflowPolicy, ServerConfig, ServerControl, ServerError,
};
use shared::Message;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

struct Bench {
    control: ServerControl<MemoryTransport>,
    server: Option<JoinHandle<Result<(), ServerError>>>,
}

impl Bench {
    fn start(config: ServerConfig) -> Self {
        let control = ServerControl::new(Arc::new(MemoryTransport::new()), config);
        let server = {
            let control = control.clone();
            thread::spawn(move || control.start(0))
        };
        assert!(control
            .transport()
            .wait_for_event_loop(Duration::from_secs(5)));
        Self {
            control,
            server: Some(server),
        }
    }

    fn open(&self, count: usize) -> Vec<ConnectionHandle> {
        (0..count)
            .map(|_| self.control.transport().open("/").expect("event loop running"))
            .collect()
    }

    fn stop(&mut self) {
        self.control.stop();
        if let Some(server) = self.server.take() {
            server.join().unwrap().unwrap();
        }
    }
}

impl Drop for Bench {
    fn drop(&mut self) {
        self.control.stop();
    }
}

/// Benchmarks raw registry enqueue and drain
#[test]
fn benchmark_registry_enqueue_drain() {
    let mut registry = ConnectionRegistry::new();
    let handles: Vec<_> = (0..100).map(|_| ConnectionHandle::next()).collect();
    for &handle in &handles {
        registry.register(handle);
    }

    let message = Message::text("payload");
    let per_connection = 1000;
    let start = Instant::now();

    for _ in 0..per_connection {
        for &handle in &handles {
            registry.enqueue(handle, message.clone());
        }
    }
    let mut drained = 0;
    for &handle in &handles {
        while let Outbound::Send(_) = registry.next_outbound(handle) {
            drained += 1;
        }
    }

    let duration = start.elapsed();
    let operations = handles.len() * per_connection;
    println!(
        "Registry: {} enqueue+drain pairs in {:?} ({:.2} ns/op)",
        operations,
        duration,
        duration.as_nanos() as f64 / operations as f64
    );

    assert_eq!(drained, operations);
    // Should complete in under 500ms for 100k messages
    assert!(duration.as_millis() < 500);
}

/// Benchmarks unicast delivery through the dispatch loops
#[test]
fn benchmark_dispatch_throughput() {
    let mut bench = Bench::start(ServerConfig::default());
    let handles = bench.open(10);
    let per_connection = 1000;

    let start = Instant::now();
    for i in 0..per_connection {
        for &handle in &handles {
            assert!(bench.control.send(handle, format!("{}", i)));
        }
    }
    let total = handles.len() * per_connection;
    assert!(bench
        .control
        .transport()
        .wait_for_sends(total, Duration::from_secs(10)));
    let duration = start.elapsed();

    println!(
        "Dispatch: {} messages in {:?} ({:.2} μs/msg)",
        total,
        duration,
        duration.as_micros() as f64 / total as f64
    );

    for &handle in &handles {
        let delivered = bench.control.transport().sent_to(handle);
        let expected: Vec<Message> = (0..per_connection)
            .map(|i| Message::text(format!("{}", i)))
            .collect();
        assert_eq!(delivered, expected);
    }

    // Should complete in under 5 seconds
    assert!(duration.as_secs() < 5);
    bench.stop();
}

/// Benchmarks broadcast fan-out
#[test]
fn benchmark_broadcast_fan_out() {
    let mut bench = Bench::start(ServerConfig::default());
    let handles = bench.open(100);
    let broadcasts = 100;

    let start = Instant::now();
    for i in 0..broadcasts {
        assert!(bench.control.broadcast(format!("round-{}", i)));
    }
    let total = handles.len() * broadcasts;
    assert!(bench
        .control
        .transport()
        .wait_for_sends(total, Duration::from_secs(10)));
    let duration = start.elapsed();

    println!(
        "Broadcast: {} rounds to {} connections in {:?}",
        broadcasts,
        handles.len(),
        duration
    );

    let first = bench.control.transport().sent_to(handles[0]);
    assert_eq!(first.len(), broadcasts);
    assert_eq!(first[0], Message::text("round-0"));

    // Should complete in under 5 seconds
    assert!(duration.as_secs() < 5);
    bench.stop();
}

/// Benchmarks many threads sending concurrently
#[test]
fn benchmark_concurrent_senders() {
    let mut bench = Bench::start(ServerConfig::default());
    let handles = bench.open(8);
    let per_sender = 1000;

    let start = Instant::now();
    let senders: Vec<_> = handles
        .iter()
        .map(|&handle| {
            let control = bench.control.clone();
            thread::spawn(move || {
                for i in 0..per_sender {
                    control.send(handle, vec![i as u8]);
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    let total = handles.len() * per_sender;
    assert!(bench
        .control
        .transport()
        .wait_for_sends(total, Duration::from_secs(10)));
    let duration = start.elapsed();

    println!(
        "Concurrent senders: {} messages from {} threads in {:?}",
        total,
        handles.len(),
        duration
    );

    assert!(duration.as_secs() < 5);
    bench.stop();
}

/// Benchmarks bounded queues under a slow consumer
#[test]
fn benchmark_bounded_queue_overflow() {
    let config = ServerConfig::default().with_queue_capacity(16, OverflowPolicy::DropOldest);
    let mut bench = Bench::start(config);
    let handle = bench.open(1)[0];

    bench.control.transport().pause_sends();
    let iterations = 100_000;
    let start = Instant::now();
    for i in 0..iterations {
        bench.control.send(handle, format!("{}", i));
    }
    let duration = start.elapsed();
    bench.control.transport().resume_sends();

    println!(
        "Overflowing sends: {} in {:?} ({:.2} ns/send)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(bench.control.pending(handle) <= 16);
    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
    bench.stop();
}

/// Benchmarks shutdown with many live dispatch loops
#[test]
fn benchmark_shutdown_latency() {
    let mut bench = Bench::start(ServerConfig::default());
    let handles = bench.open(200);
    for &handle in &handles {
        bench.control.send(handle, "pending");
    }
    assert_eq!(bench.control.live_workers(), 200);

    let start = Instant::now();
    bench.stop();
    let duration = start.elapsed();

    println!("Shutdown of {} connections in {:?}", handles.len(), duration);

    assert_eq!(bench.control.live_workers(), 0);
    assert_eq!(bench.control.connection_count(), 0);
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}
