use clap::Parser;
use log::{debug, error, info};
use server::{OverflowPolicy, ServerConfig, ServerControl, WsTransport};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Interface to listen on
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Resource path clients must request
    #[arg(long, default_value = shared::DEFAULT_PATH)]
    path: String,

    /// Maximum queued messages per connection (unbounded when omitted)
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// What to do with a message for a full queue
    #[arg(long, value_enum, default_value_t = OverflowPolicy::DropNewest)]
    overflow: OverflowPolicy,

    /// Interval between progress reports while shutting down, in milliseconds
    #[arg(long, default_value = "1000")]
    grace_ms: u64,

    /// Log the live connection count every N seconds
    #[arg(long)]
    monitor_secs: Option<u64>,

    /// Broadcast every inbound message to all connections
    #[arg(long)]
    relay: bool,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::new(self.path.clone())
            .with_shutdown_grace(Duration::from_millis(self.grace_ms));
        config.overflow_policy = self.overflow;
        if let Some(capacity) = self.queue_capacity {
            config = config.with_queue_capacity(capacity, self.overflow);
        }
        if let Some(secs) = self.monitor_secs {
            config = config.with_monitor_interval(Duration::from_secs(secs));
        }
        config
    }
}

/// Runs the server on a dedicated thread, since the WebSocket transport
/// drives its own runtime, and stops it on Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = args.server_config();
    config.validate()?;

    let server = ServerControl::new(Arc::new(WsTransport::new(args.host.clone())), config);
    if args.relay {
        server.set_message_observer(|server, handle, message| {
            debug!("Relaying {} bytes from {}", message.len(), handle);
            server.broadcast(message.clone());
        });
    }

    info!("Starting server on {}:{}", args.host, args.port);
    info!("Accepting connections for {:?}", args.path);

    let (done_tx, mut done_rx) = oneshot::channel();
    {
        let server = server.clone();
        let port = args.port;
        thread::Builder::new()
            .name("server".to_string())
            .spawn(move || {
                let _ = done_tx.send(server.start(port));
            })?;
    }

    let outcome = tokio::select! {
        finished = &mut done_rx => finished,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            let stopper = server.clone();
            tokio::task::spawn_blocking(move || stopper.stop()).await?;
            done_rx.await
        }
    };

    match outcome {
        Ok(Ok(())) => {
            info!("Server shut down");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Server failed: {}", e);
            Err(e.into())
        }
        Err(_) => Err("server thread exited without reporting a result".into()),
    }
}
