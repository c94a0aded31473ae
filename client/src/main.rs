use clap::Parser;
use client::{Client, ClientEvent};
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server URL to connect to
    #[arg(short = 'u', long, default_value = "ws://127.0.0.1:8080/")]
    url: String,

    /// Exit after receiving this many messages
    #[arg(short = 'n', long)]
    count: Option<usize>,
}

/// Sends each line read from stdin as a text message and prints everything
/// the server sends back.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.url);

    let mut client = Client::connect(&args.url).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut received = 0usize;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => client.send(line).await?,
                None => {
                    info!("Input closed, still receiving");
                    stdin_open = false;
                }
            },
            event = client.next_event() => match event {
                Some(ClientEvent::Message(message)) => {
                    println!("{}", message);
                    received += 1;
                    if args.count.is_some_and(|count| received >= count) {
                        break;
                    }
                }
                Some(ClientEvent::Closed(close)) => {
                    match close.code {
                        Some(code) => println!("Connection closed by server: {} {}", code, close.reason),
                        None => println!("Connection lost"),
                    }
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, disconnecting...");
                break;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
