//! modearb Node - simulated board
//!
//! Runs the full arbitration engine on in-memory storage, links and LEDs.
//! Keys come from a script, from stdin, or both.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use modearb_core::prelude::*;
use modearb_core::sim::SimPlatform;
use modearb_core::LinkBackend;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Simulated mode-arbitration node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Keys to press in order, comma separated (0, 1, 2, w)
    #[arg(short, long, default_value = "")]
    keys: String,

    /// Delay before each scripted key press (ms)
    #[arg(long, default_value = "500")]
    key_interval_ms: u64,

    /// Payload delivered by the host transport at startup (up to 16 bytes)
    #[arg(short, long)]
    payload: Option<String>,

    /// Keys the remote peer sends on whichever link is in control
    #[arg(short, long, default_value = "")]
    remote: String,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Debug)]
enum Command {
    Key(KeyEvent),
    Send(Payload),
    Remote(KeyEvent),
    Status,
    Quit,
}

fn parse_keys(list: &str) -> Result<Vec<KeyEvent>, Error> {
    list.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect()
}

fn to_payload(text: &str) -> Payload {
    let mut payload = [0u8; PAYLOAD_LEN];
    let bytes = text.as_bytes();
    let len = bytes.len().min(PAYLOAD_LEN);
    payload[..len].copy_from_slice(&bytes[..len]);
    payload
}

fn parse_command(line: &str) -> Option<Result<Command, Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let command = match parts.as_slice() {
        [] => return None,
        ["key", key] => key.parse().map(Command::Key),
        ["send", ..] => {
            let text = line.trim_start().trim_start_matches("send").trim();
            Ok(Command::Send(to_payload(text)))
        }
        ["remote", key] => key.parse().map(Command::Remote),
        ["status"] => Ok(Command::Status),
        ["quit"] | ["exit"] => Ok(Command::Quit),
        _ => Err(Error::Config(format!("unknown command '{}'", line.trim()))),
    };
    Some(command)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &args.config {
        Some(path) => ArbiterConfig::load(path)?,
        None => ArbiterConfig::default(),
    };
    let script = parse_keys(&args.keys)?;
    let remote_script = parse_keys(&args.remote)?;

    info!("modearb node starting (simulated platform)");
    let platform = SimPlatform::new();
    let node = Node::new(config, platform.backends())?.spawn();

    if let Some(text) = &args.payload {
        node.deliver_payload(to_payload(text));
    }

    let (command_tx, mut command_rx) = mpsc::channel::<Command>(16);

    // Scripted keys go through the keypad, remote keys through the peer
    let keypad = platform.keypad.clone();
    let script_tx = command_tx.clone();
    let key_interval = Duration::from_millis(args.key_interval_ms);
    tokio::spawn(async move {
        for key in script {
            sleep(key_interval).await;
            keypad.push(key);
        }
        for key in remote_script {
            sleep(key_interval).await;
            if script_tx.send(Command::Remote(key)).await.is_err() {
                break;
            }
        }
    });

    // Spawn stdin handler
    std::thread::spawn(move || {
        println!("\nCommands:");
        println!("  key <0|1|2|w>   - Press a key");
        println!("  send <text>     - Deliver a host payload (16 bytes)");
        println!("  remote <0|1|2|w> - Remote peer sends a key on the active link");
        println!("  status          - Show arbiter state");
        println!("  quit            - Exit\n");

        let stdin = io::stdin();
        for line in stdin.lock().lines().map_while(Result::ok) {
            match parse_command(&line) {
                None => continue,
                Some(Ok(command)) => {
                    if command_tx.blocking_send(command).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => println!("{}", e),
            }
        }
    });

    let mut echoed = 0;
    let mut ticker = interval(Duration::from_millis(50));

    // Main event loop
    loop {
        tokio::select! {
            Some(command) = command_rx.recv() => match command {
                Command::Key(key) => platform.keypad.push(key),
                Command::Send(payload) => node.deliver_payload(payload),
                Command::Remote(key) => match node.snapshot().control.link() {
                    Some(link) => {
                        let mut frame = vec![0u8; link.frame_len()];
                        frame[0] = key.code();
                        if let Err(e) = platform.peer(link).send(&frame) {
                            warn!("remote peer: {}", e);
                        }
                    }
                    None => warn!("no link in control, remote {} not sent", key),
                },
                Command::Status => {
                    let snapshot = node.snapshot();
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                    let stats = node.lock_stats();
                    println!(
                        "buffer lock: {} acquisitions, {} releases",
                        stats.acquisitions, stats.releases
                    );
                }
                Command::Quit => break,
            },

            // Show what the node put on the wire and sent to the host
            _ = ticker.tick() => {
                for link in LinkKind::ALL {
                    while let Some(frame) = platform.peer(link).try_receive() {
                        info!("{} peer <- {:02x?}", link, frame.as_slice());
                    }
                }
                let outbound = platform.host.outbound();
                for bytes in &outbound[echoed..] {
                    info!("host <- {:?}", String::from_utf8_lossy(bytes));
                }
                echoed = outbound.len();
            }

            _ = tokio::signal::ctrl_c() => break,
        }
    }

    for (worker, result) in node.shutdown().await {
        if let Err(e) = result {
            warn!("{} had stopped: {}", worker, e);
        }
    }
    Ok(())
}
