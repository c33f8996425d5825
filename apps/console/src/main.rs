//! Interactive console over the session engine
//!
//! Feed events print to stdout as they happen; lines typed on stdin go to
//! the connected device. `--loopback` swaps the hardware transport for the
//! in-memory one with a single auto-granted demo device, so the whole
//! engine can be tried without plugging anything in.

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use futures_channel::mpsc;
use session_actors::{EngineConfig, SessionEngine};
use session_protocol::SessionCommand;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "serial-console", about = "USB serial session console", version)]
struct Cli {
    /// Use the in-memory loopback transport instead of real hardware
    #[arg(long)]
    loopback: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let fallback = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Bridge stdin lines onto a channel; stdin cannot be read async-safely,
/// so a plain thread feeds the runtime
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded();
    std::thread::spawn(move || {
        use std::io::BufRead;
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.unbounded_send(line).is_err() {
                break;
            }
        }
        // EOF or a gone receiver; dropping the sender ends the main loop
    });
    rx
}

fn start_engine(loopback: bool) -> SessionEngine {
    if loopback {
        let host = transport_loopback::LoopbackHost::new();
        host.set_auto_grant(true);
        host.attach(0x0403, 0x6001, "Loopback FT232R");
        let driver = Arc::new(transport_loopback::LoopbackDriver::new(&host));
        SessionEngine::start(Arc::new(host), driver, EngineConfig::default())
    } else {
        let host = transport_serial::NativeHost::start();
        let driver = Arc::new(transport_serial::NativeDriver::new(&host));
        SessionEngine::start(Arc::new(host), driver, EngineConfig::default())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut engine = start_engine(cli.loopback);
    let mut feed = engine.take_event_feed();
    let mut lines = spawn_stdin_reader();

    println!("Type to send, 'scan' to rescan, 'quit' to exit.");

    loop {
        tokio::select! {
            event = feed.next() => {
                match event {
                    Some(event) => println!("{}", event),
                    None => break,
                }
            }
            line = lines.next() => {
                match line.as_deref() {
                    None | Some("quit") | Some("exit") => break,
                    Some("") => {}
                    Some("scan") => {
                        if let Err(e) = engine.send_command(SessionCommand::Scan) {
                            eprintln!("command failed: {}", e);
                        }
                    }
                    Some(text) => {
                        let data = text.as_bytes().to_vec();
                        if let Err(e) = engine.send_command(SessionCommand::Send { data }) {
                            eprintln!("command failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    engine.shutdown().await;
    debug!("console exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
