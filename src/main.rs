//! FlashStore - A Networked File Storage Node
//!
//! This is the main entry point for the FlashStore server.
//! It opens the storage directory, binds the listener, and runs the worker
//! pool until Ctrl+C.

use flashstore::server::{RequestDispatcher, ServerConfig};
use std::path::PathBuf;
use std::str::FromStr;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Server configuration
#[derive(Default)]
struct Config {
    server: ServerConfig,
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.server.host = value_of(&args, i, "--host").to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    config.server.port = parse_value(&args, i, "--port", "port number");
                    i += 2;
                }
                "--storage" | "-s" => {
                    config.server.storage_root = PathBuf::from(value_of(&args, i, "--storage"));
                    i += 2;
                }
                "--peer" => {
                    config
                        .server
                        .peers
                        .push(value_of(&args, i, "--peer").to_string());
                    i += 2;
                }
                "--workers" | "-w" => {
                    config.server.workers = parse_value(&args, i, "--workers", "worker count");
                    i += 2;
                }
                "--cache-capacity" => {
                    config.server.cache_capacity =
                        parse_value(&args, i, "--cache-capacity", "cache capacity");
                    i += 2;
                }
                "--queue-capacity" => {
                    config.server.queue_capacity =
                        parse_value(&args, i, "--queue-capacity", "queue capacity");
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("FlashStore version {}", flashstore::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }
}

/// Returns the value following the flag at `i`, exiting if it is missing
fn value_of<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn parse_value<T: FromStr>(args: &[String], i: usize, flag: &str, what: &str) -> T {
    value_of(args, i, flag).parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid {}", what);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
FlashStore - A Networked File Storage Node

USAGE:
    flashstore [OPTIONS]

OPTIONS:
    -h, --host <HOST>              Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>              Port to listen on (default: 9000)
    -s, --storage <DIR>            Storage directory (default: ./storage)
        --peer <HOST:PORT>         Peer that receives replicas (repeatable)
    -w, --workers <N>              Worker tasks (default: 4)
        --cache-capacity <N>       Cached payloads (default: 1000)
        --queue-capacity <N>       Pending connections (default: 1024)
    -v, --version                  Print version information
        --help                     Print this help message

ENVIRONMENT:
    RUST_LOG                       Log filter (default: info)

EXAMPLES:
    flashstore                                 # Start on 127.0.0.1:9000
    flashstore --port 9001 --storage ./node1   # Second node, own directory
    flashstore --peer 10.0.0.2:9000 --peer 10.0.0.3:9000
"#
    );
}

fn print_banner(config: &Config) {
    println!(
        r#"
FlashStore v{} - Networked File Storage Node
──────────────────────────────────────────────────────────────
Listening on   {}
Storage root   {}
Workers        {}
Peers          {}

Use Ctrl+C to shutdown gracefully.
"#,
        flashstore::VERSION,
        config.server.bind_address(),
        config.server.storage_root.display(),
        config.server.workers,
        if config.server.peers.is_empty() {
            "none".to_string()
        } else {
            config.server.peers.join(", ")
        }
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Open storage and bind; either failure aborts startup
    let dispatcher = RequestDispatcher::open(&config.server).await?;
    info!("Listening on {}", dispatcher.local_addr());

    print_banner(&config);

    // Set up graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    dispatcher.run_until(shutdown).await;

    info!("Server shutdown complete");
    Ok(())
}
