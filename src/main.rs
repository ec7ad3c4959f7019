//! casemux - Request/response correlation over a single duplex connection
//!
//! Diagnostic command line for checking a remote peer is reachable and
//! answering.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use casemux::config::{self, Config, TransportKind};
use casemux::protocol::{self, Case, Envelope};
use casemux::{Callback, Client};

/// casemux - request/response over a case-tagged connection
#[derive(Parser)]
#[command(name = "casemux")]
#[command(version = "0.1.0")]
#[command(about = "Talk to a case-tagged request/response endpoint", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the host to connect to
    #[arg(long, global = true)]
    host: Option<String>,

    /// Override the port to connect to
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Override the transport
    #[arg(short, long, global = true, value_enum)]
    transport: Option<TransportArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum TransportArg {
    Websocket,
    Tcp,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Websocket => TransportKind::WebSocket,
            TransportArg::Tcp => TransportKind::Tcp,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and ping the remote peer
    Ping {
        /// Number of pings to send
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },

    /// Connect and print every observation pushed by the remote peer
    Watch {
        /// How long to watch (seconds)
        #[arg(short, long, default_value_t = 10)]
        duration: u64,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol defaults
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    if let Some(host) = &cli.host {
        config.connection.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.connection.port = port;
    }
    if let Some(transport) = cli.transport {
        config.connection.transport = transport.into();
    }

    // Initialize logging
    let filter = match &config.general.log_filter {
        Some(directive) if !cli.verbose => EnvFilter::new(directive),
        _ if cli.verbose || config.general.verbose => EnvFilter::new("debug"),
        _ => EnvFilter::new("info"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Ping { count } => {
            run_ping(&config, count).await?;
        }
        Commands::Watch { duration } => {
            run_watch(&config, Duration::from_secs(duration)).await?;
        }
        Commands::Config { generate, output } => {
            let contents = if generate {
                config::generate_sample_config()?
            } else {
                toml::to_string_pretty(&config)?
            };
            if let Some(path) = output {
                std::fs::write(&path, &contents)?;
                println!("Configuration written to: {}", path.display());
            } else {
                println!("{}", contents);
            }
        }
        Commands::Info => {
            print_info(&config);
        }
    }

    Ok(())
}

/// Ping the remote peer `count` times
async fn run_ping(config: &Config, count: u32) -> anyhow::Result<()> {
    let client = Client::connect(config).await?;

    for i in 1..=count {
        let started = Instant::now();
        let response = client.ping().await?;
        println!(
            "ping {}: {} bytes, status {:?}, {:.1} ms",
            i,
            response.payload.len(),
            response.status,
            started.elapsed().as_secs_f64() * 1000.0
        );
    }

    client.close().await?;
    Ok(())
}

/// Print observations as they arrive
async fn run_watch(config: &Config, duration: Duration) -> anyhow::Result<()> {
    let client = Client::connect(config).await?;

    let printer: Callback<Envelope> = Arc::new(|message: &Envelope| {
        println!(
            "{:?}: {} bytes, status {:?}",
            message.case,
            message.payload.len(),
            message.status
        );
    });
    client
        .connection()
        .register_handler(Case::Observation, printer.clone());

    println!("Watching {} for {:?}...", config.endpoint(), duration);

    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\nStopping...");
        }
    }

    client.connection().deregister_handler(&printer);
    tracing::info!("Final status: {:?}", client.status());

    client.close().await?;
    Ok(())
}

/// Print protocol defaults
fn print_info(config: &Config) {
    println!("casemux");
    println!("=======\n");

    println!("Endpoint: {}", config.endpoint());
    println!("WebSocket URL: {}", config.endpoint().ws_url());
    println!("Transport: {:?}", config.connection.transport);
    println!(
        "Retry: {} attempts, {} ms apart",
        config.retry.max_attempts, config.retry.retry_delay_ms
    );
    println!(
        "Timeouts: steady {} ms, lifecycle {} ms",
        config.timeouts.steady_ms, config.timeouts.lifecycle_ms
    );
    println!("\nDefault Port: {}", protocol::DEFAULT_PORT);
    println!("Max Message Size: {} bytes", protocol::MAX_MESSAGE_SIZE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["casemux", "info"]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from(["casemux", "--transport", "tcp", "-p", "5000", "ping", "-n", "3"])
            .unwrap();
        assert_eq!(cli.port, Some(5000));
        assert!(matches!(cli.transport, Some(TransportArg::Tcp)));
        assert!(matches!(cli.command, Commands::Ping { count: 3 }));
    }
}
