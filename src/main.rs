//! linequeue - A Reliable Message-Queue Server
//!
//! This is the main entry point for the server.
//! It sets up the TCP listener, the queues, and handles incoming connections.

use clap::Parser;
use linequeue::connection::{handle_connection, ConnectionRegistry};
use linequeue::queue::{QueueCollection, QueueConfig, QueueSweeper, SweeperConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Server configuration
#[derive(Debug, Parser)]
#[command(name = "linequeue", version, about = "A reliable message-queue server")]
struct Config {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = linequeue::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = linequeue::DEFAULT_PORT)]
    port: u16,

    /// Maximum pending items per queue (0 = unbounded)
    #[arg(long, default_value_t = 0)]
    max_items: usize,

    /// Requeue unconfirmed reads older than this many milliseconds (0 = never)
    #[arg(long, default_value_t = 30_000)]
    transaction_timeout_ms: u64,

    /// Base interval of the background sweeper in milliseconds
    #[arg(long, default_value_t = 100)]
    sweep_interval_ms: u64,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Config {
    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_items: self.max_items,
            transaction_timeout: match self.transaction_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }

    fn sweeper_config(&self) -> SweeperConfig {
        let base_interval = Duration::from_millis(self.sweep_interval_ms.max(1));
        let defaults = SweeperConfig::default();
        SweeperConfig {
            base_interval,
            min_interval: defaults.min_interval.min(base_interval),
            max_interval: defaults.max_interval.max(base_interval),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Set up logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        version = linequeue::VERSION,
        address = %config.bind_address(),
        "Starting linequeue"
    );

    // Queues are shared across all connections
    let queues = Arc::new(QueueCollection::with_config(config.queue_config()));

    let _sweeper = QueueSweeper::start(Arc::clone(&queues), config.sweeper_config());

    let registry = Arc::new(ConnectionRegistry::new());

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", config.bind_address());

    // Set up graceful shutdown
    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    };

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&queues), Arc::clone(&registry)) => {}
        _ = shutdown => {}
    }

    queues.close();
    registry.shutdown_all();

    // Give connections a moment to notice.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !registry.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let stats = queues.stats();
    info!(
        queues = stats.queues,
        items = stats.items,
        open_transactions = stats.open_transactions,
        "Server shutdown complete"
    );
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    queues: Arc<QueueCollection>,
    registry: Arc<ConnectionRegistry>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    Arc::clone(&queues),
                    Arc::clone(&registry),
                ));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
