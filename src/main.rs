//! app-worker
//!
//! Hosts the built-in application as one worker of a multi-process server.
//!
//! ```text
//!     supervisor ──spawn(options JSON)──▶ app-worker
//!                                          │
//!                                          ├─ listener (plain / TLS)
//!                                          │     └─ bound once the application is ready
//!                                          │
//!                                          └─ IPC channel (ipc_path)
//!                                                ├─▶ "egg-ready" + options
//!                                                └─◀ "sticky-session:connection" + socket
//! ```
//!
//! Exit status: 0 on SIGINT / SIGQUIT / SIGTERM, 1 on any startup failure.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;

use app_worker::config::{loader, Environment, ProcessEnv, WorkerOptions};
use app_worker::ipc::IpcChannel;
use app_worker::lifecycle::{ProcessExit, Shutdown};
use app_worker::observability::{init_logging, metrics};
use app_worker::{DefaultApplication, Worker};

#[derive(Parser)]
#[command(name = "app-worker")]
#[command(about = "Application worker process", long_about = None)]
struct Cli {
    /// Worker options as a JSON object
    #[arg(conflicts_with = "config")]
    options: Option<String>,

    /// Worker options as a TOML file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug diagnostics
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let started_at = Instant::now();
    let cli = Cli::parse();

    // Signals during option loading or the IPC connect still exit with 0.
    let shutdown = Arc::new(Shutdown::new(Arc::new(ProcessExit)));
    shutdown.clone().listen()?;

    let options = match (&cli.options, &cli.config) {
        (Some(json), _) => loader::parse_options(json)?,
        (None, Some(path)) => loader::load_options(path)?,
        (None, None) => WorkerOptions::default(),
    };

    let environment = Environment::resolve(&ProcessEnv, cli.debug);
    init_logging(&options.observability, &environment);

    if options.observability.metrics_enabled {
        match options.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %options.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let config = match loader::resolve(options) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid worker configuration");
            return Err(e.into());
        }
    };

    let peer = match &config.options().ipc_path {
        Some(path) => Some(IpcChannel::connect(path).await?),
        None => None,
    };

    let app = DefaultApplication::new(&config);
    let mut worker = Worker::new(config, app)
        .environment(environment)
        .shutdown(shutdown)
        .started_at(started_at);
    if let Some(channel) = peer {
        worker = worker.peer(channel);
    }

    let running = worker.run().await?;
    running.wait().await;
    Ok(())
}
