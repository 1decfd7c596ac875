//! Annotation Server
//!
//! Run with: cargo run --bin annotation-server -- --storage local:/tmp/annotations.db
//!
//! # Configuration
//!
//! Command-line flags override `ANNOTATIONS_*` environment variables, which
//! override the config file. `RUST_LOG` overrides the configured log level.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use annotations::api::{serve, AppState};
use annotations::config::{generate_default_config, Config, LoggingConfig};

#[derive(Parser)]
#[command(name = "annotation-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Stores tagged, timestamped annotations and serves them over HTTP")]
struct Cli {
    /// Storage backend, e.g. local:/tmp/annotations.db or rethinkdb:localhost:28015/annotations
    #[arg(long)]
    storage: Option<String>,

    /// Address to listen on
    #[arg(long)]
    listen_addr: Option<String>,

    /// Path for annotation GET/PUT requests
    #[arg(long)]
    endpoint: Option<String>,

    /// Path for Prometheus scrapes
    #[arg(long)]
    metrics_endpoint: Option<String>,

    /// Config file (default: search the standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a default config file and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(storage) = self.storage {
            config.storage.url = storage;
        }
        if let Some(addr) = self.listen_addr {
            config.server.listen_addr = addr;
        }
        if let Some(endpoint) = self.endpoint {
            config.server.endpoint = endpoint;
        }
        if let Some(endpoint) = self.metrics_endpoint {
            config.server.metrics_endpoint = endpoint;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let resolved = Config::resolve(cli.config.as_deref())?;
    let mut config = resolved.config;
    cli.apply(&mut config);
    config.validate()?;

    init_logging(&config.logging);

    for skipped in &resolved.skipped {
        tracing::warn!(error = %skipped, "Skipped config file");
    }
    match &resolved.source {
        Some(path) => tracing::info!(path = %path.display(), "Loaded config"),
        None => tracing::info!("Using default config with environment overrides"),
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        storage = %config.storage.url,
        "Starting annotation server"
    );

    let store = annotations::storage::open(&config.storage.url)
        .await
        .with_context(|| format!("failed to open storage \"{}\"", config.storage.url))?;

    tracing::info!(backend = store.backend(), "Storage opened");

    let api_config = config.api_config();
    let state = AppState::new(Arc::clone(&store), api_config.clone());

    let result = serve(state, &api_config).await;

    tracing::info!("Closing storage");
    store.close().await;

    result.context("server failed")?;
    tracing::info!("Annotation server stopped");

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "annotations={0},annotation_server={0},tower_http=info",
            logging.level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
