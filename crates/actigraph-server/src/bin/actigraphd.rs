//! Actigraph collection daemon.
//!
//! # Quick Start
//!
//! ```bash
//! # Start the collector with defaults (127.0.0.1:3000, ./.actigraph/data)
//! actigraphd serve
//!
//! # Issue an agent token for a user
//! actigraphd issue-token user-42
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use actigraph_auth::TokenCodec;
use actigraph_config::{ActigraphConfig, ConfigLoader};
use actigraph_server::{Server, ShutdownHandle};
use actigraph_store::{ActivityStore, EventLog, MemoryStore};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Actigraph - activity event collection daemon.
#[derive(Parser)]
#[command(name = "actigraphd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory to load configuration from.
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the collection server.
    Serve {
        /// Address to bind to (overrides configuration).
        #[arg(short, long)]
        address: Option<String>,

        /// Keep events in memory instead of the on-disk log.
        #[arg(long)]
        in_memory: bool,
    },

    /// Issue a signed agent token for a user.
    IssueToken {
        /// User identity to embed in the token.
        user: String,
    },
}

fn load_config(project_dir: Option<&PathBuf>) -> Result<ActigraphConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(dir) = project_dir {
        loader = loader.with_project_dir(dir);
    }
    loader.load()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.project_dir.as_ref())?;

    match cli.command {
        Commands::Serve { address, in_memory } => {
            serve(config, address, in_memory).await
        }
        Commands::IssueToken { user } => {
            let codec =
                TokenCodec::new(&config.auth.secret).with_ttl(config.auth.token_ttl());
            let token = codec.issue(&actigraph_types::UserId::new(user))?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve(config: ActigraphConfig, address: Option<String>, in_memory: bool) -> Result<()> {
    let address = address.unwrap_or_else(|| config.server.bind_address.clone());

    let store: Arc<dyn ActivityStore> = if in_memory {
        info!("using in-memory event store");
        Arc::new(MemoryStore::new())
    } else {
        std::fs::create_dir_all(&config.storage.data_dir).with_context(|| {
            format!(
                "failed to create data directory {}",
                config.storage.data_dir.display()
            )
        })?;
        let log_path = config.storage.data_dir.join("events.log");
        info!(path = %log_path.display(), "opening event log");
        Arc::new(EventLog::open(&log_path)?)
    };

    let tokens = Arc::new(TokenCodec::new(&config.auth.secret).with_ttl(config.auth.token_ttl()));

    let (server, shutdown) = Server::bind(&address, tokens, store).await?;
    info!(addr = %server.local_addr()?, "actigraphd started");

    spawn_signal_handler(shutdown);
    server.run().await?;
    info!("actigraphd stopped");
    Ok(())
}

fn spawn_signal_handler(shutdown: ShutdownHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            shutdown.shutdown();
        }
    });
}
