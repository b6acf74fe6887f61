use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use feedpump::cache::{BloomCache, RetrievalCache};
use feedpump::config::Config;
use feedpump::content::{ArticleParser, MercuryParser};
use feedpump::feed::{HttpFaviconFinder, HttpFeedSource};
use feedpump::ingest::{IngestService, Supervisor, SupervisorHandle};
use feedpump::storage::{Database, DatabaseError};

#[derive(Parser, Debug)]
#[command(name = "feedpump", about = "Multi-tenant feed ingestion engine")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database path (overrides `database_path`)
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(database) = args.database {
        config.database_path = database;
    }
    let config = Arc::new(config);

    let db_path = config
        .database_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another instance of feedpump is using {db_path}.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let cache = Arc::new(
        BloomCache::load(&db)
            .await
            .context("Failed to load retrieval cache")?,
    );
    let source = Arc::new(HttpFeedSource::new().context("Failed to build feed client")?);
    let favicons = Arc::new(HttpFaviconFinder::new().context("Failed to build favicon client")?);
    let parser: Option<Arc<dyn ArticleParser>> = if config.parse_articles {
        Some(Arc::new(MercuryParser::new(&config.mercury_cli)))
    } else {
        None
    };

    let supervisor = Supervisor::new(
        db.clone(),
        Arc::clone(&cache) as Arc<dyn RetrievalCache>,
        source,
        favicons,
        parser,
        Arc::clone(&config),
    );
    let handle = supervisor.handle();
    let service = IngestService::spawn(&db, cache, supervisor, &config);

    wait_for_signals(handle).await;
    tracing::info!("Shutting down");
    service.shutdown().await;

    Ok(())
}

/// Serve pause (SIGUSR1) and resume (SIGUSR2) until SIGINT or SIGTERM.
#[cfg(unix)]
async fn wait_for_signals(handle: SupervisorHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigusr1, mut sigusr2) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::user_defined1()),
        signal(SignalKind::user_defined2()),
    ) {
        (Ok(term), Ok(usr1), Ok(usr2)) => (term, usr1, usr2),
        _ => {
            tracing::warn!("Failed to register signal handlers, only Ctrl+C stops feedpump");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    let mut paused = false;
    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => return,
            _ = sigterm.recv() => return,

            _ = sigusr1.recv() => {
                if paused {
                    tracing::debug!("Already paused");
                    continue;
                }
                match handle.pause().await {
                    Ok(()) => paused = true,
                    Err(e) => tracing::error!(error = %e, "Pause failed"),
                }
            }
            _ = sigusr2.recv() => {
                if !paused {
                    tracing::debug!("Not paused");
                    continue;
                }
                match handle.resume().await {
                    Ok(()) => paused = false,
                    Err(e) => tracing::error!(error = %e, "Resume failed"),
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(_handle: SupervisorHandle) {
    let _ = tokio::signal::ctrl_c().await;
}
