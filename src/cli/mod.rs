//! Command-line interface for mediadrop.
//!
//! Provides commands for running the background service, running a single
//! ingestion cycle, inspecting configuration and creating users.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{FsMediaStorage, SqliteStore};
use crate::config::{self, ServiceConfig, WatchConfig};
use crate::core::Service;
use crate::ingest::{CycleOutcome, IngestError, IngestSettings, IngestWorker};

/// mediadrop - Drop-folder media ingestion
#[derive(Parser, Debug)]
#[command(name = "mediadrop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Autoprocess configuration file (overrides config discovery)
    #[arg(long, global = true, env = "MEDIADROP_AUTOPROCESS_CONFIG")]
    pub autoprocess_config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the ingestion worker and maintenance jobs until Ctrl+C
    Serve,

    /// Run a single ingestion cycle and exit
    Scan,

    /// Show resolved configuration (debug)
    Config,

    /// Create a user that can own ingested documents
    CreateUser {
        /// Username
        username: String,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let mut cfg = config::load_config()?;
        if let Some(path) = self.autoprocess_config {
            cfg.autoprocess_config = path;
        }

        match self.command {
            Commands::Serve => serve(&cfg).await,
            Commands::Scan => scan(&cfg).await,
            Commands::Config => show_config(&cfg),
            Commands::CreateUser { username } => create_user(&cfg, &username).await,
        }
    }
}

/// Run until interrupted
async fn serve(cfg: &ServiceConfig) -> Result<()> {
    let service = Service::start(cfg).await?;

    println!("👁️  Watching: {}", cfg.income.display());
    println!("    {} periodic job(s) running", service.job_count());
    println!("    Press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!();
    println!("🛑 Stopping...");
    service.shutdown().await
}

/// Run exactly one ingestion cycle
async fn scan(cfg: &ServiceConfig) -> Result<()> {
    let watch = WatchConfig::load_or_empty(&cfg.autoprocess_config);
    let store = Arc::new(SqliteStore::open(&cfg.database_path())?);
    let worker = IngestWorker::new(
        IngestSettings::from(cfg),
        watch,
        store.clone(),
        store,
        Arc::new(FsMediaStorage::new(cfg.media_dir())),
    );

    println!("📂 Scanning once: {}", cfg.income.display());

    match worker.run_locked_cycle().await {
        Ok(CycleOutcome::NoCandidate) => println!("ℹ️  No eligible files"),
        Ok(CycleOutcome::Unstable(path)) => {
            println!("⏳ Still being written: {}", path.display())
        }
        Ok(CycleOutcome::Vanished(path)) => {
            println!("ℹ️  File disappeared: {}", path.display())
        }
        Ok(CycleOutcome::Ingested {
            processed, document, ..
        }) => {
            println!("✅ Created document {} ({})", document.name, document.id);
            println!("   File moved to {}", processed.display());
        }
        Err(IngestError::Registration { processed, source }) => {
            anyhow::bail!(
                "Registration failed: {}. File left in {}",
                source,
                processed.display()
            );
        }
        Err(IngestError::Locked(lock)) => {
            anyhow::bail!(
                "Another worker is running on this drop box (lock held: {})",
                lock.display()
            );
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

fn show_config(cfg: &ServiceConfig) -> Result<()> {
    let watch = WatchConfig::load(&cfg.autoprocess_config);

    println!("mediadrop configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:        {}", cfg.home.display());
    println!("  Database:    {}", cfg.database_path().display());
    println!("  Media:       {}", cfg.media_dir().display());
    println!("  Income:      {}", cfg.income.display());
    println!("  Autoprocess: {}", cfg.autoprocess_config.display());
    println!();
    println!("Ingest:");
    println!("  Poll interval:    {:?}", cfg.poll_interval);
    println!("  Stability window: {:?}", cfg.stability_window);
    println!("  Allowed types:    {}", cfg.allow_list.patterns().join(", "));
    println!("  Worker timeout:   {:?}", cfg.worker_timeout);
    println!();
    println!("Autoprocess:");
    match watch {
        Ok(w) => {
            println!("  User:     {}", w.user);
            println!("  Model:    {}", w.model);
            println!("  Language: {}", w.language);
            match w.number_of_speakers {
                Some(n) => println!("  Speakers: {}", n),
                None => println!("  Speakers: (auto)"),
            }
        }
        Err(e) => println!("  (unavailable: {})", e),
    }

    Ok(())
}

async fn create_user(cfg: &ServiceConfig, username: &str) -> Result<()> {
    let store = SqliteStore::open(&cfg.database_path())?;
    let user = store
        .create_user(username)
        .await
        .with_context(|| format!("Failed to create user '{}'", username))?;

    println!("✅ Created user {} ({})", user.username, user.id);
    Ok(())
}
