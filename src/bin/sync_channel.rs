#![forbid(unsafe_code)]

//! One-shot sync trigger for the channel mirror.
//!
//! Runs a single full or incremental reconciliation against the configured
//! channel and exits. Meant for cron jobs and first-time setup; the backend
//! binary handles the recurring schedule on its own.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use mirrortube_tools::config::{ConfigOverrides, resolve_config};
use mirrortube_tools::download::DownloadManager;
use mirrortube_tools::remote::YouTubeClient;
use mirrortube_tools::security::refuse_root;
use mirrortube_tools::store::Store;
use mirrortube_tools::sync::{SyncEngine, SyncOptions};

#[derive(Debug, Clone, Default)]
struct SyncArgs {
    full: bool,
    download: bool,
    db_path: Option<PathBuf>,
    downloads_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

impl SyncArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    #[cfg(test)]
    fn from_slice(values: &[&str]) -> Result<Self> {
        Self::from_iter(values.iter().map(|value| value.to_string()))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--db=") {
                parsed.db_path = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--downloads=") {
                parsed.downloads_path = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--env-file=") {
                parsed.env_file = Some(PathBuf::from(value));
                continue;
            }

            match arg.as_str() {
                "--full" => parsed.full = true,
                "--incremental" => parsed.full = false,
                "--download" => parsed.download = true,
                "--db" => {
                    let value = args.next().ok_or_else(|| anyhow!("--db requires a value"))?;
                    parsed.db_path = Some(PathBuf::from(value));
                }
                "--downloads" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--downloads requires a value"))?;
                    parsed.downloads_path = Some(PathBuf::from(value));
                }
                "--env-file" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--env-file requires a value"))?;
                    parsed.env_file = Some(PathBuf::from(value));
                }
                _ => {
                    bail!(
                        "unknown argument: {arg}\nUsage: sync_channel [--full | --incremental] [--download] [--db <path>] [--downloads <path>] [--env-file <path>]"
                    );
                }
            }
        }
        Ok(parsed)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    refuse_root("sync_channel")?;

    let args = SyncArgs::parse()?;
    let config = resolve_config(ConfigOverrides {
        database_path: args.db_path.clone(),
        downloads_path: args.downloads_path.clone(),
        download_on_sync: if args.download { Some(true) } else { None },
        env_path: args.env_file.clone(),
        ..ConfigOverrides::default()
    })?;

    println!("===================================");
    println!("Channel Mirror Sync");
    println!("===================================");
    println!("Channel: {}", config.channel_id);
    println!("Database: {}", config.database_path.display());
    println!("Mode: {}", if args.full { "full" } else { "incremental" });
    if config.download_on_sync {
        println!("Media downloads: enabled ({})", config.downloads_path.display());
    }
    println!();

    let store = Store::open(&config.database_path).await?;
    let downloads = DownloadManager::new(config.downloads_path.clone())?;
    let source = Arc::new(YouTubeClient::new(config.api_key.clone()));
    let engine = SyncEngine::new(
        store,
        source,
        downloads,
        SyncOptions {
            channel_id: config.channel_id.clone(),
            download_media: config.download_on_sync,
        },
    );

    let outcome = if args.full {
        engine.full_sync().await?
    } else {
        engine.incremental_sync().await?
    };

    println!();
    println!("===================================");
    println!("Sync run recorded");
    println!("===================================");
    if outcome.videos_downloaded > 0 {
        println!("Media files fetched: {}", outcome.videos_downloaded);
    }

    Ok(())
}
