use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use energy_tracker::{
    config::Config,
    db::{models::EnergyData, Store, ENERGY_DATA_KEY},
    dropbox::{DropboxClient, LoopbackPrompt},
    reminders::ReminderService,
    stats::{self, Period},
    sync::SyncService,
};

#[derive(Parser, Debug)]
#[command(name = "energy_tracker", version, about = "Energy statistics and Dropbox backups for home meter readings")]
struct Cli {
    /// Read energy data from this JSON file instead of the local store
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consumption, production, autarky and savings for a period
    Stats {
        #[arg(long, default_value = "monthly")]
        period: Period,
    },
    /// Per-utility costs for a period
    Costs {
        #[arg(long, default_value = "monthly")]
        period: Period,
    },
    /// All periods, costs, sustainability metrics and goal progress
    Dashboard,
    /// Latest value per metric
    Current,
    /// Authorize Dropbox access in the browser
    Login,
    /// Forget the stored Dropbox tokens
    Logout,
    /// Upload local data as the Dropbox backup
    Upload,
    /// Replace local data with the Dropbox backup
    Download,
    /// List backups in the Dropbox backup folder
    List,
    /// Upload if no backup exists, otherwise take over the remote backup
    Sync,
    /// Recompute meter reading reminders
    Reminders,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // stdout carries command output, logs go to stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let store = Store::new(&config.data_dir);
    let now = Utc::now();

    match cli.command {
        Command::Stats { period } => {
            let data = load_data(cli.data.as_deref(), &store).await?;
            print_json(&stats::calculate_energy_stats(
                &data.readings,
                period,
                &data.devices,
                &data.providers,
                now,
            ))?;
        }
        Command::Costs { period } => {
            let data = load_data(cli.data.as_deref(), &store).await?;
            print_json(&stats::calculate_detailed_costs(
                &data.readings,
                &data.providers,
                period,
                &data.devices,
                now,
            ))?;
        }
        Command::Dashboard => {
            let data = load_data(cli.data.as_deref(), &store).await?;
            print_json(&stats::build_dashboard(&data, now))?;
        }
        Command::Current => {
            let data = load_data(cli.data.as_deref(), &store).await?;
            print_json(&stats::calculate_current_energy_data(&data.readings, now))?;
        }
        Command::Login => {
            let dropbox = dropbox_client(&config, &store)?;
            login(&dropbox, &config).await?;
            println!("Logged in to Dropbox");
        }
        Command::Logout => {
            let dropbox = dropbox_client(&config, &store)?;
            if !dropbox.logout().await {
                bail!("failed to remove stored Dropbox tokens");
            }
            println!("Logged out of Dropbox");
        }
        Command::Upload => {
            let data = load_data(cli.data.as_deref(), &store).await?;
            let dropbox = dropbox_client(&config, &store)?;
            login(&dropbox, &config).await?;
            let snapshot = EnergyData { exported_at: now, ..data };
            if !dropbox.upload_backup(&snapshot, &config.backup_filename).await {
                bail!("upload of {} failed", config.backup_filename);
            }
            println!("Uploaded {} readings to {}/{}", snapshot.readings.len(), config.backup_folder, config.backup_filename);
        }
        Command::Download => {
            let dropbox = dropbox_client(&config, &store)?;
            login(&dropbox, &config).await?;
            let Some(content) = dropbox.download_backup(&config.backup_filename).await else {
                bail!("no backup could be downloaded from {}", config.backup_folder);
            };
            let data: EnergyData =
                serde_json::from_str(&content).context("remote backup is not valid energy data")?;
            store.save(ENERGY_DATA_KEY, &data).await?;
            info!(readings = data.readings.len(), "Local data replaced with Dropbox backup");
            println!("Restored {} readings exported at {}", data.readings.len(), data.exported_at);
        }
        Command::List => {
            let dropbox = dropbox_client(&config, &store)?;
            login(&dropbox, &config).await?;
            let Some(backups) = dropbox.list_backups().await else {
                bail!("listing {} failed", config.backup_folder);
            };
            print_json(&backups)?;
        }
        Command::Sync => {
            let dropbox = dropbox_client(&config, &store)?;
            login(&dropbox, &config).await?;
            let service = SyncService::new(dropbox, store.clone(), config.backup_filename.clone());
            let outcome = service.sync_and_apply().await?;
            print_json(&outcome)?;
            if !outcome.success {
                bail!(outcome.message);
            }
        }
        Command::Reminders => {
            let data = load_data(cli.data.as_deref(), &store).await?;
            let service = ReminderService::new(store.clone(), config.reminder_interval_days);
            print_json(&service.reschedule(&data.readings, now).await?)?;
        }
    }

    Ok(())
}

async fn load_data(path: Option<&Path>, store: &Store) -> Result<EnergyData> {
    match path {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("{} is not valid energy data", path.display()))
        }
        None => Ok(store.load(ENERGY_DATA_KEY).await?.unwrap_or_default()),
    }
}

fn dropbox_client(config: &Config, store: &Store) -> Result<DropboxClient> {
    DropboxClient::new(config, store.clone()).context("Dropbox client could not be created")
}

async fn login(dropbox: &DropboxClient, config: &Config) -> Result<()> {
    if !dropbox.authenticate(&LoopbackPrompt::new(config.redirect_port)).await {
        bail!("Dropbox authentication failed");
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
