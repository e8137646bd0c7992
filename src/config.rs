use std::path::PathBuf;

use anyhow::{bail, Context, Result};

pub const DEFAULT_AUTH_URL: &str = "https://www.dropbox.com";
pub const DEFAULT_API_URL: &str = "https://api.dropboxapi.com";
pub const DEFAULT_CONTENT_URL: &str = "https://content.dropboxapi.com";
pub const BACKUP_EXTENSION: &str = ".json";
/// Upper bound for `REMINDER_INTERVAL_DAYS` (ten years).
pub const MAX_REMINDER_INTERVAL_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct Config {
    /// Dropbox app key, used as the OAuth `client_id`. Only the sync
    /// commands need it.
    pub dropbox_app_key: Option<String>,
    pub dropbox_auth_url: String,
    pub dropbox_api_url: String,
    pub dropbox_content_url: String,
    /// Local port of the OAuth redirect listener.
    pub redirect_port: u16,
    /// Absolute Dropbox folder holding backups, e.g. `/backups`.
    pub backup_folder: String,
    pub backup_filename: String,
    /// Directory of the local JSON store.
    pub data_dir: PathBuf,
    /// Upper bound on the interactive authorization wait.
    pub auth_timeout_secs: u64,
    pub reminder_interval_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            dropbox_app_key: std::env::var("DROPBOX_APP_KEY").ok().filter(|k| !k.is_empty()),
            dropbox_auth_url: optional("DROPBOX_AUTH_URL", DEFAULT_AUTH_URL),
            dropbox_api_url: optional("DROPBOX_API_URL", DEFAULT_API_URL),
            dropbox_content_url: optional("DROPBOX_CONTENT_URL", DEFAULT_CONTENT_URL),
            redirect_port: optional("DROPBOX_REDIRECT_PORT", "53682")
                .parse()
                .context("DROPBOX_REDIRECT_PORT must be a valid port number")?,
            backup_folder: parse_backup_folder(&optional("DROPBOX_BACKUP_FOLDER", "/backups"))?,
            backup_filename: parse_backup_filename(&optional("BACKUP_FILENAME", "energy-backup.json"))?,
            data_dir: PathBuf::from(optional("DATA_DIR", "./data")),
            auth_timeout_secs: parse_auth_timeout(&optional("AUTH_TIMEOUT_SECS", "300"))?,
            reminder_interval_days: parse_positive_days(&optional("REMINDER_INTERVAL_DAYS", "30"))?,
        })
    }
}

/// Normalise to `/folder/sub` form: leading slash, no trailing slash.
///
/// The Dropbox root is refused so backups never land next to unrelated files.
fn parse_backup_folder(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        bail!("DROPBOX_BACKUP_FOLDER must name a folder, got: {raw:?}");
    }
    Ok(format!("/{trimmed}"))
}

fn parse_backup_filename(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.contains('/') {
        bail!("BACKUP_FILENAME must be a plain file name, got: {raw:?}");
    }
    if !name.ends_with(BACKUP_EXTENSION) || name.len() == BACKUP_EXTENSION.len() {
        bail!("BACKUP_FILENAME must end with {BACKUP_EXTENSION}, got: {raw:?}");
    }
    Ok(name.to_owned())
}

fn parse_positive_days(raw: &str) -> Result<i64> {
    let days: i64 = raw
        .trim()
        .parse()
        .context("REMINDER_INTERVAL_DAYS must be a positive integer")?;
    if !(1..=MAX_REMINDER_INTERVAL_DAYS).contains(&days) {
        bail!("REMINDER_INTERVAL_DAYS must be between 1 and {MAX_REMINDER_INTERVAL_DAYS}, got: {days}");
    }
    Ok(days)
}

fn parse_auth_timeout(raw: &str) -> Result<u64> {
    let secs: u64 = raw
        .trim()
        .parse()
        .context("AUTH_TIMEOUT_SECS must be a positive integer")?;
    if secs == 0 {
        bail!("AUTH_TIMEOUT_SECS must be a positive integer, got: 0");
    }
    Ok(secs)
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
