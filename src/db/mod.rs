pub mod models;

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tracing::{debug, warn};

/// Key of the local application snapshot.
pub const ENERGY_DATA_KEY: &str = "energy_data";
/// Key of the persisted Dropbox tokens.
pub const DROPBOX_AUTH_KEY: &str = "dropbox_auth";
/// Key of the scheduled reading reminders.
pub const REMINDERS_KEY: &str = "scheduled_reminders";

/// Keyed JSON document store, one `{key}.json` file per key under a directory.
///
/// [`load`](Store::load) never touches a document it cannot decode; only
/// [`load_or_clear`](Store::load_or_clear) removes it, for disposable state
/// such as cached tokens.
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Read and decode `key`. A missing document is `Ok(None)`; an unreadable
    /// or malformed one is an error and stays on disk.
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(key = %key, "store: no document");
                return Ok(None);
            }
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };

        serde_json::from_slice::<T>(&bytes)
            .map(Some)
            .with_context(|| format!("{} does not match the expected format", path.display()))
    }

    /// Like [`load`](Store::load), but a document that cannot be read or
    /// decoded is removed and reported as absent.
    pub async fn load_or_clear<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.load(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "store: invalid document, clearing");
                if let Err(e) = self.remove(key).await {
                    warn!(key = %key, error = %e, "store: failed to clear invalid document");
                }
                None
            }
        }
    }

    /// Encode and write `value` under `key`, replacing any previous document.
    ///
    /// Writes go to a temp file first and are renamed into place.
    pub async fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create store directory {}", self.dir.display()))?;

        let json = serde_json::to_vec_pretty(value)
            .with_context(|| format!("failed to serialize document {key}"))?;

        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &json)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to move {} into place", path.display()))?;

        debug!(key = %key, bytes = json.len(), "store: saved");
        Ok(())
    }

    /// Delete `key`. Removing a missing key is not an error.
    pub async fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove document {key}")),
        }
    }
}
