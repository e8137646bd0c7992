use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    db::{models::EnergyData, Store, ENERGY_DATA_KEY},
    dropbox::DropboxClient,
};

/// Result of one sync round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub success: bool,
    /// `true` when the remote backup was taken over.
    pub merged: bool,
    /// The remote snapshot, present when `merged`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<EnergyData>,
    pub message: String,
}

impl SyncOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            merged: false,
            data: None,
            message: message.into(),
        }
    }
}

pub struct SyncService {
    dropbox: DropboxClient,
    store: Store,
    filename: String,
}

impl SyncService {
    pub fn new(dropbox: DropboxClient, store: Store, filename: impl Into<String>) -> Self {
        Self {
            dropbox,
            store,
            filename: filename.into(),
        }
    }

    /// Remote missing: upload `local`. Remote present: return it (remote
    /// wins). Anything else fails without touching the remote copy.
    pub async fn sync_with_dropbox(&self, local: &EnergyData) -> SyncOutcome {
        info!(filename = %self.filename, readings = local.readings.len(), "Syncing with Dropbox");

        let remote = match self.dropbox.fetch_backup(&self.filename).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(filename = %self.filename, error = %e, "Could not read remote backup; sync aborted");
                return SyncOutcome::failed(format!("Could not read remote backup: {e}"));
            }
        };

        match remote {
            None => {
                let snapshot = EnergyData {
                    exported_at: Utc::now(),
                    ..local.clone()
                };
                if self.dropbox.upload_backup(&snapshot, &self.filename).await {
                    info!(filename = %self.filename, "No remote backup; uploaded local data");
                    SyncOutcome {
                        success: true,
                        merged: false,
                        data: None,
                        message: "Local data uploaded to Dropbox".to_owned(),
                    }
                } else {
                    SyncOutcome::failed("Upload of local data failed")
                }
            }
            Some(content) => match serde_json::from_str::<EnergyData>(&content) {
                Ok(remote) => {
                    info!(
                        filename = %self.filename,
                        readings = remote.readings.len(),
                        exported_at = %remote.exported_at,
                        "Remote backup replaces local data"
                    );
                    SyncOutcome {
                        success: true,
                        merged: true,
                        data: Some(remote),
                        message: "Remote backup loaded".to_owned(),
                    }
                }
                Err(e) => {
                    warn!(filename = %self.filename, error = %e, "Remote backup is not valid energy data");
                    SyncOutcome::failed(format!("Remote backup is not valid energy data: {e}"))
                }
            },
        }
    }

    /// Sync the stored snapshot and, if the remote copy won, store it locally.
    pub async fn sync_and_apply(&self) -> Result<SyncOutcome> {
        // A local snapshot that cannot be read must not be replaced by an empty one.
        let local = self
            .store
            .load::<EnergyData>(ENERGY_DATA_KEY)
            .await
            .context("local energy data could not be loaded")?
            .unwrap_or_default();

        let outcome = self.sync_with_dropbox(&local).await;
        if let Some(remote) = outcome.data.as_ref().filter(|_| outcome.merged) {
            self.store
                .save(ENERGY_DATA_KEY, remote)
                .await
                .context("failed to store remote backup locally")?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use mockito::{Matcher, Server, ServerGuard};
    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::Config,
        db::{
            models::{MeterReading, ReadingType},
            DROPBOX_AUTH_KEY,
        },
        dropbox::SyncState,
    };

    const FILE: &str = "energy-backup.json";

    async fn setup(server: &ServerGuard, dir: &TempDir) -> SyncService {
        let config = Config {
            dropbox_app_key: Some("app-key".into()),
            dropbox_auth_url: server.url(),
            dropbox_api_url: server.url(),
            dropbox_content_url: server.url(),
            redirect_port: 0,
            backup_folder: "/backups".into(),
            backup_filename: FILE.into(),
            data_dir: PathBuf::new(),
            auth_timeout_secs: 5,
            reminder_interval_days: 30,
        };
        let store = Store::new(dir.path());
        let tokens = SyncState {
            access_token: "token".into(),
            refresh_token: None,
            expires_at: None,
        };
        store.save(DROPBOX_AUTH_KEY, &tokens).await.unwrap();
        let dropbox = DropboxClient::new(&config, store.clone()).unwrap();
        SyncService::new(dropbox, store, FILE)
    }

    fn data_with(meter_id: &str) -> EnergyData {
        EnergyData {
            readings: vec![MeterReading {
                id: format!("{meter_id}-1"),
                device_id: "d1".into(),
                meter_id: meter_id.into(),
                meter_name: "Main".into(),
                reading: 100.0,
                timestamp: "2024-04-01T00:00:00Z".parse().unwrap(),
                reading_type: ReadingType::Electricity,
                unit: "kWh".into(),
                notes: None,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missing_remote_uploads_local() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/2/files/download")
            .with_status(409)
            .with_body(r#"{"error_summary":"path/not_found/.."}"#)
            .create_async()
            .await;
        let upload = server
            .mock("POST", "/2/files/upload")
            .match_body(Matcher::Regex("local-meter".into()))
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let service = setup(&server, &dir).await;
        let outcome = service.sync_with_dropbox(&data_with("local-meter")).await;

        assert!(outcome.success);
        assert!(!outcome.merged);
        assert!(outcome.data.is_none());
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn present_remote_wins_without_upload() {
        let mut server = Server::new_async().await;
        let remote = data_with("remote-meter");
        server
            .mock("POST", "/2/files/download")
            .with_status(200)
            .with_body(serde_json::to_string(&remote).unwrap())
            .create_async()
            .await;
        let upload = server.mock("POST", "/2/files/upload").expect(0).create_async().await;

        let dir = TempDir::new().unwrap();
        let service = setup(&server, &dir).await;
        let outcome = service.sync_with_dropbox(&data_with("local-meter")).await;

        assert!(outcome.success);
        assert!(outcome.merged);
        assert_eq!(outcome.data, Some(remote));
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn failed_probe_never_overwrites_remote() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/2/files/download")
            .with_status(503)
            .create_async()
            .await;
        let upload = server.mock("POST", "/2/files/upload").expect(0).create_async().await;

        let dir = TempDir::new().unwrap();
        let service = setup(&server, &dir).await;
        let outcome = service.sync_with_dropbox(&data_with("local-meter")).await;

        assert!(!outcome.success);
        assert!(!outcome.merged);
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn unparseable_remote_is_a_failure() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/2/files/download")
            .with_status(200)
            .with_body("[1, 2, 3]")
            .create_async()
            .await;
        let upload = server.mock("POST", "/2/files/upload").expect(0).create_async().await;

        let dir = TempDir::new().unwrap();
        let service = setup(&server, &dir).await;
        let outcome = service.sync_with_dropbox(&EnergyData::default()).await;

        assert!(!outcome.success);
        assert!(outcome.message.contains("not valid"));
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn sync_and_apply_stores_remote_snapshot() {
        let mut server = Server::new_async().await;
        let remote = data_with("remote-meter");
        server
            .mock("POST", "/2/files/download")
            .with_status(200)
            .with_body(serde_json::to_string(&remote).unwrap())
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let service = setup(&server, &dir).await;
        let store = Store::new(dir.path());
        store.save(ENERGY_DATA_KEY, &data_with("local-meter")).await.unwrap();

        let outcome = service.sync_and_apply().await.unwrap();
        assert!(outcome.merged);
        let stored: EnergyData = store.load(ENERGY_DATA_KEY).await.unwrap().unwrap();
        assert_eq!(stored, remote);
    }

    #[tokio::test]
    async fn unreadable_local_data_aborts_before_contacting_dropbox() {
        let mut server = Server::new_async().await;
        let download = server.mock("POST", "/2/files/download").expect(0).create_async().await;
        let upload = server.mock("POST", "/2/files/upload").expect(0).create_async().await;

        let dir = TempDir::new().unwrap();
        let service = setup(&server, &dir).await;
        let path = dir.path().join(format!("{ENERGY_DATA_KEY}.json"));
        std::fs::write(&path, br#"{"readings":[{"type":"oil"}]}"#).unwrap();

        assert!(service.sync_and_apply().await.is_err());
        assert!(path.exists());
        download.assert_async().await;
        upload.assert_async().await;
    }
}
