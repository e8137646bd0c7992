use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Token: POST /oauth2/token
// ---------------------------------------------------------------------------

/// Token endpoint payload for both the code exchange and refresh grants.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,

    /// Only returned by the code exchange when `token_access_type=offline`.
    pub refresh_token: Option<String>,

    /// Validity period in **seconds** (typically 14400).
    pub expires_in: Option<i64>,
}

/// Persisted credentials, stored under `dropbox_auth`.
///
/// Unknown fields are rejected so a store written by something else is
/// treated as absent rather than half-understood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncState {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp (milliseconds) when the access token expires.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// Tokens are refreshed this long before they actually expire.
pub const EXPIRY_MARGIN_MS: i64 = 60_000;

impl SyncState {
    pub fn from_token_response(resp: TokenResponse, previous_refresh: Option<String>, now_ms: i64) -> Self {
        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token.or(previous_refresh),
            expires_at: resp.expires_in.map(|secs| now_ms + secs * 1000),
        }
    }

    /// A token without a known expiry is assumed valid until Dropbox says otherwise.
    pub fn is_valid(&self, now_ms: i64) -> bool {
        self.expires_at.map_or(true, |at| at > now_ms + EXPIRY_MARGIN_MS)
    }
}

// ---------------------------------------------------------------------------
// Files: /2/files/upload, /2/files/download, /2/files/list_folder
// ---------------------------------------------------------------------------

/// `Dropbox-API-Arg` for uploads.
#[derive(Debug, Serialize)]
pub struct UploadArg<'a> {
    pub path: &'a str,
    pub mode: &'static str,
    pub autorename: bool,
    pub mute: bool,
}

/// `Dropbox-API-Arg` for downloads, and the body of `list_folder`.
#[derive(Debug, Serialize)]
pub struct PathArg<'a> {
    pub path: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CursorArg<'a> {
    pub cursor: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ListFolderResponse {
    pub entries: Vec<FolderEntry>,
    pub cursor: String,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct FolderEntry {
    /// `"file"`, `"folder"` or `"deleted"`.
    #[serde(rename = ".tag")]
    pub tag: String,
    pub name: String,
    pub path_display: Option<String>,
    pub server_modified: Option<DateTime<Utc>>,
    pub size: Option<u64>,
}

/// A backup file found in the backup folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    pub name: String,
    pub modified: Option<DateTime<Utc>>,
    pub size: u64,
}

/// Error envelope returned with HTTP 409 by the files endpoints:
///
/// ```json
/// { "error_summary": "path/not_found/..", "error": { ".tag": "path", ... } }
/// ```
#[derive(Debug, Deserialize)]
pub struct ApiErrorEnvelope {
    pub error_summary: String,
}

impl ApiErrorEnvelope {
    pub fn is_not_found(&self) -> bool {
        self.error_summary.starts_with("path/not_found")
    }
}
