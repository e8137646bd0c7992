//! Dropbox backup client: OAuth2 Authorization Code + PKCE, token
//! persistence and refresh, and upload / download / listing of backups.
//!
//! Public operations never return errors. They log the failure and report
//! `false` / `None`; callers decide whether to retry.

pub mod error;
pub mod models;
pub mod pkce;
pub mod prompt;

use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use reqwest::{header, Client, Response, StatusCode};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::{Config, BACKUP_EXTENSION},
    db::{Store, DROPBOX_AUTH_KEY},
};

pub use self::{
    error::{SyncError, SyncResult},
    models::{BackupEntry, SyncState},
    prompt::{AuthorizationPrompt, AuthorizationResponse, LoopbackPrompt},
};
use self::{
    models::{
        ApiErrorEnvelope, CursorArg, ListFolderResponse, PathArg, TokenResponse, UploadArg,
    },
    pkce::Pkce,
};

const API_ARG_HEADER: &str = "Dropbox-API-Arg";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the client is in the OAuth lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    TokenExpired,
    Refreshing,
}

#[derive(Debug, Clone)]
pub struct DropboxClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    app_key: String,
    auth_url: String,
    api_url: String,
    content_url: String,
    backup_folder: String,
    auth_timeout: Duration,
    store: Store,
    session: Mutex<Session>,
}

#[derive(Debug)]
struct Session {
    state: AuthState,
    tokens: Option<SyncState>,
    /// Whether the persisted copy has been read yet.
    loaded: bool,
}

impl DropboxClient {
    pub fn new(config: &Config, store: Store) -> SyncResult<Self> {
        let app_key = config
            .dropbox_app_key
            .clone()
            .ok_or_else(|| SyncError::Config("DROPBOX_APP_KEY is not set".to_owned()))?;
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                app_key,
                auth_url: config.dropbox_auth_url.trim_end_matches('/').to_owned(),
                api_url: config.dropbox_api_url.trim_end_matches('/').to_owned(),
                content_url: config.dropbox_content_url.trim_end_matches('/').to_owned(),
                backup_folder: config.backup_folder.clone(),
                auth_timeout: Duration::from_secs(config.auth_timeout_secs),
                store,
                session: Mutex::new(Session {
                    state: AuthState::Unauthenticated,
                    tokens: None,
                    loaded: false,
                }),
            }),
        })
    }

    pub async fn state(&self) -> AuthState {
        self.inner.session.lock().await.state
    }

    async fn set_state(&self, state: AuthState) {
        self.inner.session.lock().await.state = state;
    }

    /// Tokens held in memory, reading the persisted copy on first use.
    async fn tokens(&self) -> Option<SyncState> {
        let mut session = self.inner.session.lock().await;
        if !session.loaded {
            session.tokens = self.inner.store.load_or_clear::<SyncState>(DROPBOX_AUTH_KEY).await;
            session.loaded = true;
        }
        session.tokens.clone()
    }

    async fn store_tokens(&self, tokens: SyncState) {
        // A lost write only means the next launch re-authenticates.
        if let Err(e) = self.inner.store.save(DROPBOX_AUTH_KEY, &tokens).await {
            warn!(error = %e, "Failed to persist Dropbox tokens");
        }
        let mut session = self.inner.session.lock().await;
        session.tokens = Some(tokens);
        session.loaded = true;
        session.state = AuthState::Authenticated;
    }

    async fn access_token(&self) -> SyncResult<String> {
        self.tokens()
            .await
            .map(|t| t.access_token)
            .ok_or(SyncError::NotAuthenticated)
    }

    fn backup_path(&self, filename: &str) -> String {
        format!("{}/{}", self.inner.backup_folder, filename)
    }

    // -----------------------------------------------------------------------
    // Authentication
    // -----------------------------------------------------------------------

    /// Make sure the client holds a usable token, running the interactive
    /// PKCE flow through `prompt` when the stored one cannot be used.
    pub async fn authenticate(&self, prompt: &dyn AuthorizationPrompt) -> bool {
        match self.try_authenticate(prompt).await {
            Ok(()) => {
                info!("Dropbox authentication succeeded");
                true
            }
            Err(e) => {
                warn!(error = %e, "Dropbox authentication failed");
                self.set_state(AuthState::Unauthenticated).await;
                false
            }
        }
    }

    async fn try_authenticate(&self, prompt: &dyn AuthorizationPrompt) -> SyncResult<()> {
        if let Some(tokens) = self.tokens().await {
            if tokens.is_valid(Utc::now().timestamp_millis()) {
                debug!("Stored Dropbox token is still valid");
                self.set_state(AuthState::Authenticated).await;
                return Ok(());
            }
            self.set_state(AuthState::TokenExpired).await;
            if tokens.refresh_token.is_some() && self.refresh_access_token().await {
                return Ok(());
            }
        }

        self.set_state(AuthState::Authenticating).await;
        let pkce = Pkce::generate();
        let csrf_state = Uuid::new_v4().to_string();
        let redirect_uri = prompt.redirect_uri();
        let url = self.authorize_url(&pkce.challenge, &csrf_state, &redirect_uri);

        let response = tokio::time::timeout(self.inner.auth_timeout, prompt.authorize(&url))
            .await
            .map_err(|_| SyncError::Timeout)??;
        let code = validate_redirect(response, &csrf_state)?;

        info!("Exchanging Dropbox authorization code");
        let body = form_body(&[
            ("code", code.as_str()),
            ("grant_type", "authorization_code"),
            ("client_id", self.inner.app_key.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
        ]);
        let token = self.request_token(body).await?;
        let tokens = SyncState::from_token_response(token, None, Utc::now().timestamp_millis());
        self.store_tokens(tokens).await;
        Ok(())
    }

    fn authorize_url(&self, challenge: &str, csrf_state: &str, redirect_uri: &str) -> String {
        format!(
            "{}/oauth2/authorize?client_id={}&response_type=code&code_challenge={}\
             &code_challenge_method=S256&token_access_type=offline&redirect_uri={}&state={}",
            self.inner.auth_url,
            urlencoding::encode(&self.inner.app_key),
            challenge,
            urlencoding::encode(redirect_uri),
            urlencoding::encode(csrf_state),
        )
    }

    /// Trade the stored refresh token for a new access token.
    ///
    /// Without a refresh token this returns `false` without touching the
    /// network. On failure the old tokens stay in place.
    pub async fn refresh_access_token(&self) -> bool {
        let refresh_token = match self.tokens().await.and_then(|t| t.refresh_token) {
            Some(token) => token,
            None => {
                warn!("No Dropbox refresh token stored; re-authentication required");
                return false;
            }
        };

        self.set_state(AuthState::Refreshing).await;
        info!("Refreshing Dropbox access token");

        let body = form_body(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.inner.app_key.as_str()),
        ]);
        match self.request_token(body).await {
            Ok(token) => {
                let tokens =
                    SyncState::from_token_response(token, Some(refresh_token), Utc::now().timestamp_millis());
                self.store_tokens(tokens).await;
                true
            }
            Err(e) => {
                warn!(error = %e, "Dropbox token refresh failed");
                self.set_state(AuthState::Unauthenticated).await;
                false
            }
        }
    }

    async fn request_token(&self, body: String) -> SyncResult<TokenResponse> {
        let url = format!("{}/oauth2/token", self.inner.api_url);
        let response = self
            .inner
            .http
            .post(&url)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json::<TokenResponse>().await?)
    }

    /// Forget all tokens, in memory and on disk.
    pub async fn logout(&self) -> bool {
        let removed = self.inner.store.remove(DROPBOX_AUTH_KEY).await;
        let mut session = self.inner.session.lock().await;
        session.tokens = None;
        session.loaded = true;
        session.state = AuthState::Unauthenticated;
        match removed {
            Ok(()) => {
                info!("Logged out of Dropbox");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to remove stored Dropbox tokens");
                false
            }
        }
    }

    /// Run `call` with the current access token. A 401 triggers exactly one
    /// refresh and one retry; a second 401 is final.
    async fn with_refresh<T, F, Fut>(&self, operation: &'static str, call: F) -> SyncResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let token = self.access_token().await?;
        let result = match call(token).await {
            Err(SyncError::Unauthorized) => {
                info!(operation, "Access token rejected; refreshing once");
                self.set_state(AuthState::TokenExpired).await;
                if !self.refresh_access_token().await {
                    return Err(SyncError::Unauthorized);
                }
                let token = self.access_token().await?;
                call(token).await
            }
            other => other,
        };

        match &result {
            Ok(_) => self.set_state(AuthState::Authenticated).await,
            Err(SyncError::Unauthorized) => self.set_state(AuthState::Unauthenticated).await,
            Err(_) => {}
        }
        result
    }

    // -----------------------------------------------------------------------
    // Backups
    // -----------------------------------------------------------------------

    /// Serialise `data` and overwrite `filename` in the backup folder.
    pub async fn upload_backup<T: Serialize + ?Sized>(&self, data: &T, filename: &str) -> bool {
        match self.try_upload(data, filename).await {
            Ok(()) => {
                info!(filename = %filename, "Backup uploaded to Dropbox");
                true
            }
            Err(e) => {
                error!(filename = %filename, error = %e, "Backup upload failed");
                false
            }
        }
    }

    async fn try_upload<T: Serialize + ?Sized>(&self, data: &T, filename: &str) -> SyncResult<()> {
        let body = serde_json::to_vec_pretty(data)?;
        let path = self.backup_path(filename);
        let arg = api_arg(&UploadArg {
            path: &path,
            mode: "overwrite",
            autorename: false,
            mute: true,
        })?;
        debug!(path = %path, bytes = body.len(), "Uploading backup");

        let (arg, body) = (arg.as_str(), body.as_slice());
        self.with_refresh("upload", move |token| self.upload_once(token, arg, body))
            .await
    }

    async fn upload_once(&self, token: String, arg: &str, body: &[u8]) -> SyncResult<()> {
        let url = format!("{}/2/files/upload", self.inner.content_url);
        let response = self
            .inner
            .http
            .post(&url)
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(API_ARG_HEADER, arg)
            .body(body.to_vec())
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    /// Content of `filename`, or `None` when there is no backup yet or the
    /// download failed (the failure is logged).
    pub async fn download_backup(&self, filename: &str) -> Option<String> {
        match self.fetch_backup(filename).await {
            Ok(Some(content)) => Some(content),
            Ok(None) => {
                info!(filename = %filename, "No Dropbox backup found");
                None
            }
            Err(e) => {
                error!(filename = %filename, error = %e, "Backup download failed");
                None
            }
        }
    }

    /// Like [`download_backup`](Self::download_backup) but keeps "no backup
    /// yet" (`Ok(None)`) apart from failures.
    pub async fn fetch_backup(&self, filename: &str) -> SyncResult<Option<String>> {
        let path = self.backup_path(filename);
        let arg = api_arg(&PathArg { path: &path })?;
        debug!(path = %path, "Downloading backup");

        let arg = arg.as_str();
        self.with_refresh("download", move |token| self.download_once(token, arg))
            .await
    }

    async fn download_once(&self, token: String, arg: &str) -> SyncResult<Option<String>> {
        let url = format!("{}/2/files/download", self.inner.content_url);
        let response = self
            .inner
            .http
            .post(&url)
            .bearer_auth(token)
            .header(API_ARG_HEADER, arg)
            .send()
            .await?;
        match check_found(response).await? {
            Some(response) => Ok(Some(response.text().await?)),
            None => Ok(None),
        }
    }

    /// Backup files in the backup folder, newest first. A missing folder
    /// lists as empty.
    pub async fn list_backups(&self) -> Option<Vec<BackupEntry>> {
        match self.try_list_backups().await {
            Ok(backups) => Some(backups),
            Err(e) => {
                error!(error = %e, "Listing Dropbox backups failed");
                None
            }
        }
    }

    async fn try_list_backups(&self) -> SyncResult<Vec<BackupEntry>> {
        let folder = self.inner.backup_folder.as_str();
        let first = self
            .with_refresh("list_folder", move |token| self.list_folder_once(token, folder))
            .await?;
        let Some(mut page) = first else {
            return Ok(Vec::new());
        };

        let mut entries = std::mem::take(&mut page.entries);
        while page.has_more {
            let cursor = page.cursor.clone();
            let cursor = cursor.as_str();
            page = self
                .with_refresh("list_folder_continue", move |token| self.list_continue_once(token, cursor))
                .await?;
            entries.append(&mut page.entries);
        }

        let mut backups: Vec<BackupEntry> = entries
            .into_iter()
            .filter(|e| e.tag == "file" && e.name.ends_with(BACKUP_EXTENSION))
            .map(|e| BackupEntry {
                name: e.name,
                modified: e.server_modified,
                size: e.size.unwrap_or(0),
            })
            .collect();
        backups.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(backups)
    }

    async fn list_folder_once(&self, token: String, folder: &str) -> SyncResult<Option<ListFolderResponse>> {
        let url = format!("{}/2/files/list_folder", self.inner.api_url);
        let response = self
            .inner
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&PathArg { path: folder })
            .send()
            .await?;
        match check_found(response).await? {
            Some(response) => Ok(Some(response.json::<ListFolderResponse>().await?)),
            None => Ok(None),
        }
    }

    async fn list_continue_once(&self, token: String, cursor: &str) -> SyncResult<ListFolderResponse> {
        let url = format!("{}/2/files/list_folder/continue", self.inner.api_url);
        let response = self
            .inner
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&CursorArg { cursor })
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json::<ListFolderResponse>().await?)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Pull the authorization code out of a redirect, rejecting denials and
/// responses whose `state` does not match the one we sent.
fn validate_redirect(response: AuthorizationResponse, expected_state: &str) -> SyncResult<String> {
    if let Some(error) = response.error {
        if error == "access_denied" {
            return Err(SyncError::Cancelled);
        }
        let description = response.error_description.unwrap_or_default();
        return Err(SyncError::AuthenticationFailed(format!("{error}: {description}")));
    }
    let code = response
        .code
        .filter(|c| !c.is_empty())
        .ok_or(SyncError::MissingCode)?;
    if response.state.as_deref() != Some(expected_state) {
        return Err(SyncError::AuthenticationFailed("state mismatch in redirect".to_owned()));
    }
    Ok(code)
}

/// `application/x-www-form-urlencoded` body.
fn form_body(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// JSON for the `Dropbox-API-Arg` header. Header values must be ASCII, so
/// anything else is written as `\uXXXX` escapes.
fn api_arg<T: Serialize>(value: &T) -> SyncResult<String> {
    let json = serde_json::to_string(value)?;
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    Ok(out)
}

async fn check_status(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(SyncError::Unauthorized);
    }
    let message = response.text().await.unwrap_or_default();
    Err(SyncError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Like [`check_status`] but maps Dropbox's `409 path/not_found` to `None`.
async fn check_found(response: Response) -> SyncResult<Option<Response>> {
    if response.status() != StatusCode::CONFLICT {
        return check_status(response).await.map(Some);
    }
    let message = response.text().await?;
    match serde_json::from_str::<ApiErrorEnvelope>(&message) {
        Ok(envelope) if envelope.is_not_found() => Ok(None),
        _ => Err(SyncError::Api {
            status: StatusCode::CONFLICT.as_u16(),
            message,
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
