use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    response::Html,
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::{
    net::TcpListener,
    signal,
    sync::{oneshot, Mutex},
};
use tracing::{debug, info};

use super::error::{SyncError, SyncResult};

/// Query parameters Dropbox appends to the redirect URI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizationResponse {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Interactive step of the OAuth flow: show the authorise page to the user
/// and hand back whatever the redirect carried.
///
/// Implementations return `SyncError::Cancelled` when the user backs out.
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    fn redirect_uri(&self) -> String;

    async fn authorize(&self, authorize_url: &str) -> SyncResult<AuthorizationResponse>;
}

pub const CALLBACK_PATH: &str = "/callback";

/// Prints the authorise URL and waits for the browser redirect on a
/// short-lived listener bound to `127.0.0.1`. Ctrl-C cancels the wait.
#[derive(Debug, Clone)]
pub struct LoopbackPrompt {
    port: u16,
}

impl LoopbackPrompt {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

type CallbackSender = Arc<Mutex<Option<oneshot::Sender<AuthorizationResponse>>>>;

async fn callback(
    State(sender): State<CallbackSender>,
    Query(params): Query<AuthorizationResponse>,
) -> Html<&'static str> {
    debug!(has_code = params.code.is_some(), error = ?params.error, "Authorization redirect received");
    if let Some(tx) = sender.lock().await.take() {
        let _ = tx.send(params);
    }
    Html("<html><body><p>Dropbox authorization finished. You can close this window.</p></body></html>")
}

/// Forwards the first redirect to `sender`; later hits are answered but dropped.
fn callback_router(sender: CallbackSender) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(callback))
        .with_state(sender)
}

#[async_trait]
impl AuthorizationPrompt for LoopbackPrompt {
    fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.port, CALLBACK_PATH)
    }

    async fn authorize(&self, authorize_url: &str) -> SyncResult<AuthorizationResponse> {
        let listener = TcpListener::bind(("127.0.0.1", self.port)).await?;
        let (tx, rx) = oneshot::channel();
        let sender: CallbackSender = Arc::new(Mutex::new(Some(tx)));

        let app = callback_router(sender);

        // Dropping `stop_tx` (also on cancellation of this future) stops the listener.
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        info!(port = self.port, "Waiting for Dropbox authorization redirect");
        println!("Open this URL in a browser to authorize Dropbox access:\n\n  {authorize_url}\n");

        let result = tokio::select! {
            received = rx => received.map_err(|_| SyncError::Cancelled),
            _ = signal::ctrl_c() => Err(SyncError::Cancelled),
        };

        let _ = stop_tx.send(());
        let _ = server.await;
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum_test::TestServer;

    use super::*;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[test]
    fn redirect_uri_uses_loopback() {
        assert_eq!(LoopbackPrompt::new(53682).redirect_uri(), "http://127.0.0.1:53682/callback");
    }

    #[tokio::test]
    async fn callback_forwards_only_the_first_redirect() {
        let (tx, mut rx) = oneshot::channel();
        let server = TestServer::new(callback_router(Arc::new(Mutex::new(Some(tx))))).unwrap();

        let resp = server
            .get("/callback?error=access_denied&error_description=user%20declined")
            .await;
        resp.assert_status_ok();
        server.get("/callback?code=late&state=s").await.assert_status_ok();

        let received = rx.try_recv().unwrap();
        assert_eq!(received.error.as_deref(), Some("access_denied"));
        assert_eq!(received.error_description.as_deref(), Some("user declined"));
        assert!(received.code.is_none());
    }

    #[tokio::test]
    async fn captures_code_and_state_from_redirect() {
        let port = free_port();
        let prompt = LoopbackPrompt::new(port);
        let waiting = tokio::spawn(async move { prompt.authorize("https://example.invalid/authorize").await });

        let url = format!("http://127.0.0.1:{port}/callback?code=abc123&state=xyz");
        let http = reqwest::Client::new();
        let mut delivered = false;
        for _ in 0..50 {
            if http.get(&url).send().await.is_ok() {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(delivered, "callback listener never came up");

        let response = waiting.await.unwrap().unwrap();
        assert_eq!(response.code.as_deref(), Some("abc123"));
        assert_eq!(response.state.as_deref(), Some("xyz"));
        assert!(response.error.is_none());
    }
}
