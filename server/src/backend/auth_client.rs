//! Client for the hosted credential auth service (`/auth/v1/...` REST API).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::AuthProvider;
use crate::config::AuthConfig;
use crate::models::{AuthChange, AuthSession, AuthStateChange, AuthUser};
use crate::utils::error::AppError;

const CHANGE_CHANNEL_CAPACITY: usize = 32;
/// Refresh this long before the access token expires.
const REFRESH_MARGIN_SECS: i64 = 60;
/// Poll interval while no session (or no expiry) is known.
const IDLE_REFRESH_CHECK: StdDuration = StdDuration::from_secs(60);

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    user: UserPayload,
}

/// Sign-up answers with a session when the project auto-confirms e-mails and
/// with the bare user otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpPayload {
    Session(TokenPayload),
    User(UserPayload),
}

#[derive(Debug, Default, Deserialize)]
struct ErrorPayload {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

impl ErrorPayload {
    fn reason(self, status: StatusCode) -> String {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
            .unwrap_or_else(|| format!("auth service answered {status}"))
    }
}

impl UserPayload {
    fn into_user(self, fallback_email: &str) -> AuthUser {
        AuthUser {
            id: self.id,
            email: self.email.unwrap_or_else(|| fallback_email.to_string()),
        }
    }
}

impl TokenPayload {
    fn into_session(self, fallback_email: &str) -> AuthSession {
        AuthSession {
            user: self.user.into_user(fallback_email),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
        }
    }
}

pub struct HostedAuthClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    session: RwLock<Option<AuthSession>>,
    changes: broadcast::Sender<AuthStateChange>,
}

impl HostedAuthClient {
    pub fn new(config: &AuthConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            http,
            base_url: config.url.clone(),
            api_key: config.api_key.clone(),
            session: RwLock::new(None),
            changes,
        })
    }

    /// Sends the request; only transport failures are errors here.
    async fn send(
        &self,
        path: &str,
        body: serde_json::Value,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, AppError> {
        let mut request = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("apikey", &self.api_key)
            .json(&body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        request
            .send()
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("auth service unreachable: {e}")))
    }

    /// Maps a non-success answer to `AuthError`, or `ExternalServiceError` for 5xx.
    async fn rejection(response: reqwest::Response) -> AppError {
        let status = response.status();
        let payload: ErrorPayload = response.json().await.unwrap_or_default();
        let reason = payload.reason(status);
        if status.is_server_error() {
            AppError::ExternalServiceError(reason)
        } else {
            AppError::AuthError(reason)
        }
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, AppError> {
        let response = self.send(path, body, bearer).await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::rejection(response).await)
        }
    }

    /// Revokes the session server-side. A token the service no longer knows
    /// counts as already revoked.
    async fn revoke(&self, session: &AuthSession) -> Result<(), AppError> {
        let response = self
            .send("/auth/v1/logout", json!({}), Some(&session.access_token))
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
        ) {
            tracing::debug!(user_id = %session.user.id, %status, "Session already revoked remotely");
            return Ok(());
        }
        Err(Self::rejection(response).await)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, AppError> {
        self.post(path, body, None)
            .await?
            .json::<T>()
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("unexpected auth response: {e}")))
    }

    async fn install_session(&self, session: AuthSession, change: AuthChange) {
        *self.session.write().await = Some(session.clone());
        let _ = self.changes.send(AuthStateChange {
            change,
            session: Some(session),
        });
    }

    /// Exchanges the refresh token for a new session and announces it as
    /// `TokenRefreshed`.
    pub async fn refresh_session(&self) -> Result<(), AppError> {
        let Some(current) = self.session.read().await.clone() else {
            return Ok(());
        };

        match self
            .post_json::<TokenPayload>(
                "/auth/v1/token?grant_type=refresh_token",
                json!({ "refresh_token": current.refresh_token }),
            )
            .await
        {
            Ok(payload) => {
                let session = payload.into_session(&current.user.email);
                self.install_session(session, AuthChange::TokenRefreshed).await;
                tracing::debug!(user_id = %current.user.id, "Auth session refreshed");
                Ok(())
            }
            Err(AppError::AuthError(reason)) => {
                // The refresh token is no longer valid; the session is over.
                tracing::warn!(user_id = %current.user.id, %reason, "Session refresh rejected");
                self.session.write().await.take();
                let _ = self.changes.send(AuthStateChange::signed_out());
                Err(AppError::AuthError(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Keeps the session alive in the background until the handle is aborted.
    pub fn spawn_refresh_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let wait = match self.session.read().await.as_ref().and_then(|s| s.expires_at) {
                    Some(expires_at) => (expires_at - Duration::seconds(REFRESH_MARGIN_SECS) - Utc::now())
                        .to_std()
                        .unwrap_or(StdDuration::ZERO),
                    None => IDLE_REFRESH_CHECK,
                };
                tokio::time::sleep(wait).await;

                let due = self
                    .session
                    .read()
                    .await
                    .as_ref()
                    .and_then(|s| s.expires_at)
                    .is_some_and(|expires_at| {
                        expires_at - Duration::seconds(REFRESH_MARGIN_SECS) <= Utc::now()
                    });
                if due {
                    if let Err(e) = self.refresh_session().await {
                        tracing::warn!(error = %e, "Background session refresh failed");
                        tokio::time::sleep(IDLE_REFRESH_CHECK).await;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl AuthProvider for HostedAuthClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AppError> {
        let payload: SignUpPayload = self
            .post_json("/auth/v1/signup", json!({ "email": email, "password": password }))
            .await?;

        match payload {
            SignUpPayload::Session(token) => {
                let session = token.into_session(email);
                let user = session.user.clone();
                self.install_session(session, AuthChange::SignedIn).await;
                Ok(user)
            }
            SignUpPayload::User(user) => {
                tracing::info!(user_id = %user.id, "Sign-up pending e-mail confirmation");
                Ok(user.into_user(email))
            }
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AppError> {
        let payload: TokenPayload = self
            .post_json(
                "/auth/v1/token?grant_type=password",
                json!({ "email": email, "password": password }),
            )
            .await?;
        let session = payload.into_session(email);
        self.install_session(session.clone(), AuthChange::SignedIn).await;
        Ok(session)
    }

    /// Ends the local session first, then revokes it remotely. Local state is
    /// signed out even when the revoke call fails.
    async fn sign_out(&self) -> Result<(), AppError> {
        let current = self.session.write().await.take();
        let revoked = match &current {
            Some(session) => self.revoke(session).await,
            None => Ok(()),
        };
        let _ = self.changes.send(AuthStateChange::signed_out());

        if let (Err(e), Some(session)) = (&revoked, &current) {
            tracing::warn!(user_id = %session.user.id, error = %e.detail(), "Remote sign-out failed");
        }
        revoked
    }

    async fn current_session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Serves one canned HTTP answer on a local port and hands back the
    /// request line it received.
    async fn serve_once(status: &str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let status = status.to_string();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let read = socket.read(&mut chunk).await.unwrap();
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..read]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();

            let text = String::from_utf8_lossy(&request).into_owned();
            text.lines().next().unwrap_or_default().to_string()
        });

        (url, handle)
    }

    fn client_for(url: String) -> HostedAuthClient {
        HostedAuthClient::new(&AuthConfig {
            url,
            api_key: "anon-key".to_string(),
            timeout: StdDuration::from_secs(5),
        })
        .unwrap()
    }

    fn session() -> AuthSession {
        AuthSession {
            user: AuthUser {
                id: Uuid::new_v4(),
                email: "ada@example.com".to_string(),
            },
            access_token: "expired-token".to_string(),
            refresh_token: "rt".to_string(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_sign_out_with_expired_token_still_signs_out() {
        let (url, server) = serve_once("401 Unauthorized", r#"{"msg":"JWT expired"}"#).await;
        let client = client_for(url);
        *client.session.write().await = Some(session());
        let mut changes = client.subscribe();

        client.sign_out().await.unwrap();

        assert!(client.current_session().await.is_none());
        let change = changes.recv().await.unwrap();
        assert_eq!(change.change, AuthChange::SignedOut);
        assert!(change.session.is_none());
        assert_eq!(server.await.unwrap(), "POST /auth/v1/logout HTTP/1.1");
    }

    #[tokio::test]
    async fn test_sign_out_server_error_is_reported_after_local_sign_out() {
        let (url, server) = serve_once("500 Internal Server Error", r#"{"msg":"database down"}"#).await;
        let client = client_for(url);
        *client.session.write().await = Some(session());
        let mut changes = client.subscribe();

        let err = client.sign_out().await.unwrap_err();

        assert!(matches!(err, AppError::ExternalServiceError(ref reason) if reason == "database down"));
        assert!(client.current_session().await.is_none());
        assert_eq!(changes.recv().await.unwrap().change, AuthChange::SignedOut);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_sign_out_without_session_makes_no_call() {
        let client = client_for("http://127.0.0.1:9".to_string());
        let mut changes = client.subscribe();

        client.sign_out().await.unwrap();

        assert_eq!(changes.recv().await.unwrap().change, AuthChange::SignedOut);
    }

    #[tokio::test]
    async fn test_sign_in_installs_session() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"access_token":"at","token_type":"bearer","expires_in":3600,"refresh_token":"rt","user":{"id":"6f1f2c9e-8d56-4a5e-9f27-3f0f4a3c2b10","email":"ada@example.com"}}"#,
        )
        .await;
        let client = client_for(url);
        let mut changes = client.subscribe();

        let session = client.sign_in("ada@example.com", "hunter22").await.unwrap();

        assert_eq!(session.access_token, "at");
        assert_eq!(client.current_session().await.unwrap().user.email, "ada@example.com");
        assert_eq!(changes.recv().await.unwrap().change, AuthChange::SignedIn);
        assert_eq!(
            server.await.unwrap(),
            "POST /auth/v1/token?grant_type=password HTTP/1.1"
        );
    }

    #[test]
    fn test_sign_up_payload_with_session() {
        let body = json!({
            "access_token": "at",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "rt",
            "user": { "id": "6f1f2c9e-8d56-4a5e-9f27-3f0f4a3c2b10", "email": "ada@example.com" }
        });
        let payload: SignUpPayload = serde_json::from_value(body).unwrap();
        let SignUpPayload::Session(token) = payload else {
            panic!("expected a session payload");
        };
        let session = token.into_session("fallback@example.com");
        assert_eq!(session.user.email, "ada@example.com");
        assert!(session.expires_at.is_some());
    }

    #[test]
    fn test_sign_up_payload_awaiting_confirmation() {
        let body = json!({ "id": "6f1f2c9e-8d56-4a5e-9f27-3f0f4a3c2b10", "confirmation_sent_at": "2030-01-01T00:00:00Z" });
        let payload: SignUpPayload = serde_json::from_value(body).unwrap();
        let SignUpPayload::User(user) = payload else {
            panic!("expected a bare user payload");
        };
        assert_eq!(user.into_user("ada@example.com").email, "ada@example.com");
    }

    #[test]
    fn test_error_reason_preference() {
        let payload: ErrorPayload = serde_json::from_value(json!({
            "error": "invalid_grant",
            "error_description": "Invalid login credentials"
        }))
        .unwrap();
        assert_eq!(payload.reason(StatusCode::BAD_REQUEST), "Invalid login credentials");
        assert_eq!(
            ErrorPayload::default().reason(StatusCode::UNPROCESSABLE_ENTITY),
            "auth service answered 422 Unprocessable Entity"
        );
    }
}
