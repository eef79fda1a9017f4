//! Session store: the one owner of "who is signed in".
//!
//! The store keeps a [`SessionSnapshot`] in a `watch` channel so views and
//! handlers always read the current identity, and it follows session changes
//! pushed by the auth provider instead of polling for them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::{AuthProvider, ProfileRepository};
use crate::models::{AuthStateChange, Identity};
use crate::utils::error::AppError;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub identity: Option<Identity>,
    pub loading: bool,
}

impl SessionSnapshot {
    fn initial() -> Self {
        Self {
            identity: None,
            loading: true,
        }
    }
}

/// Fails unless someone is signed in.
pub fn require_signed_in(identity: Option<&Identity>) -> Result<&Identity, AppError> {
    identity.ok_or_else(AppError::not_signed_in)
}

/// Fails unless the signed-in identity has the admin role.
pub fn require_admin(identity: Option<&Identity>) -> Result<&Identity, AppError> {
    let identity = require_signed_in(identity)?;
    if identity.is_admin() {
        Ok(identity)
    } else {
        Err(AppError::AuthorizationError(
            "admin role required".to_string(),
        ))
    }
}

pub struct SessionStore {
    auth: Arc<dyn AuthProvider>,
    profiles: Arc<dyn ProfileRepository>,
    snapshot: watch::Sender<SessionSnapshot>,
    /// Bumped on every published change; a profile lookup that started before
    /// a newer change must not overwrite it.
    revision: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionStore {
    pub fn new(auth: Arc<dyn AuthProvider>, profiles: Arc<dyn ProfileRepository>) -> Arc<Self> {
        let (snapshot, _) = watch::channel(SessionSnapshot::initial());
        Arc::new(Self {
            auth,
            profiles,
            snapshot,
            revision: AtomicU64::new(0),
            listener: Mutex::new(None),
        })
    }

    /// Resolves the session the provider already holds, then starts following
    /// pushed changes. Clears `loading` when done, whatever the outcome.
    pub async fn start(self: &Arc<Self>) {
        // Subscribe first so nothing pushed during the initial lookup is lost.
        let changes = self.auth.subscribe();

        match self.auth.current_session().await {
            Some(session) => {
                if let Err(e) = self.resolve_profile(session.user.id).await {
                    tracing::error!(error = %e.detail(), "Could not resolve initial session profile");
                }
            }
            None => tracing::debug!("No existing auth session"),
        }
        self.snapshot.send_modify(|snap| snap.loading = false);

        let handle = tokio::spawn(Self::follow_changes(Arc::downgrade(self), changes));
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(previous) = listener.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Stops following provider changes. The snapshot keeps its last value.
    pub fn shutdown(&self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.snapshot.borrow().identity.clone()
    }

    pub fn loading(&self) -> bool {
        self.snapshot.borrow().loading
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Creates the credential, then its `user` profile.
    ///
    /// The identity is only published when the provider opened a session for
    /// it; an account waiting for e-mail confirmation is returned unpublished.
    ///
    /// A credential without a profile is never published: if the profile
    /// write fails the credential's session is signed out again and the call
    /// fails with `ProfileCreationError`.
    pub async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<Identity, AppError> {
        let (email, name) = validate_sign_up(email, password, name)?;

        let user = self.auth.sign_up(&email, password).await?;
        let profile = Identity::new_user(user.id, user.email.clone(), name);

        match self.profiles.insert_profile(&profile).await {
            Ok(identity) => {
                let has_session = self
                    .auth
                    .current_session()
                    .await
                    .is_some_and(|session| session.user.id == identity.id);
                if has_session {
                    tracing::info!(user_id = %identity.id, "Account created");
                    self.publish(Some(identity.clone()));
                } else {
                    tracing::info!(user_id = %identity.id, "Account created; awaiting e-mail confirmation before sign-in");
                }
                Ok(identity)
            }
            Err(e) => {
                tracing::error!(
                    user_id = %user.id,
                    error = %e.detail(),
                    "Credential created but profile insert failed; signing it out"
                );
                if let Err(sign_out_error) = self.auth.sign_out().await {
                    tracing::error!(
                        user_id = %user.id,
                        error = %sign_out_error.detail(),
                        "Could not sign out profile-less credential"
                    );
                }
                self.publish(None);
                Err(AppError::ProfileCreationError(e.detail()))
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AppError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AppError::ValidationError(
                "email and password are required".to_string(),
            ));
        }

        let session = self.auth.sign_in(email.trim(), password).await?;
        match self.resolve_profile(session.user.id).await? {
            Some(identity) => {
                tracing::info!(user_id = %identity.id, "Signed in");
                Ok(())
            }
            None => {
                tracing::warn!(user_id = %session.user.id, "Signed-in account has no profile");
                self.auth.sign_out().await?;
                self.publish(None);
                Err(AppError::AuthError(
                    "this account has no storefront profile".to_string(),
                ))
            }
        }
    }

    /// Clears the published identity even when the provider reports a
    /// failure, then returns that failure.
    pub async fn sign_out(&self) -> Result<(), AppError> {
        let result = self.auth.sign_out().await;
        self.publish(None);
        tracing::info!("Signed out");
        result
    }

    async fn follow_changes(store: Weak<Self>, mut changes: tokio::sync::broadcast::Receiver<AuthStateChange>) {
        loop {
            let change = match changes.recv().await {
                Ok(change) => change,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Missed auth changes; following the latest");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let Some(store) = store.upgrade() else {
                break;
            };
            store.apply_change(change).await;
        }
    }

    async fn apply_change(&self, change: AuthStateChange) {
        tracing::debug!(change = ?change.change, user_id = ?change.user_id(), "Auth state changed");
        match change.user_id() {
            Some(user_id) => {
                if let Err(e) = self.resolve_profile(user_id).await {
                    tracing::error!(%user_id, error = %e.detail(), "Profile lookup after auth change failed");
                }
            }
            None => self.publish(None),
        }
    }

    /// Loads the profile for `user_id` and publishes it, unless the provider
    /// moved on to another session while the lookup was in flight.
    async fn resolve_profile(&self, user_id: Uuid) -> Result<Option<Identity>, AppError> {
        let revision = self.revision.load(Ordering::SeqCst);
        let profile = self.profiles.find_profile(user_id).await?;

        let still_current = self
            .auth
            .current_session()
            .await
            .is_some_and(|session| session.user.id == user_id);
        if !still_current {
            tracing::debug!(%user_id, "Session changed during profile lookup; not publishing");
            return Ok(profile);
        }

        self.snapshot.send_if_modified(|snap| {
            if self.revision.load(Ordering::SeqCst) != revision {
                return false;
            }
            let next = match &profile {
                Some(identity) => Some(identity.clone()),
                // A sign-up may still be writing this user's profile; keep
                // what is published for the same user.
                None if snap.identity.as_ref().is_some_and(|i| i.id == user_id) => {
                    return false;
                }
                None => {
                    tracing::warn!(%user_id, "Authenticated user has no profile");
                    None
                }
            };
            if snap.identity == next && !snap.loading {
                return false;
            }
            snap.identity = next;
            snap.loading = false;
            self.revision.fetch_add(1, Ordering::SeqCst);
            true
        });

        Ok(profile)
    }

    fn publish(&self, identity: Option<Identity>) {
        self.snapshot.send_if_modified(|snap| {
            if snap.identity == identity && !snap.loading {
                return false;
            }
            snap.identity = identity;
            snap.loading = false;
            self.revision.fetch_add(1, Ordering::SeqCst);
            true
        });
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn validate_sign_up(email: &str, password: &str, name: &str) -> Result<(String, String), AppError> {
    let email = email.trim();
    let name = name.trim();
    let mut problems = Vec::new();
    if !email.contains('@') {
        problems.push("a valid email is required".to_string());
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        problems.push(format!("password must be at least {MIN_PASSWORD_LEN} characters"));
    }
    if name.is_empty() {
        problems.push("name is required".to_string());
    }
    if problems.is_empty() {
        Ok((email.to_string(), name.to_string()))
    } else {
        Err(AppError::ValidationError(problems.join("; ")))
    }
}
