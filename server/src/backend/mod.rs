//! Seams to the managed backend.
//!
//! Every storefront component talks to storage and authentication through
//! these traits so the purchase flow can run against Postgres plus the hosted
//! auth service in production, or against [`memory::MemoryBackend`] in tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{BackendKind, Config};
use crate::models::{
    AuthSession, AuthStateChange, AuthUser, Event, Identity, NewEvent, NewTicket, Role,
    TicketWithEvent,
};
use crate::utils::error::AppError;

pub mod auth_client;
pub mod memory;
pub mod postgres;

/// Credential-based authentication service.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Creates a credential. Providers that auto-confirm also open a session
    /// and broadcast `SignedIn`.
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AppError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AppError>;

    async fn sign_out(&self) -> Result<(), AppError>;

    async fn current_session(&self) -> Option<AuthSession>;

    /// Session changes pushed by the provider, including ones this process did
    /// not initiate (token refresh, remote sign-out).
    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange>;
}

/// The `users` profile collection, keyed by the auth identity id.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn find_profile(&self, id: Uuid) -> Result<Option<Identity>, AppError>;

    async fn insert_profile(&self, identity: &Identity) -> Result<Identity, AppError>;
}

/// The `events` collection.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// All events, ascending by start date; ties keep creation order.
    async fn list_events(&self) -> Result<Vec<Event>, AppError>;

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, AppError>;

    async fn insert_event(&self, event: &NewEvent) -> Result<Event, AppError>;

    /// Atomic decrement-if-positive. `Ok(false)` means nothing was left to
    /// take (or the event does not exist); the count never goes below zero.
    async fn decrement_available(&self, event_id: Uuid) -> Result<bool, AppError>;
}

/// The `tickets` collection, always read joined with `events`.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    /// Tickets owned by `user_id`, newest purchase first. The owner filter is
    /// part of the query.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<TicketWithEvent>, AppError>;

    async fn insert_ticket(&self, ticket: &NewTicket) -> Result<TicketWithEvent, AppError>;

    /// Only used to undo a ticket whose inventory unit was taken by someone else.
    async fn delete_ticket(&self, ticket_id: Uuid) -> Result<(), AppError>;
}

/// The full set of backend handles a storefront session needs.
#[derive(Clone)]
pub struct Backend {
    pub auth: Arc<dyn AuthProvider>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub tickets: Arc<dyn TicketRepository>,
}

impl Backend {
    pub fn in_memory(backend: Arc<memory::MemoryBackend>) -> Self {
        Self {
            auth: backend.clone(),
            profiles: backend.clone(),
            catalog: backend.clone(),
            tickets: backend,
        }
    }
}

/// A connected backend plus the background tasks it needs kept alive.
pub struct Connected {
    pub backend: Backend,
    pub tasks: Vec<JoinHandle<()>>,
}

/// Builds the backend selected by `config.backend`.
///
/// Postgres runs pending migrations and pairs with the hosted auth service;
/// memory seeds the demo catalog and, when configured, a demo admin.
pub async fn connect(config: &Config) -> Result<Connected, AppError> {
    match config.backend {
        BackendKind::Postgres => {
            let store = Arc::new(
                postgres::PgStore::connect(&config.database_url, config.database_max_connections)
                    .await?,
            );
            store.migrate().await?;

            let auth = Arc::new(auth_client::HostedAuthClient::new(&config.auth)?);
            let refresh = auth.clone().spawn_refresh_loop();
            Ok(Connected {
                backend: Backend {
                    auth,
                    profiles: store.clone(),
                    catalog: store.clone(),
                    tickets: store,
                },
                tasks: vec![refresh],
            })
        }
        BackendKind::Memory => {
            let memory = memory::MemoryBackend::shared();
            for event in memory::demo_events() {
                memory.seed_event(event).await;
            }
            if let Some(admin) = &config.demo_admin {
                let identity = memory
                    .seed_account(&admin.email, &admin.password, "Demo Admin", Role::Admin)
                    .await;
                tracing::info!(user_id = %identity.id, email = %identity.email, "Seeded demo admin");
            }
            tracing::warn!("Using the in-memory backend; nothing is persisted");
            Ok(Connected {
                backend: Backend::in_memory(memory),
                tasks: Vec::new(),
            })
        }
    }
}
