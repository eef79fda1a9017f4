use std::sync::Arc;

use tokio::sync::RwLock;

use crate::backend::CatalogRepository;
use crate::models::{Event, EventDraft, Identity};
use crate::services::session::require_admin;
use crate::utils::error::AppError;

/// Event catalog plus the session's cached copy of it.
///
/// The cache is replaced on every listing and only patched locally when this
/// session creates an event.
pub struct Catalog {
    repo: Arc<dyn CatalogRepository>,
    cache: RwLock<Vec<Event>>,
}

impl Catalog {
    pub fn new(repo: Arc<dyn CatalogRepository>) -> Self {
        Self {
            repo,
            cache: RwLock::new(Vec::new()),
        }
    }

    pub async fn list_events(&self) -> Result<Vec<Event>, AppError> {
        let events = self.repo.list_events().await?;
        *self.cache.write().await = events.clone();
        Ok(events)
    }

    /// The last listing, patched with events created since.
    pub async fn cached_events(&self) -> Vec<Event> {
        self.cache.read().await.clone()
    }

    /// Admin-only. Input is validated in full before the repository is touched.
    pub async fn create_event(
        &self,
        identity: Option<&Identity>,
        draft: &EventDraft,
    ) -> Result<Event, AppError> {
        let admin = require_admin(identity)?;
        let new_event = draft.validate()?;

        let event = self.repo.insert_event(&new_event).await?;
        tracing::info!(event_id = %event.id, admin_id = %admin.id, title = %event.title, "Event created");
        self.cache.write().await.push(event.clone());
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::backend::memory::fixtures::new_event;
    use crate::backend::memory::MemoryBackend;
    use crate::models::Role;

    fn admin() -> Identity {
        Identity {
            role: Role::Admin,
            ..Identity::new_user(Uuid::new_v4(), "admin@example.com", "Admin")
        }
    }

    fn draft(price: serde_json::Value) -> EventDraft {
        EventDraft {
            title: Some("Open air".to_string()),
            description: Some("Summer stage".to_string()),
            date: Some("2030-07-14T21:00".to_string()),
            price: Some(price),
            available_tickets: Some(json!(300)),
            image_url: Some("https://images.example.com/open-air.jpg".to_string()),
        }
    }

    #[tokio::test]
    async fn test_negative_price_never_reaches_repository() {
        let backend = MemoryBackend::shared();
        let catalog = Catalog::new(backend.clone());

        let err = catalog
            .create_event(Some(&admin()), &draft(json!(-5)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert_eq!(backend.event_writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_only_admins_create_events() {
        let backend = MemoryBackend::shared();
        let catalog = Catalog::new(backend.clone());
        let user = Identity::new_user(Uuid::new_v4(), "u@example.com", "U");

        let err = catalog.create_event(Some(&user), &draft(json!(10))).await.unwrap_err();
        assert!(matches!(err, AppError::AuthorizationError(_)));
        let err = catalog.create_event(None, &draft(json!(10))).await.unwrap_err();
        assert!(matches!(err, AppError::AuthorizationError(_)));
        assert_eq!(backend.event_writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_created_event_is_appended_to_cache() {
        let backend = MemoryBackend::shared();
        backend.seed_event(new_event("existing", 1, 1500, 10)).await;
        let catalog = Catalog::new(backend.clone());
        catalog.list_events().await.unwrap();

        let created = catalog
            .create_event(Some(&admin()), &draft(json!("25.50")))
            .await
            .unwrap();
        let cached = catalog.cached_events().await;
        assert_eq!(cached.len(), 2);
        assert_eq!(cached.last(), Some(&created));
    }

    #[tokio::test]
    async fn test_listing_refreshes_cache() {
        let backend = MemoryBackend::shared();
        let catalog = Catalog::new(backend.clone());
        assert!(catalog.list_events().await.unwrap().is_empty());

        backend.seed_event(new_event("later", 9, 1000, 1)).await;
        backend.seed_event(new_event("sooner", 3, 1000, 1)).await;
        let titles: Vec<String> = catalog
            .list_events()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["sooner", "later"]);
        assert_eq!(catalog.cached_events().await.len(), 2);
    }
}
