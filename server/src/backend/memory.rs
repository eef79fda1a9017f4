//! In-process stand-in for the managed backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use super::{AuthProvider, CatalogRepository, ProfileRepository, TicketRepository};
use crate::models::{
    AuthSession, AuthStateChange, AuthUser, Event, Identity, NewEvent, NewTicket, Role, Ticket,
    TicketWithEvent,
};
use crate::utils::error::AppError;

const CHANGE_CHANNEL_CAPACITY: usize = 32;
const SESSION_TTL_SECS: i64 = 3600;

/// Writes that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    EventList,
    ProfileInsert,
    TicketInsert,
    InventoryUpdate,
}

#[derive(Debug, Default)]
struct Faults {
    event_list: AtomicBool,
    profile_insert: AtomicBool,
    ticket_insert: AtomicBool,
    inventory_update: AtomicBool,
}

impl Faults {
    fn flag(&self, fault: Fault) -> &AtomicBool {
        match fault {
            Fault::EventList => &self.event_list,
            Fault::ProfileInsert => &self.profile_insert,
            Fault::TicketInsert => &self.ticket_insert,
            Fault::InventoryUpdate => &self.inventory_update,
        }
    }

    fn is_set(&self, fault: Fault) -> bool {
        self.flag(fault).load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct Credential {
    user_id: Uuid,
    password: String,
}

pub struct MemoryBackend {
    credentials: Mutex<HashMap<String, Credential>>,
    session: Mutex<Option<AuthSession>>,
    changes: broadcast::Sender<AuthStateChange>,
    profiles: Mutex<HashMap<Uuid, Identity>>,
    events: Mutex<Vec<Event>>,
    tickets: Mutex<Vec<Ticket>>,
    faults: Faults,
    pub event_writes: AtomicU64,
    pub ticket_writes: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            credentials: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            changes,
            profiles: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            tickets: Mutex::new(Vec::new()),
            faults: Faults::default(),
            event_writes: AtomicU64::new(0),
            ticket_writes: AtomicU64::new(0),
        }
    }
}

impl MemoryBackend {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fault(&self, fault: Fault, enabled: bool) {
        self.faults.flag(fault).store(enabled, Ordering::SeqCst);
    }

    /// Registers a credential plus profile directly, bypassing sign-up. This
    /// is the only way to obtain an admin account.
    pub async fn seed_account(&self, email: &str, password: &str, name: &str, role: Role) -> Identity {
        let user_id = Uuid::new_v4();
        self.credentials.lock().await.insert(
            normalize_email(email),
            Credential {
                user_id,
                password: password.to_string(),
            },
        );
        let identity = Identity {
            role,
            ..Identity::new_user(user_id, email, name)
        };
        self.profiles.lock().await.insert(user_id, identity.clone());
        identity
    }

    pub async fn seed_event(&self, event: NewEvent) -> Event {
        let event = materialize_event(event);
        self.events.lock().await.push(event.clone());
        event
    }

    pub async fn event(&self, id: Uuid) -> Option<Event> {
        self.events.lock().await.iter().find(|e| e.id == id).cloned()
    }

    pub async fn ticket_count(&self) -> usize {
        self.tickets.lock().await.len()
    }

    /// Ends the session as if it was revoked elsewhere (another tab, an
    /// expired refresh token) and notifies subscribers.
    pub async fn revoke_session(&self) {
        self.session.lock().await.take();
        let _ = self.changes.send(AuthStateChange::signed_out());
    }

    fn open_session(user: AuthUser) -> AuthSession {
        AuthSession {
            user,
            access_token: format!("mem_access_{}", Uuid::new_v4().simple()),
            refresh_token: format!("mem_refresh_{}", Uuid::new_v4().simple()),
            expires_at: Some(Utc::now() + Duration::seconds(SESSION_TTL_SECS)),
        }
    }

    async fn start_session(&self, user: AuthUser) -> AuthSession {
        let session = Self::open_session(user);
        *self.session.lock().await = Some(session.clone());
        // No subscribers is fine; the change is simply not observed.
        let _ = self.changes.send(AuthStateChange::signed_in(session.clone()));
        session
    }
}

/// A small catalog for running the server without a database.
pub fn demo_events() -> Vec<NewEvent> {
    let at = |days: i64, hour: u32| {
        let day = (Utc::now() + Duration::days(days)).date_naive();
        day.and_hms_opt(hour, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or_else(Utc::now)
    };
    vec![
        NewEvent {
            title: "Harbour Lights Jazz Night".to_string(),
            description: "Quartet sets on the waterfront terrace.".to_string(),
            date: at(14, 20),
            price: Decimal::new(3500, 2),
            available_tickets: 120,
            image_url: "https://images.unsplash.com/photo-1511192336575-5a79af67a629".to_string(),
        },
        NewEvent {
            title: "Open Source Systems Meetup".to_string(),
            description: "Talks on storage engines and async runtimes.".to_string(),
            date: at(21, 18),
            price: Decimal::new(1000, 2),
            available_tickets: 40,
            image_url: "https://images.unsplash.com/photo-1540575467063-178a50c2df87".to_string(),
        },
        NewEvent {
            title: "Rooftop Cinema: Metropolis".to_string(),
            description: "Silent classic with a live score.".to_string(),
            date: at(30, 21),
            price: Decimal::new(2000, 2),
            available_tickets: 1,
            image_url: "https://images.unsplash.com/photo-1489599849927-2ee91cede3ba".to_string(),
        },
    ]
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn materialize_event(event: NewEvent) -> Event {
    Event {
        id: Uuid::new_v4(),
        title: event.title,
        description: event.description,
        date: event.date,
        price: event.price,
        available_tickets: event.available_tickets,
        image_url: event.image_url,
        created_at: Utc::now(),
    }
}

#[async_trait]
impl AuthProvider for MemoryBackend {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AppError> {
        let key = normalize_email(email);
        let user = {
            let mut credentials = self.credentials.lock().await;
            if credentials.contains_key(&key) {
                return Err(AppError::AuthError("User already registered".to_string()));
            }
            let user_id = Uuid::new_v4();
            credentials.insert(
                key.clone(),
                Credential {
                    user_id,
                    password: password.to_string(),
                },
            );
            AuthUser { id: user_id, email: key }
        };
        self.start_session(user.clone()).await;
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AppError> {
        let key = normalize_email(email);
        let credential = self.credentials.lock().await.get(&key).cloned();
        match credential {
            Some(credential) if credential.password == password => Ok(self
                .start_session(AuthUser {
                    id: credential.user_id,
                    email: key,
                })
                .await),
            _ => Err(AppError::AuthError("Invalid login credentials".to_string())),
        }
    }

    async fn sign_out(&self) -> Result<(), AppError> {
        self.revoke_session().await;
        Ok(())
    }

    async fn current_session(&self) -> Option<AuthSession> {
        self.session.lock().await.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.changes.subscribe()
    }
}

#[async_trait]
impl ProfileRepository for MemoryBackend {
    async fn find_profile(&self, id: Uuid) -> Result<Option<Identity>, AppError> {
        Ok(self.profiles.lock().await.get(&id).cloned())
    }

    async fn insert_profile(&self, identity: &Identity) -> Result<Identity, AppError> {
        if self.faults.is_set(Fault::ProfileInsert) {
            return Err(AppError::ExternalServiceError(
                "profile insert rejected".to_string(),
            ));
        }
        let mut profiles = self.profiles.lock().await;
        if profiles.contains_key(&identity.id) {
            return Err(AppError::ExternalServiceError(format!(
                "duplicate key: profile {} already exists",
                identity.id
            )));
        }
        profiles.insert(identity.id, identity.clone());
        Ok(identity.clone())
    }
}

#[async_trait]
impl CatalogRepository for MemoryBackend {
    async fn list_events(&self) -> Result<Vec<Event>, AppError> {
        if self.faults.is_set(Fault::EventList) {
            return Err(AppError::ExternalServiceError(
                "events listing timed out".to_string(),
            ));
        }
        let mut events = self.events.lock().await.clone();
        // Stable sort: equal dates stay in insertion (creation) order.
        events.sort_by_key(|event| event.date);
        Ok(events)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, AppError> {
        Ok(self.event(id).await)
    }

    async fn insert_event(&self, event: &NewEvent) -> Result<Event, AppError> {
        self.event_writes.fetch_add(1, Ordering::SeqCst);
        Ok(self.seed_event(event.clone()).await)
    }

    async fn decrement_available(&self, event_id: Uuid) -> Result<bool, AppError> {
        if self.faults.is_set(Fault::InventoryUpdate) {
            return Err(AppError::ExternalServiceError(
                "decrement_available_tickets timed out".to_string(),
            ));
        }
        let mut events = self.events.lock().await;
        match events.iter_mut().find(|event| event.id == event_id) {
            Some(event) if event.available_tickets > 0 => {
                event.available_tickets -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl TicketRepository for MemoryBackend {
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<TicketWithEvent>, AppError> {
        let events = self.events.lock().await;
        let tickets = self.tickets.lock().await;
        // Newest first; reversing before the stable sort keeps same-instant
        // purchases newest first as well.
        let mut owned: Vec<TicketWithEvent> = tickets
            .iter()
            .rev()
            .filter(|ticket| ticket.user_id == user_id)
            .filter_map(|ticket| {
                events
                    .iter()
                    .find(|event| event.id == ticket.event_id)
                    .map(|event| TicketWithEvent {
                        ticket: ticket.clone(),
                        event: event.clone(),
                    })
            })
            .collect();
        owned.sort_by(|a, b| b.ticket.purchase_date.cmp(&a.ticket.purchase_date));
        Ok(owned)
    }

    async fn insert_ticket(&self, ticket: &NewTicket) -> Result<TicketWithEvent, AppError> {
        self.ticket_writes.fetch_add(1, Ordering::SeqCst);
        if self.faults.is_set(Fault::TicketInsert) {
            return Err(AppError::ExternalServiceError(
                "ticket insert rejected".to_string(),
            ));
        }
        let event = self.event(ticket.event_id).await.ok_or_else(|| {
            AppError::ExternalServiceError(format!(
                "foreign key violation: event {} does not exist",
                ticket.event_id
            ))
        })?;
        let stored = Ticket {
            id: Uuid::new_v4(),
            user_id: ticket.user_id,
            event_id: ticket.event_id,
            purchase_date: Utc::now(),
            payment_status: ticket.payment_status,
            payment_id: ticket.payment_id.clone(),
        };
        self.tickets.lock().await.push(stored.clone());
        Ok(TicketWithEvent {
            ticket: stored,
            event,
        })
    }

    async fn delete_ticket(&self, ticket_id: Uuid) -> Result<(), AppError> {
        self.tickets.lock().await.retain(|ticket| ticket.id != ticket_id);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use crate::models::NewEvent;

    pub fn new_event(title: &str, day: u32, price_cents: i64, available: i32) -> NewEvent {
        NewEvent {
            title: title.to_string(),
            description: format!("{title} description"),
            date: Utc.with_ymd_and_hms(2030, 6, day, 20, 0, 0).unwrap(),
            price: Decimal::new(price_cents, 2),
            available_tickets: available,
            image_url: "https://images.example.com/event.jpg".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::new_event;
    use super::*;
    use crate::models::PaymentStatus;

    #[test]
    fn test_demo_events_are_upcoming_and_in_stock() {
        let now = Utc::now();
        for event in demo_events() {
            assert!(event.date > now, "{}", event.title);
            assert!(event.available_tickets > 0);
            assert!(event.price > Decimal::ZERO);
        }
    }

    #[tokio::test]
    async fn test_events_listed_by_date() {
        let backend = MemoryBackend::default();
        backend.seed_event(new_event("late", 20, 1000, 5)).await;
        backend.seed_event(new_event("early", 2, 1000, 5)).await;
        backend.seed_event(new_event("early-second", 2, 1000, 5)).await;

        let titles: Vec<String> = backend
            .list_events()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["early", "early-second", "late"]);
    }

    #[tokio::test]
    async fn test_decrement_stops_at_zero() {
        let backend = MemoryBackend::default();
        let event = backend.seed_event(new_event("solo", 1, 2000, 1)).await;

        assert!(backend.decrement_available(event.id).await.unwrap());
        assert!(!backend.decrement_available(event.id).await.unwrap());
        assert_eq!(backend.event(event.id).await.unwrap().available_tickets, 0);
        assert!(!backend.decrement_available(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_tickets_filtered_by_owner() {
        let backend = MemoryBackend::default();
        let event = backend.seed_event(new_event("gig", 1, 2000, 10)).await;
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        for (user_id, payment_id) in [(alice, "pay_a1"), (bob, "pay_b1"), (alice, "pay_a2")] {
            backend
                .insert_ticket(&NewTicket {
                    user_id,
                    event_id: event.id,
                    payment_status: PaymentStatus::Completed,
                    payment_id: payment_id.to_string(),
                })
                .await
                .unwrap();
        }

        let mine = backend.list_for_user(alice).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|t| t.ticket.user_id == alice));
        assert_eq!(mine[0].ticket.payment_id, "pay_a2");
    }

    #[tokio::test]
    async fn test_duplicate_sign_up_rejected() {
        let backend = MemoryBackend::default();
        backend.sign_up("Ada@Example.com", "hunter22").await.unwrap();
        let err = backend.sign_up("ada@example.com", "other-pass").await.unwrap_err();
        assert!(matches!(err, AppError::AuthError(_)));
    }

    #[tokio::test]
    async fn test_sign_in_broadcasts_change() {
        let backend = MemoryBackend::default();
        backend
            .seed_account("ada@example.com", "hunter22", "Ada", Role::User)
            .await;
        let mut changes = backend.subscribe();

        let session = backend.sign_in("ada@example.com", "hunter22").await.unwrap();
        let change = changes.recv().await.unwrap();
        assert_eq!(change.user_id(), Some(session.user.id));

        let err = backend.sign_in("ada@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, AppError::AuthError(_)));
    }
}
