use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use super::{CatalogRepository, ProfileRepository, TicketRepository};
use crate::models::{Event, Identity, NewEvent, NewTicket, Ticket, TicketWithEvent};
use crate::utils::error::AppError;

const EVENT_COLUMNS: &str =
    "id, title, description, date, price, available_tickets, image_url, created_at";

const TICKET_WITH_EVENT_COLUMNS: &str = "t.id, t.user_id, t.event_id, t.purchase_date, \
     t.payment_status, t.payment_id, e.title, e.description, e.date, e.price, \
     e.available_tickets, e.image_url, e.created_at AS event_created_at";

/// Postgres-backed repositories for profiles, events and tickets.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        tracing::info!("Successfully connected to database");
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|e| AppError::InternalServerError(format!("migrations failed: {e}")))?;
        tracing::info!("Migrations run successfully");
        Ok(())
    }
}

fn decode_error(e: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

fn identity_from_row(row: &PgRow) -> Result<Identity, sqlx::Error> {
    let role: String = row.try_get("role")?;
    Ok(Identity {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        role: role.parse().map_err(decode_error)?,
        created_at: row.try_get("created_at")?,
    })
}

fn ticket_with_event_from_row(row: &PgRow) -> Result<TicketWithEvent, sqlx::Error> {
    let status: String = row.try_get("payment_status")?;
    let event_id: Uuid = row.try_get("event_id")?;
    Ok(TicketWithEvent {
        ticket: Ticket {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            event_id,
            purchase_date: row.try_get("purchase_date")?,
            payment_status: status.parse().map_err(decode_error)?,
            payment_id: row.try_get("payment_id")?,
        },
        event: Event {
            id: event_id,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            date: row.try_get("date")?,
            price: row.try_get("price")?,
            available_tickets: row.try_get("available_tickets")?,
            image_url: row.try_get("image_url")?,
            created_at: row.try_get("event_created_at")?,
        },
    })
}

#[async_trait]
impl ProfileRepository for PgStore {
    async fn find_profile(&self, id: Uuid) -> Result<Option<Identity>, AppError> {
        let row = sqlx::query("SELECT id, email, name, role, created_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(identity_from_row).transpose()?)
    }

    async fn insert_profile(&self, identity: &Identity) -> Result<Identity, AppError> {
        let row = sqlx::query(
            "INSERT INTO users (id, email, name, role, created_at) VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, email, name, role, created_at",
        )
        .bind(identity.id)
        .bind(&identity.email)
        .bind(&identity.name)
        .bind(identity.role.as_str())
        .bind(identity.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(identity_from_row(&row)?)
    }
}

#[async_trait]
impl CatalogRepository for PgStore {
    async fn list_events(&self) -> Result<Vec<Event>, AppError> {
        let events = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events ORDER BY date ASC, created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, AppError> {
        let event = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(event)
    }

    async fn insert_event(&self, event: &NewEvent) -> Result<Event, AppError> {
        let created = sqlx::query_as::<_, Event>(&format!(
            "INSERT INTO events (title, description, date, price, available_tickets, image_url) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {EVENT_COLUMNS}"
        ))
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.date)
        .bind(event.price)
        .bind(event.available_tickets)
        .bind(&event.image_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn decrement_available(&self, event_id: Uuid) -> Result<bool, AppError> {
        let decremented = sqlx::query_scalar::<_, bool>("SELECT decrement_available_tickets($1)")
            .bind(event_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(decremented)
    }
}

#[async_trait]
impl TicketRepository for PgStore {
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<TicketWithEvent>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_WITH_EVENT_COLUMNS} FROM tickets t \
             JOIN events e ON e.id = t.event_id \
             WHERE t.user_id = $1 \
             ORDER BY t.purchase_date DESC, t.id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(ticket_with_event_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn insert_ticket(&self, ticket: &NewTicket) -> Result<TicketWithEvent, AppError> {
        let row = sqlx::query(&format!(
            "WITH t AS ( \
                 INSERT INTO tickets (user_id, event_id, payment_status, payment_id) \
                 VALUES ($1, $2, $3, $4) RETURNING * \
             ) \
             SELECT {TICKET_WITH_EVENT_COLUMNS} FROM t JOIN events e ON e.id = t.event_id"
        ))
        .bind(ticket.user_id)
        .bind(ticket.event_id)
        .bind(ticket.payment_status.as_str())
        .bind(&ticket.payment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(ticket_with_event_from_row(&row)?)
    }

    async fn delete_ticket(&self, ticket_id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM tickets WHERE id = $1")
            .bind(ticket_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
