use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::error::AppError;

/// Formats accepted for the event start besides RFC 3339. The first one is
/// what an HTML `datetime-local` input submits.
const LOCAL_DATE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"];

/// `events.price` is `NUMERIC(10, 2)`.
const PRICE_SCALE: u32 = 2;
const PRICE_MAX_CENTS: i64 = 9_999_999_999;

fn max_price() -> Decimal {
    Decimal::new(PRICE_MAX_CENTS, PRICE_SCALE)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub price: Decimal,
    pub available_tickets: i32,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn is_sold_out(&self) -> bool {
        self.available_tickets <= 0
    }
}

/// Validated fields for a new event; only produced by [`EventDraft::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub title: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub price: Decimal,
    pub available_tickets: i32,
    pub image_url: String,
}

/// Raw admin form input. Numbers may arrive as JSON numbers or strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventDraft {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub price: Option<Value>,
    pub available_tickets: Option<Value>,
    pub image_url: Option<String>,
}

impl EventDraft {
    /// Checks every field and reports all problems at once.
    pub fn validate(&self) -> Result<NewEvent, AppError> {
        let mut problems = Vec::new();

        let title = required_text("title", &self.title, &mut problems);
        let description = required_text("description", &self.description, &mut problems);
        let image_url = required_text("image_url", &self.image_url, &mut problems);
        if let Some(url) = &image_url {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                problems.push("image_url must be an http(s) URL".to_string());
            }
        }

        let date = match required_text("date", &self.date, &mut problems) {
            Some(raw) => match parse_event_date(&raw) {
                Some(date) => Some(date),
                None => {
                    problems.push(format!("date '{raw}' is not a valid date and time"));
                    None
                }
            },
            None => None,
        };

        let price = match &self.price {
            None | Some(Value::Null) => {
                problems.push("price is required".to_string());
                None
            }
            Some(value) => match parse_decimal(value) {
                Some(price) if price.is_sign_negative() && !price.is_zero() => {
                    problems.push("price must not be negative".to_string());
                    None
                }
                Some(price) if price.normalize().scale() > PRICE_SCALE => {
                    problems.push(format!("price must have at most {PRICE_SCALE} decimal places"));
                    None
                }
                Some(price) if price > max_price() => {
                    problems.push(format!("price must not exceed {}", max_price()));
                    None
                }
                Some(price) => Some(price),
                None => {
                    problems.push("price must be a number".to_string());
                    None
                }
            },
        };

        let available_tickets = match &self.available_tickets {
            None | Some(Value::Null) => {
                problems.push("available_tickets is required".to_string());
                None
            }
            Some(value) => match parse_count(value) {
                Some(count) if count < 0 => {
                    problems.push("available_tickets must not be negative".to_string());
                    None
                }
                Some(count) => Some(count),
                None => {
                    problems.push("available_tickets must be a whole number".to_string());
                    None
                }
            },
        };

        match (title, description, date, price, available_tickets, image_url) {
            (
                Some(title),
                Some(description),
                Some(date),
                Some(price),
                Some(available_tickets),
                Some(image_url),
            ) if problems.is_empty() => Ok(NewEvent {
                title,
                description,
                date,
                price,
                available_tickets,
                image_url,
            }),
            _ => Err(AppError::ValidationError(problems.join("; "))),
        }
    }
}

fn required_text(field: &str, value: &Option<String>, problems: &mut Vec<String>) -> Option<String> {
    match value.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Some(text.to_string()),
        _ => {
            problems.push(format!("{field} is required"));
            None
        }
    }
}

pub fn parse_event_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }
    LOCAL_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => Decimal::from_str(&number.to_string()).ok(),
        Value::String(text) => Decimal::from_str(text.trim()).ok(),
        _ => None,
    }
}

fn parse_count(value: &Value) -> Option<i32> {
    match value {
        Value::Number(number) => number.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(text) => text.trim().parse::<i32>().ok(),
        _ => None,
    }
}
