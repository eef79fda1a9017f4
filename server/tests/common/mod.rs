#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;

use storefront_server::backend::memory::MemoryBackend;
use storefront_server::backend::Backend;
use storefront_server::config::Config;
use storefront_server::models::{Event, NewEvent, Role};
use storefront_server::routes::create_routes;
use storefront_server::services::payment::PaymentSimulator;
use storefront_server::services::purchase::PurchasePolicy;
use storefront_server::state::AppState;

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "admin-secret";

pub struct TestApp {
    pub router: Router,
    pub backend: Arc<MemoryBackend>,
    pub state: AppState,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_success_rate(1.0).await
    }

    pub async fn with_success_rate(success_rate: f64) -> Self {
        let backend = MemoryBackend::shared();
        backend
            .seed_account(ADMIN_EMAIL, ADMIN_PASSWORD, "Admin", Role::Admin)
            .await;

        let payments = Arc::new(PaymentSimulator::new(success_rate, Duration::ZERO, Duration::ZERO));
        let state = AppState::new(Backend::in_memory(backend.clone()), payments, PurchasePolicy::default());
        state.start().await;

        let config = Config::from_source(|_| None);
        Self {
            router: create_routes(state.clone(), &config),
            backend,
            state,
        }
    }

    pub async fn seed_event(&self, title: &str, price_cents: i64, available: i32) -> Event {
        self.backend
            .seed_event(NewEvent {
                title: title.to_string(),
                description: format!("{title} live"),
                date: Utc.with_ymd_and_hms(2031, 3, 14, 19, 30, 0).unwrap(),
                price: Decimal::new(price_cents, 2),
                available_tickets: available,
                image_url: "https://images.example.com/e.jpg".to_string(),
            })
            .await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    pub async fn sign_up(&self, email: &str) -> Value {
        let (status, body) = self
            .post(
                "/api/auth/sign-up",
                serde_json::json!({ "email": email, "password": "hunter22", "name": "Buyer" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    pub async fn sign_in_admin(&self) {
        let (status, body) = self
            .post(
                "/api/auth/sign-in",
                serde_json::json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }
}
