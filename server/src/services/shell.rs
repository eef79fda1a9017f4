//! Which view the storefront shows, and which navigation it offers.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::models::Identity;
use crate::services::session::SessionSnapshot;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Page {
    #[default]
    Events,
    Dashboard,
    Admin,
    Auth,
}

impl Page {
    pub fn as_str(&self) -> &'static str {
        match self {
            Page::Events => "events",
            Page::Dashboard => "dashboard",
            Page::Admin => "admin",
            Page::Auth => "auth",
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    Loading,
    Catalog,
    Dashboard,
    Admin,
    AuthForm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NavItem {
    Events,
    Dashboard,
    Admin,
    SignOut,
}

/// Gated pages fall back to the catalog instead of failing.
pub fn resolve_view(page: Page, session: &SessionSnapshot) -> View {
    if session.loading {
        return View::Loading;
    }
    let identity = session.identity.as_ref();
    match page {
        Page::Auth => View::AuthForm,
        Page::Dashboard if identity.is_some() => View::Dashboard,
        Page::Admin if identity.is_some_and(Identity::is_admin) => View::Admin,
        _ => View::Catalog,
    }
}

pub fn navigation(session: &SessionSnapshot) -> Vec<NavItem> {
    let mut items = vec![NavItem::Events];
    if let Some(identity) = session.identity.as_ref() {
        items.push(NavItem::Dashboard);
        if identity.is_admin() {
            items.push(NavItem::Admin);
        }
        items.push(NavItem::SignOut);
    }
    items
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewState {
    pub page: Page,
    pub view: View,
    pub navigation: Vec<NavItem>,
    pub identity: Option<Identity>,
}

impl ViewState {
    pub fn build(page: Page, session: &SessionSnapshot) -> Self {
        Self {
            page,
            view: resolve_view(page, session),
            navigation: navigation(session),
            identity: session.identity.clone(),
        }
    }
}

/// The single page selector.
#[derive(Debug, Default)]
pub struct Navigator {
    page: RwLock<Page>,
}

impl Navigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn page(&self) -> Page {
        *self.page.read().await
    }

    pub async fn navigate(&self, page: Page) {
        let mut current = self.page.write().await;
        if *current != page {
            tracing::debug!(from = %*current, to = %page, "Navigate");
        }
        *current = page;
    }

    pub async fn view_state(&self, session: &SessionSnapshot) -> ViewState {
        ViewState::build(self.page().await, session)
    }
}
