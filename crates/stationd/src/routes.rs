//! In-process webhook dispatcher.
//!
//! Both station paths are mounted on the HTTP router once, at startup. Which
//! one is live is decided here, by a flag per path, so switching dialects never
//! touches the router.

use std::sync::Arc;
use std::sync::RwLock;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use indexmap::IndexMap;
use tracing::debug;

use crate::sensor::RawPayload;

pub const UNREGISTERED_BODY: &str = "Unregistered webhook. Check your settings.";

/// An inbound station push, reduced to what handlers need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    pub path: String,
    pub query: RawPayload,
}

#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle(&self, request: WebhookRequest) -> Response;
}

/// Fallback for unknown or disabled paths.
pub struct Unregistered;

#[async_trait]
impl WebhookHandler for Unregistered {
    async fn handle(&self, request: WebhookRequest) -> Response {
        debug!(
            "Received data on unregistered or disabled webhook {}",
            request.path
        );
        (StatusCode::BAD_REQUEST, UNREGISTERED_BODY).into_response()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("route {0} is not registered")]
    UnknownRoute(String),

    #[error("route table lock poisoned")]
    Poisoned,
}

#[derive(Clone)]
pub struct RouteInfo {
    pub handler: Arc<dyn WebhookHandler>,
    pub enabled: bool,
    pub fallback: Arc<dyn WebhookHandler>,
}

/// Path → handler table with at most one enabled route.
#[derive(Default)]
pub struct Routes {
    routes: RwLock<IndexMap<String, RouteInfo>>,
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path. Enabling it disables every other route.
    pub fn add_route(
        &self,
        path: &str,
        handler: Arc<dyn WebhookHandler>,
        enabled: bool,
    ) -> Result<(), RouteError> {
        let mut routes = self.routes.write().map_err(|_| RouteError::Poisoned)?;
        if enabled {
            for info in routes.values_mut() {
                info.enabled = false;
            }
        }
        routes.insert(
            path.to_string(),
            RouteInfo {
                handler,
                enabled,
                fallback: Arc::new(Unregistered),
            },
        );
        debug!("Registered dispatcher for route {}", path);
        Ok(())
    }

    /// Enable `path` and disable all others.
    ///
    /// An unknown path leaves the table untouched.
    pub fn switch_route(&self, path: &str) -> Result<(), RouteError> {
        let mut routes = self.routes.write().map_err(|_| RouteError::Poisoned)?;
        if !routes.contains_key(path) {
            return Err(RouteError::UnknownRoute(path.to_string()));
        }
        for (p, info) in routes.iter_mut() {
            info.enabled = p == path;
        }
        Ok(())
    }

    pub async fn dispatch(&self, request: WebhookRequest) -> Response {
        let handler = {
            let Ok(routes) = self.routes.read() else {
                return (StatusCode::INTERNAL_SERVER_ERROR, "route table unavailable")
                    .into_response();
            };
            match routes.get(&request.path) {
                Some(info) if info.enabled => info.handler.clone(),
                Some(info) => info.fallback.clone(),
                None => {
                    debug!("Route {} is not registered", request.path);
                    Arc::new(Unregistered) as Arc<dyn WebhookHandler>
                }
            }
        };
        handler.handle(request).await
    }

    pub fn enabled_path(&self) -> Option<String> {
        let routes = self.routes.read().ok()?;
        routes
            .iter()
            .find(|(_, info)| info.enabled)
            .map(|(path, _)| path.clone())
    }

    pub fn show_enabled(&self) -> String {
        match self.enabled_path() {
            Some(path) => format!("Dispatcher enabled for URL: {path}"),
            None => "No route is enabled.".to_string(),
        }
    }
}
