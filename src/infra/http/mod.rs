//! HTTP surface: content delivery plus the administrative cache endpoints.

mod admin;
mod content;
mod middleware;

use std::sync::Arc;

use axum::{Router, middleware as axum_middleware};

use crate::cache::ContentCache;
use crate::config::CmsSettings;

pub use middleware::{REQUEST_ID_HEADER, RequestContext};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ProxyState {
    pub cache: Arc<ContentCache>,
    pub workspaces: Arc<[String]>,
    pub dimensions: Arc<[String]>,
    pub default_workspace: Arc<str>,
    /// Token guarding the administrative routes; `None` leaves them open.
    pub token: Option<Arc<str>>,
}

impl ProxyState {
    pub fn new(cache: Arc<ContentCache>, cms: &CmsSettings, token: Option<String>) -> Self {
        Self {
            cache,
            workspaces: cms.workspaces.clone().into(),
            dimensions: cms.dimensions.clone().into(),
            default_workspace: cms.default_workspace.as_str().into(),
            token: token.map(Into::into),
        }
    }

    /// Trimmed, lower-cased workspace from a query string, or the default one.
    pub fn workspace_or_default(&self, requested: Option<&str>) -> String {
        requested
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.default_workspace.to_string())
    }

    pub fn knows_workspace(&self, workspace: &str) -> bool {
        self.workspaces.iter().any(|known| known == workspace)
    }

    pub fn is_default_workspace(&self, workspace: &str) -> bool {
        *self.default_workspace == *workspace
    }
}

pub fn build_router(state: ProxyState) -> Router {
    Router::new()
        .merge(content::routes())
        .merge(admin::routes(state.clone()))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
