use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, Request, StatusCode, header::AUTHORIZATION},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use contentproxy_api_types::{
    EtagEntry, EtagListing, InvalidationAccepted, PipelineStatus, StatusReport,
};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::application::error::HttpError;
use crate::cache::{NodeKey, PipelineStats, Submission};

use super::ProxyState;
use super::content::WorkspaceQuery;

const SOURCE: &str = "infra::http::admin";
const API_KEY_HEADER: &str = "x-api-key";

pub(super) fn routes(state: ProxyState) -> Router<ProxyState> {
    Router::new()
        .route("/contentproxy/cache", delete(invalidate_all))
        .route("/contentproxy/cache/{id}", delete(invalidate))
        .route("/contentproxy/etags", get(list_etags))
        .route("/contentproxy/etags/{hash}", get(get_etag))
        .route("/contentproxy/status", get(status))
        .route_layer(middleware::from_fn_with_state(state, require_token))
}

async fn require_token(
    State(state): State<ProxyState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.token.as_deref() else {
        return next.run(request).await;
    };

    let verdict = extract_token(request.headers())
        .map(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())));

    match verdict {
        Some(true) => next.run(request).await,
        Some(false) => HttpError::new(
            SOURCE,
            StatusCode::UNAUTHORIZED,
            "Invalid token",
            "administrative token mismatch",
        )
        .into_response(),
        None => HttpError::new(
            SOURCE,
            StatusCode::UNAUTHORIZED,
            "Token required",
            "administrative request without token",
        )
        .into_response(),
    }
}

/// Bearer token from `Authorization`, falling back to `x-api-key`.
fn extract_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .or_else(|| {
            headers
                .get(API_KEY_HEADER)
                .and_then(|value| value.to_str().ok())
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Queue a refresh of `id` in every configured dimension.
///
/// The default workspace fans out to every configured workspace.
async fn invalidate(
    State(state): State<ProxyState>,
    Path(id): Path<String>,
    Query(query): Query<WorkspaceQuery>,
) -> Result<(StatusCode, Json<InvalidationAccepted>), HttpError> {
    let workspace = state.workspace_or_default(query.workspace.as_deref());
    if !state.knows_workspace(&workspace) {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "cache invalidation failed: unknown workspace",
            format!("workspace `{workspace}` is not configured"),
        ));
    }

    let workspaces: Vec<String> = if state.is_default_workspace(&workspace) {
        state.workspaces.to_vec()
    } else {
        vec![workspace]
    };

    if state.dimensions.is_empty() {
        warn!(id = %id, "No dimensions configured, nothing to invalidate");
    }

    let mut accepted = 0;
    for workspace in &workspaces {
        for dimension in state.dimensions.iter() {
            let key = NodeKey::new(id.as_str(), dimension.as_str(), workspace.as_str());
            match state.cache.invalidate(key) {
                Submission::Queued | Submission::Diverted => accepted += 1,
                Submission::Closed => {
                    return Err(HttpError::new(
                        SOURCE,
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Invalidation pipeline is shutting down",
                        "invalidation queue closed",
                    ));
                }
            }
        }
    }

    debug!(id = %id, workspaces = workspaces.len(), accepted, "Cache invalidation request accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(InvalidationAccepted {
            message: "cache invalidation request accepted".to_string(),
            accepted,
        }),
    ))
}

async fn invalidate_all(
    State(state): State<ProxyState>,
) -> Result<(StatusCode, Json<InvalidationAccepted>), HttpError> {
    let accepted = state
        .cache
        .invalidate_all()
        .await
        .map_err(|err| HttpError::from_cache(SOURCE, &err))?;

    info!(accepted, "Full cache invalidation accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(InvalidationAccepted {
            message: format!("{accepted} cache invalidation requests accepted"),
            accepted,
        }),
    ))
}

async fn list_etags(
    State(state): State<ProxyState>,
    Query(query): Query<WorkspaceQuery>,
) -> Result<Json<EtagListing>, HttpError> {
    let workspace = state.workspace_or_default(query.workspace.as_deref());
    let etags = state
        .cache
        .get_all_etags(&workspace)
        .await
        .map_err(|err| HttpError::from_cache(SOURCE, &err))?;

    Ok(Json(EtagListing {
        workspace,
        etags: etags.into_iter().collect(),
    }))
}

async fn get_etag(
    State(state): State<ProxyState>,
    Path(hash): Path<String>,
) -> Result<Json<EtagEntry>, HttpError> {
    let etag = state
        .cache
        .get_etag_by_hash(&hash)
        .await
        .map_err(|err| HttpError::from_cache(SOURCE, &err))?;
    Ok(Json(EtagEntry { hash, etag }))
}

async fn status(State(state): State<ProxyState>) -> Result<Json<StatusReport>, HttpError> {
    let cached_items = state
        .cache
        .count()
        .await
        .map_err(|err| HttpError::from_cache(SOURCE, &err))?;

    Ok(Json(StatusReport {
        backend: state.cache.backend().to_string(),
        cached_items,
        pipeline: pipeline_status(state.cache.stats()),
    }))
}

fn pipeline_status(stats: PipelineStats) -> PipelineStatus {
    PipelineStatus {
        queued: stats.queued,
        queue_capacity: stats.queue_capacity,
        workers: stats.workers,
        retry_pending: stats.retry_pending,
        completed: stats.completed,
        retried: stats.retried,
        diverted: stats.diverted,
        abandoned: stats.abandoned,
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn bearer_token_is_preferred() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("other"));
        assert_eq!(extract_token(&headers), Some("secret"));
    }

    #[test]
    fn api_key_header_is_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("secret"));
        assert_eq!(extract_token(&headers), Some("secret"));
    }

    #[test]
    fn blank_tokens_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer  "));
        assert_eq!(extract_token(&headers), None);
    }
}
