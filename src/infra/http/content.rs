use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{ETAG, IF_NONE_MATCH},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use contentproxy_api_types::ContentDocument;
use serde::Deserialize;
use tracing::debug;

use crate::application::error::HttpError;
use crate::cache::NodeKey;

use super::ProxyState;

const SOURCE: &str = "infra::http::content";

#[derive(Debug, Default, Deserialize)]
pub(super) struct WorkspaceQuery {
    pub(super) workspace: Option<String>,
}

pub(super) fn routes() -> Router<ProxyState> {
    Router::new()
        .route("/contentserver/export/{dimension}/{id}", get(get_content))
        .route("/_health", get(health))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn get_content(
    State(state): State<ProxyState>,
    Path((dimension, id)): Path<(String, String)>,
    Query(query): Query<WorkspaceQuery>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let workspace = state.workspace_or_default(query.workspace.as_deref());
    let key = NodeKey::new(id, dimension, workspace);

    if let Some(candidate) = requested_etag(&headers)
        && let Ok(current) = state.cache.get_etag(&key).await
        && !current.is_empty()
        && current == candidate
    {
        debug!(node = %key, "Content not modified");
        let mut response = StatusCode::NOT_MODIFIED.into_response();
        if let Ok(value) = etag_header(&current) {
            response.headers_mut().insert(ETAG, value);
        }
        return Ok(response);
    }

    let item = state
        .cache
        .fetch(&key)
        .await
        .map_err(|err| HttpError::from_cache(SOURCE, &err))?;

    let etag = item.etag().into_owned();
    let mut response = Json(ContentDocument {
        html: item.html,
        cache_dependencies: item.dependencies,
    })
    .into_response();

    let value = etag_header(&etag).map_err(|err| {
        HttpError::from_error(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            &err,
        )
    })?;
    response.headers_mut().insert(ETAG, value);
    Ok(response)
}

/// Etag a client already holds, from `If-None-Match` or a bare `ETag` header.
fn requested_etag(headers: &HeaderMap) -> Option<String> {
    [IF_NONE_MATCH, ETAG]
        .iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok())
        .map(normalize_etag)
        .find(|value| !value.is_empty())
}

fn normalize_etag(raw: &str) -> String {
    let trimmed = raw.trim();
    let strong = trimmed.strip_prefix("W/").unwrap_or(trimmed);
    strong.trim_matches('"').to_string()
}

fn etag_header(etag: &str) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    HeaderValue::from_str(&format!("\"{etag}\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etags_are_normalized() {
        assert_eq!(normalize_etag("\"abc\""), "abc");
        assert_eq!(normalize_etag("W/\"abc\""), "abc");
        assert_eq!(normalize_etag(" abc "), "abc");
    }

    #[test]
    fn if_none_match_wins_over_etag_header() {
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static("old"));
        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("\"new\""));
        assert_eq!(requested_etag(&headers).as_deref(), Some("new"));

        headers.remove(IF_NONE_MATCH);
        assert_eq!(requested_etag(&headers).as_deref(), Some("old"));
    }
}
