mod common;

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{
        Method, Request, StatusCode,
        header::{AUTHORIZATION, ETAG, IF_NONE_MATCH},
    },
    response::Response,
};
use contentproxy::config::CmsSettings;
use contentproxy::infra::http::{ProxyState, REQUEST_ID_HEADER, build_router};
use contentproxy_api_types::{
    ContentDocument, ErrorBody, EtagListing, InvalidationAccepted, StatusReport,
};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use tower::ServiceExt;
use url::Url;

use common::{StubLoader, eventually, fast_config, start};

const TOKEN: &str = "s3cret";

struct Harness {
    router: Router,
    state: ProxyState,
    loader: Arc<StubLoader>,
}

async fn harness(token: Option<&str>) -> Harness {
    let loader = Arc::new(StubLoader::new());
    let (cache, _store) = start(fast_config(), Arc::clone(&loader)).await;
    let cms = CmsSettings {
        url: Url::parse("http://cms.invalid/").expect("url"),
        workspaces: vec!["live".to_string(), "stage".to_string()],
        dimensions: vec!["de".to_string(), "en".to_string()],
        default_workspace: "live".to_string(),
    };
    let state = ProxyState::new(Arc::new(cache), &cms, token.map(str::to_string));
    Harness {
        router: build_router(state.clone()),
        state,
        loader,
    }
}

impl Harness {
    async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router responds")
    }
}

fn request(method: Method, uri: &str) -> axum::http::request::Builder {
    Request::builder().method(method).uri(uri)
}

fn admin(method: Method, uri: &str) -> Request<Body> {
    request(method, uri)
        .header(AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .expect("request builds")
}

async fn json<T: DeserializeOwned>(response: Response) -> T {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn content_is_served_with_etag_and_revalidated() {
    let harness = harness(Some(TOKEN)).await;
    harness.loader.render("node-1", "<p>hello</p>", &["header"]);

    let response = harness
        .send(
            request(Method::GET, "/contentserver/export/de/node-1")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    let etag = response
        .headers()
        .get(ETAG)
        .and_then(|value| value.to_str().ok())
        .expect("etag header")
        .to_string();
    assert!(etag.starts_with('"') && etag.ends_with('"'));

    let document: ContentDocument = json(response).await;
    assert_eq!(document.html, "<p>hello</p>");
    assert_eq!(document.cache_dependencies, vec!["header".to_string()]);

    let revalidated = harness
        .send(
            request(Method::GET, "/contentserver/export/de/node-1?workspace=live")
                .header(IF_NONE_MATCH, etag.as_str())
                .body(Body::empty())
                .expect("request builds"),
        )
        .await;
    assert_eq!(revalidated.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(harness.loader.calls_for("node-1"), 1);
}

#[tokio::test]
async fn missing_content_maps_to_not_found() {
    let harness = harness(None).await;
    harness.loader.respond(
        "ghost",
        Err(contentproxy::cache::LoaderError::NotFound("ghost".into())),
    );

    let response = harness
        .send(
            request(Method::GET, "/contentserver/export/de/ghost")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: ErrorBody = json(response).await;
    assert_eq!(body.status, 404);
}

#[tokio::test]
async fn admin_routes_require_token() {
    let harness = harness(Some(TOKEN)).await;

    let anonymous = harness
        .send(
            request(Method::GET, "/contentproxy/status")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let wrong = harness
        .send(
            request(Method::GET, "/contentproxy/status")
                .header("x-api-key", "nope")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let keyed = harness
        .send(
            request(Method::GET, "/contentproxy/status")
                .header("x-api-key", TOKEN)
                .body(Body::empty())
                .expect("request builds"),
        )
        .await;
    assert_eq!(keyed.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_routes_are_open_without_configured_token() {
    let harness = harness(None).await;
    let response = harness
        .send(
            request(Method::GET, "/contentproxy/status")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let report: StatusReport = json(response).await;
    assert_eq!(report.backend, "memory");
    assert_eq!(report.cached_items, 0);
    assert_eq!(report.pipeline.workers, 4);
}

#[tokio::test]
async fn invalidation_fans_out_over_dimensions_and_workspaces() {
    let harness = harness(Some(TOKEN)).await;

    let response = harness
        .send(admin(Method::DELETE, "/contentproxy/cache/node-1"))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted: InvalidationAccepted = json(response).await;
    assert_eq!(accepted.message, "cache invalidation request accepted");
    assert_eq!(accepted.accepted, 4);

    let cache = Arc::clone(&harness.state.cache);
    eventually("fan-out", || async { cache.stats().completed == 4 }).await;
    assert_eq!(harness.loader.calls_for("node-1"), 4);

    let response = harness
        .send(admin(Method::DELETE, "/contentproxy/cache/node-2?workspace=stage"))
        .await;
    let accepted: InvalidationAccepted = json(response).await;
    assert_eq!(accepted.accepted, 2);
}

#[tokio::test]
async fn invalidation_rejects_unknown_workspace() {
    let harness = harness(Some(TOKEN)).await;
    let response = harness
        .send(admin(Method::DELETE, "/contentproxy/cache/node-1?workspace=preview"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = json(response).await;
    assert_eq!(body.status, 400);
    assert_eq!(harness.loader.total_calls(), 0);
}

#[tokio::test]
async fn etag_listing_and_lookup() {
    let harness = harness(Some(TOKEN)).await;
    harness
        .send(
            request(Method::GET, "/contentserver/export/de/node-1")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await;

    let listing: EtagListing = json(harness.send(admin(Method::GET, "/contentproxy/etags")).await).await;
    assert_eq!(listing.workspace, "live");
    let etag = listing.etags.get("live_de_node-1").expect("listed").clone();

    let response = harness
        .send(admin(Method::GET, "/contentproxy/etags/live_de_node-1"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let entry: contentproxy_api_types::EtagEntry = json(response).await;
    assert_eq!(entry.etag, etag);

    let missing = harness
        .send(admin(Method::GET, "/contentproxy/etags/live_de_nothing"))
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn full_invalidation_reports_count() {
    let harness = harness(Some(TOKEN)).await;
    for id in ["a", "b"] {
        harness
            .send(
                request(Method::GET, &format!("/contentserver/export/de/{id}"))
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await;
    }

    let response = harness
        .send(admin(Method::DELETE, "/contentproxy/cache"))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted: InvalidationAccepted = json(response).await;
    assert_eq!(accepted.accepted, 2);
    assert_eq!(accepted.message, "2 cache invalidation requests accepted");
}

#[tokio::test]
async fn health_check_is_public() {
    let harness = harness(Some(TOKEN)).await;
    let response = harness
        .send(
            request(Method::GET, "/_health")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
