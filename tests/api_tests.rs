/// HTTP-level tests for authentication, quotas and the enrichment endpoints
/// Drives the router with in-memory stores through tower's `oneshot`
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::Utc;
use lead_enrich_api::accounts::{new_api_key, MemoryAccountStore};
use lead_enrich_api::aggregator::Aggregator;
use lead_enrich_api::cache::{EnrichmentCache, MemoryCacheStore, DEFAULT_TTL_SECONDS};
use lead_enrich_api::handlers::{self, AppState};
use lead_enrich_api::limiter::{MemoryCounterStore, RateLimiter};
use lead_enrich_api::models::{ApiKey, SourceHealth};
use lead_enrich_api::profile_source::ProfileSource;
use lead_enrich_api::raw_store::MemoryRawStore;
use lead_enrich_api::scoring::ConfidenceScorer;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;

const RAW_KEY: &str = "api_test_abcdefghijklmnopqrstuvwxyz012345";

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    accounts: Arc<MemoryAccountStore>,
    raw: Arc<MemoryRawStore>,
    key: ApiKey,
}

impl TestApp {
    async fn new(configure: impl FnOnce(&mut ApiKey)) -> Self {
        let mut key = new_api_key(RAW_KEY, "starter", 60, 1000, 100, Utc::now());
        configure(&mut key);

        let raw = Arc::new(MemoryRawStore::new());
        let accounts = Arc::new(MemoryAccountStore::new());
        accounts.add_key(key.clone()).await;

        let aggregator = Aggregator::new(
            raw.clone(),
            EnrichmentCache::new(Arc::new(MemoryCacheStore::new()), DEFAULT_TTL_SECONDS),
            ConfidenceScorer::default(),
            Duration::from_secs(1),
        );
        let state = Arc::new(AppState {
            aggregator,
            profiles: ProfileSource::new(raw.clone()),
            accounts: accounts.clone(),
            limiter: RateLimiter::new(Arc::new(MemoryCounterStore::default())),
            api_version: "v1".to_string(),
            started_at: Instant::now(),
        });

        Self {
            router: handlers::router(state.clone()),
            state,
            accounts,
            raw,
            key,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn post(&self, uri: &str, body: Value) -> Response {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", RAW_KEY))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(
            Request::builder()
                .uri(uri)
                .header("authorization", format!("Bearer {}", RAW_KEY))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn credits_used(&self) -> i32 {
        self.accounts.key(self.key.id).await.unwrap().credits_used
    }

    async fn seed_octocat(&self) {
        self.raw
            .put_json(
                "profiles/o/octocat.json",
                &json!({"login": "octocat", "name": "The Octocat", "public_repos": 8, "followers": 10}),
                Some(Utc::now()),
            )
            .await;
    }
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_health_is_public() {
    let app = TestApp::new(|_| {}).await;
    let response = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "lead-enrich-api");
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = TestApp::new(|_| {}).await;
    let response = app.get("/v1/nope").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["type"], "not_found");
}

#[tokio::test]
async fn test_openapi_document_lists_routes() {
    let app = TestApp::new(|_| {}).await;
    let response = app
        .send(
            Request::builder()
                .uri("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await;
    assert!(doc["paths"]["/v1/enrich/person"].is_object());
    assert!(doc["components"]["securitySchemes"]["api_key"].is_object());
}

#[tokio::test]
async fn test_missing_or_invalid_key_is_401() {
    let app = TestApp::new(|_| {}).await;

    let missing = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/v1/enrich/person")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"handle":"octocat"}"#))
                .unwrap(),
        )
        .await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(missing).await["error"]["type"],
        "authentication_error"
    );

    let unknown = app
        .send(
            Request::builder()
                .uri("/v1/status")
                .header(
                    "authorization",
                    "Bearer api_live_zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz",
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);

    let malformed = app
        .send(
            Request::builder()
                .uri("/v1/status")
                .header("authorization", "Basic dXNlcjpwYXNz")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(malformed.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_enrich_person_sets_quota_headers_and_charges() {
    let app = TestApp::new(|_| {}).await;
    app.seed_octocat().await;

    let response = app.post("/v1/enrich/person", json!({"handle": "octocat"})).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-ratelimit-limit"), Some("60"));
    assert_eq!(header(&response, "x-ratelimit-remaining"), Some("59"));
    assert_eq!(header(&response, "x-credits-limit"), Some("100"));
    assert!(header(&response, "x-credits-reset").is_some());

    let body = body_json(response).await;
    assert_eq!(body["person"]["confidence_score"], 0.51);
    assert_eq!(body["person"]["data_sources"], json!(["profile"]));
    assert_eq!(app.credits_used().await, 1);

    // Served from the cache: no extra charge
    let again = app.post("/v1/enrich/person", json!({"handle": "OctoCat"})).await;
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(app.credits_used().await, 1);
}

#[tokio::test]
async fn test_validation_errors_are_400() {
    let app = TestApp::new(|_| {}).await;

    let bad_email = app
        .post("/v1/enrich/person", json!({"email": "not-an-email"}))
        .await;
    assert_eq!(bad_email.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(bad_email).await["error"]["type"],
        "validation_error"
    );

    let empty = app.post("/v1/enrich/company", json!({})).await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let bad_limit = app.get("/v1/search/people?domain=acme.io&limit=0").await;
    assert_eq!(bad_limit.status(), StatusCode::BAD_REQUEST);

    let huge_offset = app
        .get("/v1/search/people?domain=acme.io&offset=18446744073709551615")
        .await;
    assert_eq!(huge_offset.status(), StatusCode::BAD_REQUEST);

    let traversal = app
        .post(
            "/v1/enrich/person",
            json!({"handle": "a/../../registrations/com/victim"}),
        )
        .await;
    assert_eq!(traversal.status(), StatusCode::BAD_REQUEST);

    assert_eq!(app.credits_used().await, 0);
}

#[tokio::test]
async fn test_daily_limit_is_429() {
    let app = TestApp::new(|key| key.rate_limit_rpd = 1).await;
    app.state
        .limiter
        .record(app.key.id, Utc::now())
        .await
        .unwrap();

    let response = app.post("/v1/enrich/person", json!({"handle": "octocat"})).await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(header(&response, "retry-after").is_some());
    assert_eq!(header(&response, "x-ratelimit-remaining"), Some("0"));
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "rate_limit_error");
    assert!(body["error"]["retry_after"].as_u64().unwrap() >= 1);
    assert_eq!(app.credits_used().await, 0);
}

#[tokio::test]
async fn test_exhausted_credits_are_402() {
    let app = TestApp::new(|key| key.credits_used = key.credits_limit).await;

    let response = app
        .post("/v1/enrich/company", json!({"domain": "acme.io"}))
        .await;

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(header(&response, "x-credits-remaining"), Some("0"));
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "insufficient_credits");
    assert!(body["error"]["reset_at"].is_i64());
}

#[tokio::test]
async fn test_bulk_reports_item_failures() {
    let app = TestApp::new(|_| {}).await;
    app.seed_octocat().await;

    let response = app
        .post(
            "/v1/enrich/bulk",
            json!({
                "type": "person",
                "items": [{"handle": "octocat"}, {"email": "broken"}]
            }),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["summary"]["total"], 2);
    assert_eq!(body["summary"]["successful"], 1);
    assert_eq!(body["summary"]["failed"], 1);
    assert_eq!(body["summary"]["credits_used"], 1);
    assert_eq!(body["results"][1]["status"], "failed");
    assert_eq!(app.credits_used().await, 1);
}

#[tokio::test]
async fn test_search_falls_back_to_domain_index() {
    let app = TestApp::new(|_| {}).await;
    app.raw
        .put_json(
            "profiles/by-domain/acme.io.json",
            &json!([
                {"login": "jane", "name": "Jane Doe", "email": "jane@acme.io"},
                {"login": "bob", "name": "Bob"},
                {"login": "eve"}
            ]),
            None,
        )
        .await;

    let response = app.get("/v1/search/people?domain=www.acme.io&limit=2").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["people"].as_array().unwrap().len(), 2);
    assert_eq!(body["people"][0]["handle"], "jane");
    assert_eq!(body["total"], 3);
    assert_eq!(body["page"], 1);
    assert_eq!(body["per_page"], 2);
    assert_eq!(body["has_more"], true);
    assert_eq!(app.credits_used().await, 1);
}

#[tokio::test]
async fn test_search_from_cache_is_free() {
    let app = TestApp::new(|_| {}).await;

    let enriched = app
        .post("/v1/enrich/person", json!({"email": "jane@acme.io"}))
        .await;
    assert_eq!(enriched.status(), StatusCode::OK);
    assert_eq!(app.credits_used().await, 1);

    let response = app.get("/v1/search/people?domain=acme.io").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["people"][0]["email"], "jane@acme.io");
    assert_eq!(body["has_more"], false);
    assert_eq!(app.credits_used().await, 1);
}

#[tokio::test]
async fn test_status_degrades_when_a_source_is_down() {
    let app = TestApp::new(|_| {}).await;

    let operational = body_json(app.get("/v1/status").await).await;
    assert_eq!(operational["status"], "operational");
    assert_eq!(operational["rate_limits"]["requests_per_minute"], 60);

    app.accounts
        .set_health(vec![SourceHealth {
            source: "registration".to_string(),
            status: "down".to_string(),
            last_update: None,
            records: None,
        }])
        .await;

    let degraded = body_json(app.get("/v1/status").await).await;
    assert_eq!(degraded["status"], "degraded");
    assert_eq!(
        degraded["data_sources"]["registration"]["status"],
        "down"
    );
}
