use crate::accounts::AccountStore;
use crate::aggregator::{Aggregator, Enrichment};
use crate::errors::AppError;
use crate::limiter::RateLimiter;
use crate::middleware::{enforce_quota, require_api_key};
use crate::models::*;
use crate::obs;
use crate::profile_source::ProfileSource;
use crate::validation::{
    validate_bulk_request, validate_company_request, validate_person_request,
    validate_search_query,
};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use uuid::Uuid;

/// Confidence assigned to people read from the by-domain index.
const INDEXED_PERSON_CONFIDENCE: f64 = 0.7;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Cache-backed enrichment engine.
    pub aggregator: Aggregator,
    /// Raw profile lookups, used by the search fallback.
    pub profiles: ProfileSource,
    /// API keys, credits, usage log and source health.
    pub accounts: Arc<dyn AccountStore>,
    /// Per-key minute/day windows.
    pub limiter: RateLimiter,
    /// Path prefix of the API routes (`v1`).
    pub api_version: String,
    pub started_at: Instant,
}

/// Health check endpoint.
///
/// Unauthenticated and not subject to any rate limit.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "lead-enrich-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Service index.
pub async fn root(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let v = &state.api_version;
    Json(json!({
        "name": "Lead Enrichment API",
        "version": env!("CARGO_PKG_VERSION"),
        "documentation": "/docs",
        "endpoints": {
            "enrich_person": format!("POST /{}/enrich/person", v),
            "enrich_company": format!("POST /{}/enrich/company", v),
            "enrich_bulk": format!("POST /{}/enrich/bulk", v),
            "search_people": format!("GET /{}/search/people", v),
            "status": format!("GET /{}/status", v),
        }
    }))
}

pub async fn not_found() -> AppError {
    AppError::NotFound("The requested endpoint does not exist".to_string())
}

fn bad_json(rejection: JsonRejection) -> AppError {
    AppError::BadRequest(rejection.body_text())
}

fn usage_record(api_key: &ApiKey, endpoint: &str, method: &str, started: Instant) -> UsageRecord {
    UsageRecord {
        api_key_id: api_key.id,
        user_id: api_key.user_id,
        endpoint: endpoint.to_string(),
        method: method.to_string(),
        request_id: Uuid::new_v4(),
        response_status: 200,
        response_time_ms: started.elapsed().as_millis() as i64,
        credits_used: 0,
        cache_hit: false,
        confidence_score: None,
        data_sources: Vec::new(),
        error_message: None,
    }
}

fn log_usage(state: &Arc<AppState>, record: UsageRecord) {
    let accounts = Arc::clone(&state.accounts);
    obs::spawn_best_effort("usage log", async move { accounts.log_usage(record).await });
}

fn log_failure(state: &Arc<AppState>, mut record: UsageRecord, error: &AppError) {
    record.response_status = error.status_code().as_u16();
    record.error_message = Some(error.to_string());
    log_usage(state, record);
}

async fn charge(state: &Arc<AppState>, api_key: &ApiKey, credits: u32) -> Result<(), AppError> {
    if credits == 0 {
        return Ok(());
    }
    let credits = i32::try_from(credits)
        .map_err(|_| AppError::InternalError("credit charge overflow".to_string()))?;
    state.accounts.add_credits_used(api_key.id, credits).await
}

/// POST /{version}/enrich/person
///
/// Enriches a person from an email, handle, domain or professional network
/// URL. Cache hits are free; other enrichments cost one credit.
#[utoipa::path(
    post,
    path = "/v1/enrich/person",
    request_body = PersonEnrichmentRequest,
    responses(
        (status = 200, description = "Enriched person", body = PersonEnrichmentResponse),
        (status = 400, description = "Validation error"),
        (status = 401, description = "Missing or invalid API key"),
        (status = 402, description = "Credits exhausted"),
        (status = 429, description = "Rate limit exceeded")
    ),
    security(("api_key" = [])),
    tag = "enrichment"
)]
pub async fn enrich_person(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    payload: Result<Json<PersonEnrichmentRequest>, JsonRejection>,
) -> Result<Json<PersonEnrichmentResponse>, AppError> {
    let started = Instant::now();
    let Json(req) = payload.map_err(bad_json)?;
    validate_person_request(&req)?;
    tracing::info!("POST /enrich/person - key {}", api_key.key_prefix);

    let record = usage_record(&api_key, "/enrich/person", "POST", started);
    let enrichment = match state.aggregator.enrich_person(&req).await {
        Ok(enrichment) => enrichment,
        Err(e) => {
            log_failure(&state, record, &e);
            return Err(e);
        }
    };
    charge(&state, &api_key, enrichment.credits()).await?;

    let Enrichment { entity, from_cache } = enrichment;
    log_usage(
        &state,
        UsageRecord {
            response_time_ms: started.elapsed().as_millis() as i64,
            credits_used: if from_cache { 0 } else { 1 },
            cache_hit: from_cache,
            confidence_score: Some(entity.confidence_score),
            data_sources: entity.data_sources.clone(),
            ..record
        },
    );

    Ok(Json(PersonEnrichmentResponse { person: entity }))
}

/// POST /{version}/enrich/company
#[utoipa::path(
    post,
    path = "/v1/enrich/company",
    request_body = CompanyEnrichmentRequest,
    responses(
        (status = 200, description = "Enriched company", body = CompanyEnrichmentResponse),
        (status = 400, description = "Validation error"),
        (status = 401, description = "Missing or invalid API key"),
        (status = 402, description = "Credits exhausted"),
        (status = 429, description = "Rate limit exceeded")
    ),
    security(("api_key" = [])),
    tag = "enrichment"
)]
pub async fn enrich_company(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    payload: Result<Json<CompanyEnrichmentRequest>, JsonRejection>,
) -> Result<Json<CompanyEnrichmentResponse>, AppError> {
    let started = Instant::now();
    let Json(req) = payload.map_err(bad_json)?;
    validate_company_request(&req)?;
    tracing::info!("POST /enrich/company - key {}", api_key.key_prefix);

    let record = usage_record(&api_key, "/enrich/company", "POST", started);
    let enrichment = match state.aggregator.enrich_company(&req).await {
        Ok(enrichment) => enrichment,
        Err(e) => {
            log_failure(&state, record, &e);
            return Err(e);
        }
    };
    charge(&state, &api_key, enrichment.credits()).await?;

    let Enrichment { entity, from_cache } = enrichment;
    log_usage(
        &state,
        UsageRecord {
            response_time_ms: started.elapsed().as_millis() as i64,
            credits_used: if from_cache { 0 } else { 1 },
            cache_hit: from_cache,
            confidence_score: Some(entity.confidence_score),
            data_sources: entity.data_sources.clone(),
            ..record
        },
    );

    Ok(Json(CompanyEnrichmentResponse { company: entity }))
}

async fn enrich_bulk_item(
    state: &AppState,
    kind: EntityKind,
    input: serde_json::Value,
) -> (BulkItemResult, u32) {
    let outcome = match kind {
        EntityKind::Person => {
            let enriched = async {
                let req: PersonEnrichmentRequest = serde_json::from_value(input.clone())
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                validate_person_request(&req)?;
                state.aggregator.enrich_person(&req).await
            }
            .await;
            enriched.map(|e| {
                let credits = e.credits();
                ((Some(e.entity), None), credits)
            })
        }
        EntityKind::Company => {
            let enriched = async {
                let req: CompanyEnrichmentRequest = serde_json::from_value(input.clone())
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                validate_company_request(&req)?;
                state.aggregator.enrich_company(&req).await
            }
            .await;
            enriched.map(|e| {
                let credits = e.credits();
                ((None, Some(e.entity)), credits)
            })
        }
    };

    match outcome {
        Ok(((person, company), credits)) => (
            BulkItemResult {
                input,
                person,
                company,
                status: BulkItemStatus::Success,
                error: None,
            },
            credits,
        ),
        Err(e) => {
            tracing::warn!("Bulk item failed: {}", e);
            (
                BulkItemResult {
                    input,
                    person: None,
                    company: None,
                    status: BulkItemStatus::Failed,
                    error: Some(e.to_string()),
                },
                0,
            )
        }
    }
}

/// POST /{version}/enrich/bulk
///
/// Enriches 1-100 items concurrently. A failing item is reported as
/// `failed` and never aborts its siblings.
#[utoipa::path(
    post,
    path = "/v1/enrich/bulk",
    request_body = BulkEnrichmentRequest,
    responses(
        (status = 200, description = "Per-item results", body = BulkEnrichmentResponse),
        (status = 400, description = "Validation error")
    ),
    security(("api_key" = [])),
    tag = "enrichment"
)]
pub async fn enrich_bulk(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    payload: Result<Json<BulkEnrichmentRequest>, JsonRejection>,
) -> Result<Json<BulkEnrichmentResponse>, AppError> {
    let started = Instant::now();
    let Json(req) = payload.map_err(bad_json)?;
    validate_bulk_request(&req)?;
    tracing::info!(
        "POST /enrich/bulk - {} {} items, key {}",
        req.items.len(),
        req.kind.as_str(),
        api_key.key_prefix
    );

    let kind = req.kind;
    let outcomes = futures::future::join_all(
        req.items
            .into_iter()
            .map(|item| enrich_bulk_item(&state, kind, item)),
    )
    .await;

    let credits_used: u32 = outcomes.iter().map(|(_, credits)| credits).sum();
    let results: Vec<BulkItemResult> = outcomes.into_iter().map(|(result, _)| result).collect();
    let successful = results
        .iter()
        .filter(|r| r.status == BulkItemStatus::Success)
        .count();

    charge(&state, &api_key, credits_used).await?;

    let summary = BulkSummary {
        total: results.len(),
        successful,
        failed: results.len() - successful,
        credits_used,
    };
    tracing::info!(
        "Bulk enrichment done: {}/{} succeeded, {} credits",
        summary.successful,
        summary.total,
        summary.credits_used
    );

    let mut record = usage_record(&api_key, "/enrich/bulk", "POST", started);
    record.credits_used = credits_used as i32;
    record.cache_hit = credits_used == 0;
    log_usage(&state, record);

    Ok(Json(BulkEnrichmentResponse { results, summary }))
}

/// GET /{version}/search/people
///
/// Lists previously enriched people linked to a company domain. Served from
/// the cache for free; falls back to the by-domain profile index at one credit.
#[utoipa::path(
    get,
    path = "/v1/search/people",
    params(SearchPeopleQuery),
    responses(
        (status = 200, description = "People at the domain", body = SearchPeopleResponse),
        (status = 400, description = "Validation error")
    ),
    security(("api_key" = [])),
    tag = "search"
)]
pub async fn search_people(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    query: Result<Query<SearchPeopleQuery>, QueryRejection>,
) -> Result<Json<SearchPeopleResponse>, AppError> {
    let started = Instant::now();
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let params = validate_search_query(&query)?;
    tracing::info!("GET /search/people - domain {}", params.domain);

    let window = params.offset + params.limit;
    let cached = state
        .aggregator
        .cache()
        .search_people(&params.domain, window + 1)
        .await?;

    let (people, total, credits) = if !cached.is_empty() {
        let total = cached.len();
        let people = cached
            .into_iter()
            .skip(params.offset)
            .take(params.limit)
            .map(|p| SearchPerson {
                handle: p.profile.as_ref().map(|pr| pr.handle.clone()),
                name: p.name,
                email: p.email,
                confidence_score: p.confidence_score,
            })
            .collect::<Vec<_>>();
        (people, total, 0)
    } else {
        let indexed = state
            .profiles
            .profiles_by_domain(&params.domain, usize::MAX)
            .await?;
        let total = indexed.len();
        let people = indexed
            .into_iter()
            .skip(params.offset)
            .take(params.limit)
            .map(|p| SearchPerson {
                name: p.name,
                email: p.email,
                handle: Some(p.login),
                confidence_score: INDEXED_PERSON_CONFIDENCE,
            })
            .collect::<Vec<_>>();
        (people, total, 1)
    };

    charge(&state, &api_key, credits).await?;

    let mut record = usage_record(&api_key, "/search/people", "GET", started);
    record.credits_used = credits as i32;
    record.cache_hit = credits == 0;
    log_usage(&state, record);

    Ok(Json(SearchPeopleResponse {
        people,
        total,
        page: params.offset / params.limit + 1,
        per_page: params.limit,
        has_more: total > window,
    }))
}

/// GET /{version}/status
#[utoipa::path(
    get,
    path = "/v1/status",
    responses((status = 200, description = "Service status", body = StatusResponse)),
    security(("api_key" = [])),
    tag = "status"
)]
pub async fn status(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
) -> Json<StatusResponse> {
    let (health, cache) = tokio::join!(
        state.accounts.data_source_health(),
        state.aggregator.cache().stats()
    );

    let mut overall = ServiceStatus::Operational;
    let health = health.unwrap_or_else(|e| {
        tracing::warn!("Source health unavailable: {}", e);
        overall = ServiceStatus::Degraded;
        Vec::new()
    });
    if health.iter().any(|h| h.status == "down") {
        overall = ServiceStatus::Degraded;
    }
    let cache = cache.unwrap_or_else(|e| {
        tracing::warn!("Cache stats unavailable: {}", e);
        CacheStats::default()
    });

    let data_sources: BTreeMap<String, SourceHealth> = health
        .into_iter()
        .map(|h| (h.source.clone(), h))
        .collect();

    Json(StatusResponse {
        status: overall,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: state.started_at.elapsed().as_secs(),
        data_sources,
        cache,
        rate_limits: RateLimitSettings {
            requests_per_minute: api_key.rate_limit_rpm,
            requests_per_day: api_key.rate_limit_rpd,
        },
    })
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "Lead Enrichment API", description = "Person and company enrichment with confidence scoring"),
    paths(enrich_person, enrich_company, enrich_bulk, search_people, status),
    components(schemas(
        PersonEnrichmentRequest,
        CompanyEnrichmentRequest,
        BulkEnrichmentRequest,
        PersonEnrichmentResponse,
        CompanyEnrichmentResponse,
        BulkEnrichmentResponse,
        BulkItemResult,
        BulkItemStatus,
        BulkSummary,
        SearchPeopleResponse,
        SearchPerson,
        StatusResponse,
        ServiceStatus,
        SourceHealth,
        CacheStats,
        RateLimitSettings,
        EnrichedPerson,
        EnrichedCompany,
        EntityKind,
        Email,
        EmailType,
        DataSource,
        LinkedProfile,
        Repository,
        Organization,
        RegistrationRecord,
        Location,
        Contact,
        CompanyLink,
        SocialProfiles
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "enrichment", description = "Person, company and bulk enrichment"),
        (name = "search", description = "Domain people search"),
        (name = "status", description = "Service health")
    )
)]
pub struct ApiDoc;

/// Serves the generated OpenAPI document.
pub async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

/// Serves the Swagger UI HTML page.
pub async fn swagger_ui() -> impl IntoResponse {
    let html = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Lead Enrichment API - Swagger UI</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
    <style>
        body { margin: 0; padding: 0; }
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script>
        window.onload = function() {
            window.ui = SwaggerUIBundle({
                url: "/api-docs/openapi.json",
                dom_id: '#swagger-ui',
                deepLinking: true
            });
        };
    </script>
</body>
</html>
"#;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
}

/// Authenticated, quota-enforced API routes (mounted under `/{version}`).
pub fn api_routes(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/enrich/person", post(enrich_person))
        .route("/enrich/company", post(enrich_company))
        .route("/enrich/bulk", post(enrich_bulk))
        .route("/search/people", get(search_people))
        .route("/status", get(status))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(state),
            enforce_quota,
        ))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(state),
            require_api_key,
        ))
}

/// Routes outside authentication: index and docs.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(root))
        .route("/docs", get(swagger_ui))
        .route("/api-docs/openapi.json", get(openapi_json))
}

/// Full router without the per-IP flood guard.
pub fn router(state: Arc<AppState>) -> Router {
    let prefix = format!("/{}", state.api_version);
    Router::new()
        .route("/health", get(health))
        .merge(public_routes())
        .nest(&prefix, api_routes(&state))
        .fallback(not_found)
        .with_state(state)
}
