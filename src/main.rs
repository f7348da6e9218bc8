use axum::Router;
use lead_enrich_api::{
    aggregator::Aggregator,
    cache::EnrichmentCache,
    circuit_breaker::create_db_circuit_breaker,
    config::Config,
    db::Database,
    db_storage::{PgAccountStore, PgCacheStore},
    handlers::{self, AppState},
    limiter::{MemoryCounterStore, RateLimiter},
    obs,
    profile_source::ProfileSource,
    raw_store::HttpRawStore,
    scoring::ConfidenceScorer,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Database connection and migrations.
/// - Cache, account and raw-record stores.
/// - HTTP routes and middleware (CORS, per-IP flood guard, body limit).
///
/// It then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    obs::init_tracing();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool and apply migrations
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    let breaker = create_db_circuit_breaker();
    let cache_store = Arc::new(PgCacheStore::new(db.pool.clone(), breaker.clone()));
    let accounts = Arc::new(PgAccountStore::new(db.pool.clone(), breaker));

    let raw = Arc::new(HttpRawStore::new(
        config.data_lake_url.clone(),
        config.data_lake_token.clone(),
    )?);
    tracing::info!("Raw-record store client initialized: {}", config.data_lake_url);

    let cache = EnrichmentCache::new(cache_store, config.cache_ttl_seconds);
    let aggregator = Aggregator::new(
        raw.clone(),
        cache,
        ConfidenceScorer::default(),
        config.adapter_timeout(),
    );

    // Rate-limit counters (window + 60s TTL per entry)
    let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::default()));
    tracing::info!("Rate limiter initialized");

    let state = Arc::new(AppState {
        aggregator,
        profiles: ProfileSource::new(raw),
        accounts,
        limiter,
        api_version: config.api_version.clone(),
        started_at: Instant::now(),
    });

    // Configure flood guard: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid governor configuration"))?,
    );

    let protected_routes = Router::new()
        .nest(
            &format!("/{}", config.api_version),
            handlers::api_routes(&state),
        )
        .merge(handlers::public_routes())
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses the flood guard
    let app = Router::new()
        .route("/health", axum::routing::get(handlers::health))
        .merge(protected_routes)
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
