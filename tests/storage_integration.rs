use chrono::Utc;
use std::env;
use std::sync::Arc;
use uuid::Uuid;

use lead_enrich_api::accounts::{hash_api_key, new_api_key, AccountStore};
use lead_enrich_api::cache::EnrichmentCache;
use lead_enrich_api::circuit_breaker::create_db_circuit_breaker;
use lead_enrich_api::data::db_storage::{PgAccountStore, PgCacheStore};
use lead_enrich_api::db::Database;
use lead_enrich_api::models::{CompanyLink, DataSource, EnrichedPerson};

async fn connect() -> anyhow::Result<Database> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    Database::new(&db_url).await
}

/// Round-trips a person through the Postgres cache and searches it by domain.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn cache_roundtrip_smoke_test() -> anyhow::Result<()> {
    let db = connect().await?;
    let store = Arc::new(PgCacheStore::new(db.pool.clone(), create_db_circuit_breaker()));
    let cache = EnrichmentCache::new(store, 60);

    // Unique domain so repeated runs don't collide
    let domain = format!("smoke-{}.test", Uuid::new_v4().simple());
    let email = format!("jane@{}", domain);
    let person = EnrichedPerson {
        name: Some("Smoke Test".into()),
        email: Some(email.clone()),
        emails: vec![],
        profile: None,
        company: Some(CompanyLink {
            domain: domain.clone(),
            name: None,
            confidence: 0.7,
        }),
        social: None,
        location: None,
        confidence_score: 0.42,
        data_sources: vec![DataSource::Activity],
        last_updated: Utc::now(),
    };

    let key = format!("email:{}", email);
    cache
        .put(&key, &person)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let cached: Option<EnrichedPerson> = cache.get(&key).await;
    assert_eq!(cached.map(|p| p.name), Some(Some("Smoke Test".to_string())));

    let found = cache
        .search_people(&domain, 10)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(found.len(), 1);

    let removed = cache
        .invalidate::<EnrichedPerson>(&key)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(removed, 1);
    Ok(())
}

/// Inserts a key, then charges and resets credits through the Postgres store.
#[tokio::test]
#[ignore]
async fn account_store_smoke_test() -> anyhow::Result<()> {
    let db = connect().await?;
    let accounts = PgAccountStore::new(db.pool.clone(), create_db_circuit_breaker());

    let raw = format!("api_test_{}", Uuid::new_v4().simple());
    let key = new_api_key(&raw, "free", 10, 100, 50, Utc::now());

    sqlx::query(
        r#"
        INSERT INTO api_keys (
            id, user_id, key_hash, key_prefix, tier, rate_limit_rpm, rate_limit_rpd,
            credits_limit, credits_used, credits_reset_at, created_at, revoked
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, FALSE)
        "#,
    )
    .bind(key.id)
    .bind(key.user_id)
    .bind(&key.key_hash)
    .bind(&key.key_prefix)
    .bind(&key.tier)
    .bind(key.rate_limit_rpm)
    .bind(key.rate_limit_rpd)
    .bind(key.credits_limit)
    .bind(key.credits_used)
    .bind(key.credits_reset_at)
    .bind(key.created_at)
    .execute(&db.pool)
    .await?;

    let err = |e: lead_enrich_api::errors::AppError| anyhow::anyhow!(e.to_string());

    accounts.add_credits_used(key.id, 3).await.map_err(err)?;
    let loaded = accounts
        .find_by_hash(&hash_api_key(&raw))
        .await
        .map_err(err)?
        .ok_or_else(|| anyhow::anyhow!("key not found"))?;
    assert_eq!(loaded.credits_used, 3);

    accounts
        .reset_credits(key.id, key.credits_reset_at)
        .await
        .map_err(err)?;
    let reset = accounts
        .find_by_hash(&hash_api_key(&raw))
        .await
        .map_err(err)?
        .ok_or_else(|| anyhow::anyhow!("key not found"))?;
    assert_eq!(reset.credits_used, 0);

    sqlx::query("DELETE FROM api_keys WHERE id = $1")
        .bind(key.id)
        .execute(&db.pool)
        .await?;
    Ok(())
}
