//! Lead Enrichment API Library
//!
//! Enriches a partial identity (email, handle, domain) or a company
//! descriptor into a best-effort profile with a calibrated confidence score,
//! backed by a TTL cache and per-key rate and credit quotas.
//!
//! # Modules
//!
//! - `api`: HTTP handlers and middleware.
//! - `core`: Aggregation, scoring, caching and quota logic.
//! - `data`: Raw-record store and Postgres persistence.
//! - `integrations`: Source adapters over the raw-record store.
//! - `obs`: Observability and logging.
//! - `accounts`: API key authentication and usage bookkeeping.
//! - `aggregator`: Enrichment fan-out, merge and write-back.
//! - `cache`: Cache key derivation and TTL-bounded entity cache.
//! - `cache_validator`: Checksummed cache payloads.
//! - `circuit_breaker`: Circuit breaker for database calls.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Postgres cache and account stores.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers and router.
//! - `limiter`: Fixed-window rate limits and monthly credits.
//! - `middleware`: Authentication and quota middleware.
//! - `models`: Entities, requests and responses.
//! - `profile_source`: Profile, activity and directory adapters.
//! - `raw_store`: Raw-record store access.
//! - `registration_source`: Domain registration adapter.
//! - `scoring`: Confidence scoring and email merging.
//! - `validation`: Request validation and domain helpers.

pub mod api;
pub mod core;
pub mod data;
pub mod integrations;
pub mod obs;

// Re-export primary modules for shared use in tests and other binaries
pub mod accounts;
pub mod aggregator;
pub mod cache;
pub mod cache_validator;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod limiter;
pub mod middleware;
pub mod models;
pub mod profile_source;
pub mod raw_store;
pub mod registration_source;
pub mod scoring;
pub mod validation;
