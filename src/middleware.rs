//! Request middleware for the authenticated API: API key resolution and
//! rate/credit quota enforcement.

use crate::accounts::authenticate;
use crate::errors::AppError;
use crate::handlers::AppState;
use crate::limiter::{check_credits, CreditInfo, RateLimitInfo};
use crate::models::ApiKey;
use crate::obs;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;

/// Resolves the bearer token and stores the [`ApiKey`] in the request
/// extensions. Rejects before any handler work happens.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let api_key = authenticate(&state.accounts, authorization.as_deref(), Utc::now()).await?;
    req.extensions_mut().insert(api_key);

    Ok(next.run(req).await)
}

/// Checks the minute/day windows and the credit balance before the handler,
/// and counts the request against both windows after a 2xx response.
pub async fn enforce_quota(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(api_key) = req.extensions().get::<ApiKey>().cloned() else {
        return AppError::Unauthorized("Missing API key".to_string()).into_response();
    };
    let now = Utc::now();

    let rate = match state.limiter.check(&api_key, now).await {
        Ok(info) => info,
        Err(e) => {
            let retry_after = match &e {
                AppError::RateLimited { retry_after, .. } => *retry_after as i64,
                _ => 0,
            };
            tracing::info!("Rate limit hit for key {}", api_key.key_prefix);

            let mut response = e.into_response();
            set_rate_headers(
                response.headers_mut(),
                &RateLimitInfo {
                    limit: i64::from(api_key.rate_limit_rpm),
                    remaining: 0,
                    reset: now.timestamp() + retry_after,
                },
            );
            return response;
        }
    };

    let credits = match check_credits(&api_key, now) {
        Ok(grant) => grant,
        Err(e) => {
            tracing::info!("Credits exhausted for key {}", api_key.key_prefix);

            let mut response = e.into_response();
            set_rate_headers(response.headers_mut(), &rate);
            set_credit_headers(
                response.headers_mut(),
                &CreditInfo {
                    limit: api_key.credits_limit,
                    used: api_key.credits_used,
                    remaining: 0,
                    reset: api_key.credits_reset_at.timestamp(),
                },
            );
            return response;
        }
    };

    if let Some(next_reset) = credits.reset_to {
        tracing::info!(
            "Monthly credits reset for key {} (next reset {})",
            api_key.key_prefix,
            next_reset
        );
        if let Err(e) = state.accounts.reset_credits(api_key.id, next_reset).await {
            return e.into_response();
        }
    }

    let mut response = next.run(req).await;
    set_rate_headers(response.headers_mut(), &rate);
    set_credit_headers(response.headers_mut(), &credits.info);

    if response.status().is_success() {
        let limiter = state.limiter.clone();
        let id = api_key.id;
        obs::spawn_best_effort("rate limit counters", async move {
            limiter.record(id, now).await
        });
    }

    response
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: impl ToString) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

fn set_rate_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    set_header(headers, "x-ratelimit-limit", info.limit);
    set_header(headers, "x-ratelimit-remaining", info.remaining);
    set_header(headers, "x-ratelimit-reset", info.reset);
}

fn set_credit_headers(headers: &mut HeaderMap, info: &CreditInfo) {
    set_header(headers, "x-credits-limit", info.limit);
    set_header(headers, "x-credits-used", info.used);
    set_header(headers, "x-credits-remaining", info.remaining);
    set_header(headers, "x-credits-reset", info.reset);
}
