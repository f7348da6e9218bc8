use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application-specific error types.
///
/// Adapter failures never reach this type at request level: the aggregator
/// absorbs them. What surfaces here is caller error, quota denial, or a
/// persistence failure on the write-back path.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Resource not found error (ancillary lookups only).
    NotFound(String),
    /// Malformed or missing request fields.
    BadRequest(String),
    /// Error interacting with an external store or API.
    ExternalApiError(String),
    /// Internal server error.
    InternalError(String),
    /// Missing, malformed, expired or revoked API key.
    Unauthorized(String),
    /// Minute or day window exhausted.
    RateLimited {
        message: String,
        /// Seconds until the window resets.
        retry_after: u64,
    },
    /// Monthly credits exhausted.
    InsufficientCredits {
        message: String,
        /// Unix timestamp of the next credit reset.
        reset_at: i64,
    },
    /// An operation exceeded its deadline.
    Timeout(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Machine-readable error type used in response bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::DatabaseError(_) => "database_error",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "validation_error",
            AppError::ExternalApiError(_) => "external_api_error",
            AppError::InternalError(_) => "internal_error",
            AppError::Unauthorized(_) => "authentication_error",
            AppError::RateLimited { .. } => "rate_limit_error",
            AppError::InsufficientCredits { .. } => "insufficient_credits",
            AppError::Timeout(_) => "timeout_error",
            AppError::WithContext { source, .. } => source.error_type(),
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::DatabaseError(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ExternalApiError(_) => StatusCode::BAD_GATEWAY,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::WithContext { source, .. } => source.status_code(),
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::RateLimited { message, .. } => write!(f, "Rate limited: {}", message),
            AppError::InsufficientCredits { message, .. } => {
                write!(f, "Insufficient credits: {}", message)
            }
            AppError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error variant to an appropriate HTTP status code and JSON body.
    /// Internal details of persistence failures are logged, not returned.
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();

        let (message, retry_after, reset_at) = match &self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                ("Database operation failed".to_string(), None, None)
            }
            AppError::NotFound(msg) => (msg.clone(), None, None),
            AppError::BadRequest(msg) => (msg.clone(), None, None),
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                ("External service error".to_string(), None, None)
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                ("Internal server error".to_string(), None, None)
            }
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized access: {}", msg);
                (msg.clone(), None, None)
            }
            AppError::RateLimited {
                message,
                retry_after,
            } => (message.clone(), Some(*retry_after), None),
            AppError::InsufficientCredits { message, reset_at } => {
                (message.clone(), None, Some(*reset_at))
            }
            AppError::Timeout(msg) => {
                tracing::warn!("Timeout: {}", msg);
                ("Request timed out".to_string(), None, None)
            }
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                // Delegate to underlying error's response
                return source.clone().into_response();
            }
        };

        let mut error = json!({
            "type": error_type,
            "message": message,
        });
        if let Some(secs) = retry_after {
            error["retry_after"] = json!(secs);
        }
        if let Some(ts) = reset_at {
            error["reset_at"] = json!(ts);
        }

        let mut response = (status, Json(json!({ "error": error }))).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

// Make AppError cloneable for WithContext variant
impl Clone for AppError {
    /// Clones the error.
    ///
    /// Note: `sqlx::Error` is not cloneable, so `DatabaseError` is simplified to `PoolClosed` during cloning.
    fn clone(&self) -> Self {
        match self {
            AppError::DatabaseError(_e) => AppError::DatabaseError(sqlx::Error::PoolClosed),
            AppError::NotFound(msg) => AppError::NotFound(msg.clone()),
            AppError::BadRequest(msg) => AppError::BadRequest(msg.clone()),
            AppError::ExternalApiError(msg) => AppError::ExternalApiError(msg.clone()),
            AppError::InternalError(msg) => AppError::InternalError(msg.clone()),
            AppError::Unauthorized(msg) => AppError::Unauthorized(msg.clone()),
            AppError::RateLimited {
                message,
                retry_after,
            } => AppError::RateLimited {
                message: message.clone(),
                retry_after: *retry_after,
            },
            AppError::InsufficientCredits { message, reset_at } => {
                AppError::InsufficientCredits {
                    message: message.clone(),
                    reset_at: *reset_at,
                }
            }
            AppError::Timeout(msg) => AppError::Timeout(msg.clone()),
            AppError::WithContext { source, context } => AppError::WithContext {
                source: source.clone(),
                context: context.clone(),
            },
        }
    }
}

impl From<sqlx::Error> for AppError {
    /// Converts a `sqlx::Error` into an `AppError`.
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

impl From<reqwest::Error> for AppError {
    /// Converts a `reqwest::Error` into an `AppError`.
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout(err.to_string())
        } else {
            AppError::ExternalApiError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalError(format!("Serialization failed: {}", err))
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: f(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_types_follow_taxonomy() {
        assert_eq!(
            AppError::BadRequest("x".into()).error_type(),
            "validation_error"
        );
        assert_eq!(
            AppError::Unauthorized("x".into()).error_type(),
            "authentication_error"
        );
        assert_eq!(
            AppError::InsufficientCredits {
                message: "x".into(),
                reset_at: 0
            }
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
    }

    #[test]
    fn test_context_preserves_inner_status() {
        let err: Result<(), AppError> = Err(AppError::RateLimited {
            message: "slow down".into(),
            retry_after: 12,
        });
        let wrapped = err.context("checking quota").unwrap_err();

        assert_eq!(wrapped.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(wrapped.error_type(), "rate_limit_error");
        assert!(wrapped.to_string().starts_with("checking quota"));
    }

    #[test]
    fn test_rate_limited_response_sets_retry_after() {
        let response = AppError::RateLimited {
            message: "Rate limit exceeded".into(),
            retry_after: 42,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "42"
        );
    }
}
