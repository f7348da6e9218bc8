use crate::errors::AppError;
use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{Config, StateMachine};
use std::future::Future;
use std::time::Duration;

/// Circuit breaker shared by the Postgres-backed stores.
pub type DbCircuitBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Creates a circuit breaker for database operations to prevent cascading failures.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, requests pass through.
/// - **OPEN**: Too many failures, requests fail fast.
/// - **HALF_OPEN**: Testing if service recovered.
pub fn create_db_circuit_breaker() -> DbCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

/// Runs a database call through the breaker.
///
/// While the circuit is open the call is not attempted and a
/// `database_error` is returned immediately.
pub async fn guarded<T, F>(breaker: &DbCircuitBreaker, what: &str, call: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    use failsafe::futures::CircuitBreaker;

    match breaker.call(call).await {
        Ok(value) => Ok(value),
        Err(failsafe::Error::Inner(e)) => Err(AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: what.to_string(),
        }),
        Err(failsafe::Error::Rejected) => {
            tracing::warn!("Database circuit open, rejected {}", what);
            Err(AppError::WithContext {
                source: Box::new(AppError::DatabaseError(sqlx::Error::Protocol(
                    "circuit breaker open".to_string(),
                ))),
                context: what.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::{CircuitBreaker, Error};

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = create_db_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("simulated error"));
            assert!(result.is_err());
        }

        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));
        assert!(matches!(result, Err(Error::Rejected)));
    }

    #[tokio::test]
    async fn test_guarded_passes_value_through() {
        let cb = create_db_circuit_breaker();
        let value = guarded(&cb, "select", async { Ok::<i32, sqlx::Error>(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_guarded_rejects_when_open() {
        let cb = create_db_circuit_breaker();

        for _ in 0..5 {
            let result = guarded(&cb, "insert", async {
                Err::<(), sqlx::Error>(sqlx::Error::PoolTimedOut)
            })
            .await;
            assert!(result.is_err());
        }

        let err = guarded(&cb, "insert", async { Ok::<(), sqlx::Error>(()) })
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "database_error");
        assert!(err.to_string().contains("circuit breaker open"));
    }
}
