//! Observability: tracing setup and best-effort background side effects.

use crate::errors::AppError;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global tracing subscriber (`RUST_LOG` or the crate default).
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lead_enrich_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Runs a side effect in the background.
///
/// The caller never waits on it and its failure is only logged, so it cannot
/// affect the response being served. The handle is returned for tests.
pub fn spawn_best_effort<F>(what: &'static str, task: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), AppError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = task.await {
            tracing::warn!("Best-effort task '{}' failed: {}", what, e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_side_effect_is_swallowed() {
        let handle = spawn_best_effort("failing", async {
            Err(AppError::InternalError("boom".into()))
        });
        assert!(handle.await.is_ok());
    }
}
