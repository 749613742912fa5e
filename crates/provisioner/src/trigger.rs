//! Read path helper that provisions on a missing resource.

use std::future::Future;

use tracing::{info, warn};

use crate::guard::ProvisionGuard;
use crate::store::StoreResult;

/// Run `read`; if it reports a missing resource, provision through `guard`
/// and retry the read once.
///
/// # Errors
///
/// Returns the retried read's error, or the original error if the read
/// failed for another reason or provisioning itself failed.
pub async fn read_or_provision<T, F, Fut>(guard: &ProvisionGuard, mut read: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let err = match read().await {
        Err(err) if err.is_not_found() => err,
        other => return other,
    };

    info!(error = %err, "Resource missing, provisioning site");
    match guard.ensure_provisioned().await {
        Ok(_) => read().await,
        Err(provision_err) => {
            warn!(error = %provision_err, "Provisioning failed, giving up on read");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::config::ProvisionerConfig;
    use crate::error::{ProvisionError, Result};
    use crate::guard::GuardPhase;
    use crate::memory::{MemoryStore, StoreOp};
    use crate::orchestrator::{ConvergenceRunner, OrchestratorBuilder};
    use crate::registry::NEWS;
    use crate::report::ConvergenceReport;
    use crate::schema::ListTemplate;
    use crate::seed::SeedCatalog;
    use crate::store::{SiteStore, StoreError};

    struct Failing;

    #[async_trait]
    impl ConvergenceRunner for Failing {
        async fn run(&self) -> Result<ConvergenceReport> {
            Err(ProvisionError::aborted("unreachable site"))
        }
    }

    fn guard(store: &Arc<MemoryStore>) -> ProvisionGuard {
        let store: Arc<dyn SiteStore> = store.clone();
        let orchestrator = OrchestratorBuilder::new()
            .with_store(store)
            .with_seeds(SeedCatalog::default())
            .with_config(ProvisionerConfig::without_delays())
            .build()
            .unwrap();
        ProvisionGuard::new(Arc::new(orchestrator))
    }

    #[tokio::test]
    async fn test_missing_list_is_provisioned_then_read() {
        let store = MemoryStore::new_arc();
        let guard = guard(&store);

        let handle = read_or_provision(&guard, || store.get_list(NEWS)).await.unwrap();

        assert_eq!(handle.title, NEWS);
        assert!(store.handle(NEWS).await.is_some());
    }

    #[tokio::test]
    async fn test_successful_read_does_not_provision() {
        let store = MemoryStore::new_arc();
        store.insert_list(NEWS, ListTemplate::GenericList).await;
        let guard = guard(&store);

        read_or_provision(&guard, || store.get_list(NEWS)).await.unwrap();

        assert!(store.mutations().await.is_empty());
        assert_eq!(guard.phase().await, GuardPhase::Idle);
    }

    #[tokio::test]
    async fn test_other_errors_pass_through() {
        let store = MemoryStore::new_arc();
        store
            .fail_always(StoreOp::GetList, None, StoreError::server(500, "down"))
            .await;
        let guard = guard(&store);

        let result = read_or_provision(&guard, || store.get_list(NEWS)).await;

        assert_eq!(result, Err(StoreError::server(500, "down")));
        assert!(store.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_provisioning_returns_original_error() {
        let store = MemoryStore::new_arc();
        let guard = ProvisionGuard::new(Arc::new(Failing));

        let result = read_or_provision(&guard, || store.get_list(NEWS)).await;

        assert!(result.is_err_and(|e| e.is_not_found()));
        assert_eq!(store.count(StoreOp::GetList).await, 1);
    }
}
