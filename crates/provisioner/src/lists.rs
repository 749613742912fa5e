//! Resource materializer: makes a single list exist.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ProvisionerConfig;
use crate::retry::{RetryPolicy, retry_async};
use crate::schema::ListDescriptor;
use crate::store::{ErrorClass, ListHandle, SiteStore, StoreError, StoreResult};

/// A list that is known to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOutcome {
    pub handle: ListHandle,
    /// Whether this call created it.
    pub created: bool,
}

/// Ensures lists exist, creating them when absent.
pub struct ListMaterializer {
    store: Arc<dyn SiteStore>,
    retry: RetryPolicy,
    settle_delay: Duration,
}

impl ListMaterializer {
    /// Create a materializer over `store`.
    pub fn new(store: Arc<dyn SiteStore>, config: &ProvisionerConfig) -> Self {
        Self {
            store,
            retry: config.retry.clone(),
            settle_delay: config.list_settle_delay,
        }
    }

    /// Make sure the list described by `descriptor` exists.
    ///
    /// Transient failures at fetch or create are retried with backoff.
    ///
    /// # Errors
    ///
    /// Returns the last store error once retries are exhausted, or the first
    /// permanent error.
    pub async fn ensure_list(&self, descriptor: &ListDescriptor) -> StoreResult<ListOutcome> {
        retry_async(
            &self.retry,
            "ensure_list",
            || self.attempt(descriptor),
            StoreError::is_transient,
        )
        .await
    }

    /// Fetch an existing list by title, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the last store error.
    pub async fn fetch(&self, title: &str) -> StoreResult<ListHandle> {
        retry_async(
            &self.retry,
            "get_list",
            || self.store.get_list(title),
            StoreError::is_transient,
        )
        .await
    }

    async fn attempt(&self, descriptor: &ListDescriptor) -> StoreResult<ListOutcome> {
        let title = descriptor.title.as_str();

        match self.store.get_list(title).await {
            Ok(handle) => {
                debug!(list = title, id = %handle.id, "List exists");
                return Ok(ListOutcome {
                    handle,
                    created: false,
                });
            }
            Err(err) if err.class() == ErrorClass::NotFound => {}
            Err(err) => return Err(err),
        }

        info!(list = title, template = %descriptor.template, "Creating list");

        match self
            .store
            .create_list(title, descriptor.template, &descriptor.description)
            .await
        {
            Ok(handle) => {
                if let Err(err) = self.store.enable_versioning(&handle).await {
                    warn!(list = title, error = %err, "Could not enable versioning");
                }
                if !self.settle_delay.is_zero() {
                    tokio::time::sleep(self.settle_delay).await;
                }
                info!(list = title, id = %handle.id, "List created");
                Ok(ListOutcome {
                    handle,
                    created: true,
                })
            }
            Err(err) if err.class() == ErrorClass::AlreadyExists => {
                info!(list = title, "List was created concurrently, adopting it");
                // The winner's list may not be readable yet.
                let handle = retry_async(
                    &self.retry,
                    "adopt_list",
                    || self.store.get_list(title),
                    |e| e.is_transient() || e.is_not_found(),
                )
                .await?;
                Ok(ListOutcome {
                    handle,
                    created: false,
                })
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::memory::{MemoryStore, StoreOp};
    use crate::schema::ListTemplate;

    fn materializer(store: &Arc<MemoryStore>) -> ListMaterializer {
        let store: Arc<dyn SiteStore> = store.clone();
        ListMaterializer::new(store, &ProvisionerConfig::without_delays())
    }

    #[tokio::test]
    async fn test_existing_list_is_not_touched() {
        let store = MemoryStore::new_arc();
        store.insert_list("News", ListTemplate::GenericList).await;

        let outcome = materializer(&store)
            .ensure_list(&ListDescriptor::new("News", ListTemplate::GenericList))
            .await
            .unwrap();

        assert!(!outcome.created);
        assert!(store.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_list_is_created_with_versioning() {
        let store = MemoryStore::new_arc();

        let outcome = materializer(&store)
            .ensure_list(&ListDescriptor::new("Events", ListTemplate::Events))
            .await
            .unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.handle.template, ListTemplate::Events.id());
        assert!(store.versioning_enabled("Events").await);
    }

    #[tokio::test]
    async fn test_creation_race_is_treated_as_success() {
        let store = MemoryStore::new_arc();
        store.race_next_create("News").await;

        let outcome = materializer(&store)
            .ensure_list(&ListDescriptor::new("News", ListTemplate::GenericList))
            .await
            .unwrap();

        assert!(!outcome.created);
        assert_eq!(outcome.handle.title, "News");
    }

    #[tokio::test]
    async fn test_raced_list_is_adopted_once_visible() {
        let store = MemoryStore::new_arc();
        store.race_next_create("News").await;
        // Initial lookup, then one read that lags behind the racing create.
        store
            .fail_next(
                StoreOp::GetList,
                Some("News"),
                2,
                StoreError::not_found("list 'News'"),
            )
            .await;

        let outcome = materializer(&store)
            .ensure_list(&ListDescriptor::new("News", ListTemplate::GenericList))
            .await
            .unwrap();

        assert!(!outcome.created);
        assert_eq!(outcome.handle.title, "News");
        assert_eq!(store.count(StoreOp::CreateList).await, 1);
        assert_eq!(store.count(StoreOp::GetList).await, 3);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = MemoryStore::new_arc();
        store
            .fail_next(StoreOp::CreateList, None, 2, StoreError::server(503, "busy"))
            .await;

        let outcome = materializer(&store)
            .ensure_list(&ListDescriptor::new("News", ListTemplate::GenericList))
            .await
            .unwrap();

        assert!(outcome.created);
        assert_eq!(store.count(StoreOp::CreateList).await, 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let store = MemoryStore::new_arc();
        store
            .fail_always(StoreOp::GetList, None, StoreError::network("unreachable"))
            .await;

        let result = materializer(&store)
            .ensure_list(&ListDescriptor::new("News", ListTemplate::GenericList))
            .await;

        assert_eq!(result, Err(StoreError::network("unreachable")));
        assert_eq!(store.count(StoreOp::GetList).await, 3);
        assert_eq!(store.count(StoreOp::CreateList).await, 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let store = MemoryStore::new_arc();
        store
            .fail_always(
                StoreOp::CreateList,
                None,
                StoreError::rejected(400, "invalid template"),
            )
            .await;

        let result = materializer(&store)
            .ensure_list(&ListDescriptor::new("News", ListTemplate::GenericList))
            .await;

        assert!(result.is_err());
        assert_eq!(store.count(StoreOp::CreateList).await, 1);
    }
}
