//! Column materializer: makes a list's declared columns exist.
//!
//! Purely additive. Existing columns keep their type, columns the registry
//! does not know about are left alone, and indexing is only ever turned on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ProvisionerConfig;
use crate::retry::{RetryPolicy, retry_async};
use crate::schema::ColumnDescriptor;
use crate::store::{
    ErrorClass, FieldDefinition, FieldInfo, FieldUpdate, ListHandle, SiteStore, StoreError,
    StoreResult,
};

/// What happened to the metadata of a freshly created column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataOutcome {
    /// Description and index flag were applied.
    Applied,
    /// The descriptor had nothing to apply.
    Skipped,
    /// The update failed. The column exists and is usable regardless.
    Failed { reason: String },
}

/// Per-column result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnOutcome {
    /// Already present under its internal or display name.
    Present,
    /// Created by this call.
    Created { metadata: MetadataOutcome },
    /// Already present; indexing was turned on.
    IndexApplied,
    /// Already present; turning on indexing failed.
    IndexFailed { reason: String },
    /// Could not be created.
    Failed { reason: String },
}

impl ColumnOutcome {
    /// Check if the column exists after the call.
    pub const fn exists(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Result of materializing one list's columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnReport {
    /// Outcomes keyed by internal name, in declaration order.
    pub columns: Vec<(String, ColumnOutcome)>,
}

impl ColumnReport {
    /// Outcome for a column.
    pub fn outcome(&self, internal_name: &str) -> Option<&ColumnOutcome> {
        self.columns
            .iter()
            .find(|(name, _)| name == internal_name)
            .map(|(_, outcome)| outcome)
    }

    /// Number of columns created by this call.
    pub fn created(&self) -> usize {
        self.columns
            .iter()
            .filter(|(_, o)| matches!(o, ColumnOutcome::Created { .. }))
            .count()
    }
}

/// Fields already on a list, addressable by either of their names.
pub(crate) struct ExistingFields {
    by_internal: HashMap<String, FieldInfo>,
    by_display: HashMap<String, FieldInfo>,
}

impl ExistingFields {
    pub(crate) fn new(fields: Vec<FieldInfo>) -> Self {
        let by_display = fields
            .iter()
            .map(|f| (f.display_name.to_lowercase(), f.clone()))
            .collect();
        let by_internal = fields
            .into_iter()
            .map(|f| (f.internal_name.to_lowercase(), f))
            .collect();
        Self {
            by_internal,
            by_display,
        }
    }

    pub(crate) fn find(&self, column: &ColumnDescriptor) -> Option<&FieldInfo> {
        [&column.internal_name, &column.display_name]
            .into_iter()
            .map(|name| name.to_lowercase())
            .find_map(|key| self.by_internal.get(&key).or_else(|| self.by_display.get(&key)))
    }

    fn insert(&mut self, column: &ColumnDescriptor) {
        let info = FieldInfo {
            internal_name: column.internal_name.clone(),
            display_name: column.display_name.clone(),
            indexed: column.indexed,
        };
        self.by_display
            .insert(info.display_name.to_lowercase(), info.clone());
        self.by_internal
            .insert(info.internal_name.to_lowercase(), info);
    }
}

/// Ensures columns exist on lists.
pub struct ColumnMaterializer {
    store: Arc<dyn SiteStore>,
    retry: RetryPolicy,
    settle_delay: Duration,
    /// Lowercased titles a lookup may point at. `None` allows any list.
    lookup_targets: Option<HashSet<String>>,
}

impl ColumnMaterializer {
    /// Create a materializer over `store`.
    pub fn new(store: Arc<dyn SiteStore>, config: &ProvisionerConfig) -> Self {
        Self {
            store,
            retry: config.retry.clone(),
            settle_delay: config.column_settle_delay,
            lookup_targets: None,
        }
    }

    /// Only allow lookups into the given lists.
    ///
    /// A lookup column pointing anywhere else fails without touching the
    /// store.
    #[must_use]
    pub fn with_lookup_targets<I, S>(mut self, titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.lookup_targets = Some(
            titles
                .into_iter()
                .map(|title| title.as_ref().to_lowercase())
                .collect(),
        );
        self
    }

    /// Make sure every column in `columns` exists on `list`.
    ///
    /// `known_lists` maps list titles to handles and is used to resolve
    /// lookup targets; titles missing from it are fetched from the store.
    /// Per-column failures are logged and reported, never returned.
    ///
    /// # Errors
    ///
    /// Returns an error only if the list's fields cannot be enumerated.
    pub async fn ensure_columns(
        &self,
        list: &ListHandle,
        columns: &[ColumnDescriptor],
        known_lists: &HashMap<String, ListHandle>,
    ) -> StoreResult<ColumnReport> {
        let fields = retry_async(
            &self.retry,
            "list_fields",
            || self.store.list_fields(list),
            StoreError::is_transient,
        )
        .await?;
        let mut existing = ExistingFields::new(fields);
        let mut report = ColumnReport::default();

        for column in columns {
            if column.is_title() {
                debug!(list = %list.title, "Skipping implicit title column");
                continue;
            }

            let outcome = match existing.find(column).cloned() {
                Some(field) => self.refine_existing(list, column, &field).await,
                None => {
                    let outcome = self.create(list, column, known_lists).await;
                    if outcome.exists() {
                        existing.insert(column);
                    }
                    outcome
                }
            };

            report.columns.push((column.internal_name.clone(), outcome));
        }

        Ok(report)
    }

    async fn refine_existing(
        &self,
        list: &ListHandle,
        column: &ColumnDescriptor,
        field: &FieldInfo,
    ) -> ColumnOutcome {
        if !column.indexed || field.indexed {
            debug!(list = %list.title, column = %column.internal_name, "Column exists");
            return ColumnOutcome::Present;
        }

        match self
            .store
            .update_field(list, &field.internal_name, &FieldUpdate::index_only())
            .await
        {
            Ok(()) => {
                info!(list = %list.title, column = %field.internal_name, "Indexed existing column");
                ColumnOutcome::IndexApplied
            }
            Err(err) => {
                warn!(
                    list = %list.title,
                    column = %field.internal_name,
                    error = %err,
                    "Could not index existing column"
                );
                ColumnOutcome::IndexFailed {
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn create(
        &self,
        list: &ListHandle,
        column: &ColumnDescriptor,
        known_lists: &HashMap<String, ListHandle>,
    ) -> ColumnOutcome {
        let definition = match self.definition(column, known_lists).await {
            Ok(definition) => definition,
            Err(err) => {
                warn!(
                    list = %list.title,
                    column = %column.internal_name,
                    target = ?column.lookup_target(),
                    error = %err,
                    "Could not resolve lookup target"
                );
                return ColumnOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        };

        info!(
            list = %list.title,
            column = %column.internal_name,
            kind = %column.kind,
            "Creating column"
        );

        let created = retry_async(
            &self.retry,
            "create_field",
            || self.store.create_field(list, &definition),
            StoreError::is_transient,
        )
        .await;

        match created {
            Ok(()) => {
                if !self.settle_delay.is_zero() {
                    tokio::time::sleep(self.settle_delay).await;
                }
                let metadata = self.apply_metadata(list, column).await;
                ColumnOutcome::Created { metadata }
            }
            Err(err) if err.class() == ErrorClass::AlreadyExists => {
                debug!(list = %list.title, column = %column.internal_name, "Column created concurrently");
                ColumnOutcome::Present
            }
            Err(err) => {
                warn!(
                    list = %list.title,
                    column = %column.internal_name,
                    error = %err,
                    "Column creation failed"
                );
                ColumnOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn definition(
        &self,
        column: &ColumnDescriptor,
        known_lists: &HashMap<String, ListHandle>,
    ) -> StoreResult<FieldDefinition> {
        let Some(target) = column.lookup_target() else {
            return Ok(FieldDefinition::plain(column.clone()));
        };

        let key = target.to_lowercase();
        if self
            .lookup_targets
            .as_ref()
            .is_some_and(|allowed| !allowed.contains(&key))
        {
            return Err(StoreError::invalid_request(format!(
                "lookup target '{target}' is not a provisioned list"
            )));
        }

        let target_id = match known_lists.get(target) {
            Some(handle) => handle.id.clone(),
            None => {
                retry_async(
                    &self.retry,
                    "get_list",
                    || self.store.get_list(target),
                    StoreError::is_transient,
                )
                .await?
                .id
            }
        };

        Ok(FieldDefinition::lookup(column.clone(), target_id))
    }

    async fn apply_metadata(&self, list: &ListHandle, column: &ColumnDescriptor) -> MetadataOutcome {
        let update = FieldUpdate::from_column(column);
        if update.is_empty() {
            return MetadataOutcome::Skipped;
        }

        match self
            .store
            .update_field(list, &column.internal_name, &update)
            .await
        {
            Ok(()) => MetadataOutcome::Applied,
            Err(err) => {
                warn!(
                    list = %list.title,
                    column = %column.internal_name,
                    error = %err,
                    "Could not apply column metadata"
                );
                MetadataOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use super::*;
    use crate::memory::{MemoryStore, StoreOp};
    use crate::schema::{ColumnKind, ListTemplate};

    fn materializer(store: &Arc<MemoryStore>) -> ColumnMaterializer {
        let store: Arc<dyn SiteStore> = store.clone();
        ColumnMaterializer::new(store, &ProvisionerConfig::without_delays())
    }

    #[tokio::test]
    async fn test_creates_missing_columns_with_metadata() {
        let store = MemoryStore::new_arc();
        let list = store.insert_list("News", ListTemplate::GenericList).await;
        let columns = [
            ColumnDescriptor::multiline("NewsBody"),
            ColumnDescriptor::date_time("PublishDate")
                .described("When the article goes live")
                .indexed(),
        ];

        let report = materializer(&store)
            .ensure_columns(&list, &columns, &HashMap::new())
            .await
            .unwrap();

        assert_eq!(report.created(), 2);
        assert_eq!(
            report.outcome("NewsBody"),
            Some(&ColumnOutcome::Created {
                metadata: MetadataOutcome::Skipped
            })
        );
        assert_eq!(
            report.outcome("PublishDate"),
            Some(&ColumnOutcome::Created {
                metadata: MetadataOutcome::Applied
            })
        );

        let field = store.field("News", "PublishDate").await.unwrap();
        assert!(field.indexed);
        assert_eq!(field.description, "When the article goes live");
    }

    #[tokio::test]
    async fn test_title_column_is_skipped() {
        let store = MemoryStore::new_arc();
        let list = store.insert_list("News", ListTemplate::GenericList).await;

        let report = materializer(&store)
            .ensure_columns(&list, &[ColumnDescriptor::text("Title")], &HashMap::new())
            .await
            .unwrap();

        assert!(report.columns.is_empty());
        assert_eq!(store.count(StoreOp::CreateField).await, 0);
    }

    #[tokio::test]
    async fn test_existing_by_display_name_is_not_recreated() {
        let store = MemoryStore::new_arc();
        let list = store.insert_list("News", ListTemplate::GenericList).await;
        store.insert_field("News", "Body0", "Body", false).await;

        let report = materializer(&store)
            .ensure_columns(
                &list,
                &[ColumnDescriptor::multiline("NewsBody").titled("Body")],
                &HashMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcome("NewsBody"), Some(&ColumnOutcome::Present));
        assert_eq!(store.count(StoreOp::CreateField).await, 0);
    }

    #[tokio::test]
    async fn test_existing_match_is_case_insensitive() {
        let store = MemoryStore::new_arc();
        let list = store.insert_list("News", ListTemplate::GenericList).await;
        store.insert_field("News", "newsbody", "newsbody", false).await;

        let report = materializer(&store)
            .ensure_columns(&list, &[ColumnDescriptor::multiline("NewsBody")], &HashMap::new())
            .await
            .unwrap();

        assert_eq!(report.outcome("NewsBody"), Some(&ColumnOutcome::Present));
    }

    #[tokio::test]
    async fn test_existing_column_gets_index_but_keeps_type() {
        let store = MemoryStore::new_arc();
        let list = store.insert_list("Pages", ListTemplate::GenericList).await;
        store.insert_field("Pages", "PageSlug", "Page slug", false).await;

        let report = materializer(&store)
            .ensure_columns(
                &list,
                &[ColumnDescriptor::number("PageSlug").indexed()],
                &HashMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcome("PageSlug"), Some(&ColumnOutcome::IndexApplied));
        let field = store.field("Pages", "PageSlug").await.unwrap();
        assert!(field.indexed);
        assert_eq!(field.kind, None);
    }

    #[tokio::test]
    async fn test_lookup_resolves_target_id() {
        let store = MemoryStore::new_arc();
        let pages = store.insert_list("SmartPages", ListTemplate::GenericList).await;
        let events = store.insert_list("Events", ListTemplate::Events).await;
        let known = HashMap::from([(pages.title.clone(), pages.clone())]);

        let report = materializer(&store)
            .ensure_columns(
                &events,
                &[ColumnDescriptor::lookup("Page", "SmartPages")],
                &known,
            )
            .await
            .unwrap();

        assert_eq!(report.created(), 1);
        let field = store.field("Events", "Page").await.unwrap();
        assert_eq!(field.lookup_list_id.as_deref(), Some(pages.id.as_str()));
        assert!(matches!(field.kind, Some(ColumnKind::Lookup { .. })));
    }

    #[tokio::test]
    async fn test_lookup_target_fetched_when_unknown() {
        let store = MemoryStore::new_arc();
        let pages = store.insert_list("SmartPages", ListTemplate::GenericList).await;
        let events = store.insert_list("Events", ListTemplate::Events).await;

        materializer(&store)
            .ensure_columns(
                &events,
                &[ColumnDescriptor::lookup("Page", "SmartPages")],
                &HashMap::new(),
            )
            .await
            .unwrap();

        let field = store.field("Events", "Page").await.unwrap();
        assert_eq!(field.lookup_list_id, Some(pages.id));
    }

    #[tokio::test]
    async fn test_missing_lookup_target_fails_only_that_column() {
        let store = MemoryStore::new_arc();
        let events = store.insert_list("Events", ListTemplate::Events).await;

        let report = materializer(&store)
            .ensure_columns(
                &events,
                &[
                    ColumnDescriptor::lookup("Venue", "Venues"),
                    ColumnDescriptor::text("EventVenue"),
                ],
                &HashMap::new(),
            )
            .await
            .unwrap();

        assert!(matches!(
            report.outcome("Venue"),
            Some(ColumnOutcome::Failed { .. })
        ));
        assert!(matches!(
            report.outcome("EventVenue"),
            Some(ColumnOutcome::Created { .. })
        ));
    }

    #[tokio::test]
    async fn test_lookup_outside_allowed_targets_never_reaches_store() {
        let store = MemoryStore::new_arc();
        store.insert_list("External", ListTemplate::GenericList).await;
        let events = store.insert_list("Events", ListTemplate::Events).await;

        let report = materializer(&store)
            .with_lookup_targets(["Events", "SmartPages"])
            .ensure_columns(
                &events,
                &[
                    ColumnDescriptor::lookup("Ext", "External"),
                    ColumnDescriptor::lookup("Page", "smartpages"),
                ],
                &HashMap::new(),
            )
            .await
            .unwrap();

        match report.outcome("Ext") {
            Some(ColumnOutcome::Failed { reason }) => assert!(reason.contains("External")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(store.field("Events", "Ext").await.is_none());
        assert_eq!(store.count(StoreOp::CreateField).await, 0);
        // Only the allowed target was looked up, and it does not exist.
        let lookups: Vec<_> = store
            .operations()
            .await
            .into_iter()
            .filter(|record| record.op == StoreOp::GetList)
            .map(|record| record.target)
            .collect();
        assert_eq!(lookups, ["smartpages"]);
    }

    #[tokio::test]
    async fn test_transient_create_failure_is_retried() {
        let store = MemoryStore::new_arc();
        let list = store.insert_list("News", ListTemplate::GenericList).await;
        store
            .fail_next(
                StoreOp::CreateField,
                None,
                2,
                StoreError::conflict("field", "schema locked"),
            )
            .await;

        let report = materializer(&store)
            .ensure_columns(&list, &[ColumnDescriptor::boolean("Featured")], &HashMap::new())
            .await
            .unwrap();

        assert_eq!(report.created(), 1);
        assert_eq!(store.count(StoreOp::CreateField).await, 3);
    }

    #[tokio::test]
    async fn test_permanent_create_failure_aborts_only_that_column() {
        let store = MemoryStore::new_arc();
        let list = store.insert_list("News", ListTemplate::GenericList).await;
        store
            .fail_next(
                StoreOp::CreateField,
                Some("News/Featured"),
                1,
                StoreError::rejected(400, "invalid schema"),
            )
            .await;

        let report = materializer(&store)
            .ensure_columns(
                &list,
                &[
                    ColumnDescriptor::boolean("Featured"),
                    ColumnDescriptor::multiline("NewsBody"),
                ],
                &HashMap::new(),
            )
            .await
            .unwrap();

        assert!(matches!(
            report.outcome("Featured"),
            Some(ColumnOutcome::Failed { .. })
        ));
        assert_eq!(report.created(), 1);
        assert_eq!(store.count(StoreOp::CreateField).await, 2);
    }

    #[tokio::test]
    async fn test_metadata_failure_is_not_fatal() {
        let store = MemoryStore::new_arc();
        let list = store.insert_list("News", ListTemplate::GenericList).await;
        store
            .fail_always(StoreOp::UpdateField, None, StoreError::server(500, "boom"))
            .await;

        let report = materializer(&store)
            .ensure_columns(
                &list,
                &[ColumnDescriptor::text("Slug").indexed()],
                &HashMap::new(),
            )
            .await
            .unwrap();

        let outcome = report.outcome("Slug").unwrap();
        assert!(outcome.exists());
        assert!(matches!(
            outcome,
            ColumnOutcome::Created {
                metadata: MetadataOutcome::Failed { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_field_enumeration_failure_is_returned() {
        let store = MemoryStore::new_arc();
        let list = store.insert_list("News", ListTemplate::GenericList).await;
        store
            .fail_always(StoreOp::ListFields, None, StoreError::rejected(403, "denied"))
            .await;

        let result = materializer(&store)
            .ensure_columns(&list, &[ColumnDescriptor::text("Slug")], &HashMap::new())
            .await;

        assert!(result.is_err());
    }
}
