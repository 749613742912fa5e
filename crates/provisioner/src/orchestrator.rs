//! Convergence orchestrator.
//!
//! A run walks the registry in three phases:
//!
//! 1. **Lists** - every list is materialized, independently of the others.
//! 2. **Columns** - columns are materialized on every list that exists. All
//!    lists are present by now, so lookups resolve regardless of the order
//!    lists were declared in.
//! 3. **Data** - the shared asset is ensured and empty lists are seeded.
//!
//! A failure on one resource is logged, recorded in the report and skipped.
//! Resources that depend on a failed list are skipped with it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::columns::{ColumnMaterializer, ColumnOutcome, ExistingFields, MetadataOutcome};
use crate::config::ProvisionerConfig;
use crate::error::{ProvisionError, Result};
use crate::lists::ListMaterializer;
use crate::report::{ConvergenceReport, ProvisionAction};
use crate::retry::retry_async;
use crate::schema::SchemaRegistry;
use crate::seed::{AssetOutcome, SeedCatalog, SeedDataset, SeedLoader, SeedOutcome};
use crate::store::{AssetRef, ListHandle, SiteStore, StoreError};

/// Anything that can perform one full convergence run.
#[async_trait]
pub trait ConvergenceRunner: Send + Sync {
    /// Perform one run.
    async fn run(&self) -> Result<ConvergenceReport>;
}

/// Drives a site towards the registry.
pub struct Orchestrator {
    store: Arc<dyn SiteStore>,
    registry: Arc<SchemaRegistry>,
    seeds: SeedCatalog,
    config: ProvisionerConfig,
}

impl Orchestrator {
    /// Create an orchestrator.
    pub fn new(
        store: Arc<dyn SiteStore>,
        registry: Arc<SchemaRegistry>,
        seeds: SeedCatalog,
        config: ProvisionerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            seeds,
            config,
        }
    }

    /// Orchestrator for the standard registry and seed catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded seed data does not parse.
    pub fn standard(store: Arc<dyn SiteStore>, config: ProvisionerConfig) -> Result<Self> {
        OrchestratorBuilder::new()
            .with_store(store)
            .with_config(config)
            .build()
    }

    /// The lists and columns this orchestrator converges to.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Retry, delay and seeding settings in effect.
    pub const fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Run all three phases once.
    pub async fn converge(&self) -> ConvergenceReport {
        let mut report = ConvergenceReport::new(self.registry.len());

        for issue in self.registry.validate() {
            warn!(issue = %issue, "Schema registry issue");
        }

        info!(
            lists = self.registry.len(),
            columns = self.registry.column_count(),
            "Starting convergence"
        );

        let mut known = self.converge_lists(&mut report).await;
        report.materialized_lists = known.len();

        self.converge_columns(&mut known, &mut report).await;

        if self.config.seed {
            self.converge_data(&known, &mut report).await;
        } else {
            debug!("Seeding disabled");
        }

        report.finish();
        info!(
            taken = report.actions_taken.len(),
            failed = report.actions_failed.len(),
            materialized = report.materialized_lists,
            desired = report.desired_lists,
            "Convergence finished"
        );
        report
    }

    async fn converge_lists(&self, report: &mut ConvergenceReport) -> HashMap<String, ListHandle> {
        let materializer = ListMaterializer::new(self.store.clone(), &self.config);
        let mut known = HashMap::new();

        for descriptor in self.registry.lists() {
            let action = ProvisionAction::CreateList {
                list: descriptor.title.clone(),
                template: descriptor.template,
            };

            match materializer.ensure_list(descriptor).await {
                Ok(outcome) => {
                    if outcome.created {
                        report.taken(action);
                    }
                    known.insert(descriptor.title.clone(), outcome.handle);
                }
                Err(err) => {
                    warn!(list = %descriptor.title, error = %err, "Skipping list");
                    report.failed(action, err.to_string());
                }
            }
        }

        known
    }

    async fn converge_columns(
        &self,
        known: &mut HashMap<String, ListHandle>,
        report: &mut ConvergenceReport,
    ) {
        let lists = ListMaterializer::new(self.store.clone(), &self.config);
        let materializer = ColumnMaterializer::new(self.store.clone(), &self.config)
            .with_lookup_targets(self.registry.lists().iter().map(|list| &list.title));

        for descriptor in self.registry.lists() {
            let handle = match known.get(&descriptor.title) {
                Some(handle) => handle.clone(),
                None => match lists.fetch(&descriptor.title).await {
                    Ok(handle) => {
                        debug!(list = %descriptor.title, "Recovered list handle");
                        known.insert(descriptor.title.clone(), handle.clone());
                        handle
                    }
                    Err(err) => {
                        debug!(list = %descriptor.title, error = %err, "List unavailable, skipping columns");
                        continue;
                    }
                },
            };

            let columns = match materializer
                .ensure_columns(&handle, &descriptor.columns, known)
                .await
            {
                Ok(columns) => columns,
                Err(err) => {
                    warn!(list = %descriptor.title, error = %err, "Could not read list fields");
                    report.failed(
                        ProvisionAction::EnsureColumns {
                            list: descriptor.title.clone(),
                        },
                        err.to_string(),
                    );
                    continue;
                }
            };

            for (column, outcome) in columns.columns {
                record_column(report, &descriptor.title, column, outcome);
            }
        }
    }

    async fn converge_data(&self, known: &HashMap<String, ListHandle>, report: &mut ConvergenceReport) {
        let loader = SeedLoader::new(self.store.clone(), &self.config);
        let asset = self.ensure_asset(&loader, known, report).await;

        for dataset in &self.seeds.datasets {
            let Some(list) = known.get(&dataset.list) else {
                if self.registry.get(&dataset.list).is_none() {
                    warn!(list = %dataset.list, "Seed data for a list outside the registry");
                }
                continue;
            };

            self.seed_list(&loader, list, dataset, asset.as_ref(), report)
                .await;
        }
    }

    async fn ensure_asset(
        &self,
        loader: &SeedLoader,
        known: &HashMap<String, ListHandle>,
        report: &mut ConvergenceReport,
    ) -> Option<AssetRef> {
        let asset = self.seeds.asset.as_ref()?;
        let Some(library) = known.get(&asset.library) else {
            debug!(library = %asset.library, "Asset library not materialized");
            return None;
        };

        let action = ProvisionAction::UploadAsset {
            library: asset.library.clone(),
            file_name: asset.file_name.clone(),
        };

        match loader.ensure_asset(library, asset).await {
            Ok(outcome) => {
                if matches!(outcome, AssetOutcome::Uploaded(_)) {
                    report.taken(action);
                }
                Some(outcome.asset().clone())
            }
            Err(err) => {
                warn!(library = %asset.library, error = %err, "Default asset unavailable");
                report.failed(action, err.to_string());
                None
            }
        }
    }

    async fn seed_list(
        &self,
        loader: &SeedLoader,
        list: &ListHandle,
        dataset: &SeedDataset,
        asset: Option<&AssetRef>,
        report: &mut ConvergenceReport,
    ) {
        match loader.seed(list, dataset, asset).await {
            Ok(SeedOutcome::AlreadyPopulated { .. }) => {}
            Ok(SeedOutcome::Seeded { inserted, failed }) => {
                if inserted > 0 {
                    report.taken(ProvisionAction::SeedList {
                        list: list.title.clone(),
                        rows: inserted,
                    });
                }
                if failed > 0 {
                    report.failed(
                        ProvisionAction::SeedList {
                            list: list.title.clone(),
                            rows: failed,
                        },
                        format!("{failed} of {} rows rejected", dataset.rows.len()),
                    );
                }
            }
            Err(err) => {
                warn!(list = %list.title, error = %err, "Could not seed list");
                report.failed(
                    ProvisionAction::SeedList {
                        list: list.title.clone(),
                        rows: dataset.rows.len(),
                    },
                    err.to_string(),
                );
            }
        }
    }

    /// Compute what a run would do, without mutating anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the site cannot be read.
    pub async fn plan(&self) -> Result<Vec<ProvisionAction>> {
        let mut actions = Vec::new();
        let mut missing = Vec::new();
        let mut known = HashMap::new();

        for descriptor in self.registry.lists() {
            let title = descriptor.title.as_str();
            match self.read(|| self.store.get_list(title)).await {
                Ok(handle) => {
                    known.insert(descriptor.title.clone(), handle);
                }
                Err(err) if err.is_not_found() => {
                    actions.push(ProvisionAction::CreateList {
                        list: descriptor.title.clone(),
                        template: descriptor.template,
                    });
                    missing.push(title);
                }
                Err(err) => return Err(err.into()),
            }
        }

        for descriptor in self.registry.lists() {
            let title = &descriptor.title;
            let columns = descriptor.columns.iter().filter(|c| !c.is_title());

            let Some(handle) = known.get(title) else {
                actions.extend(columns.map(|c| ProvisionAction::CreateColumn {
                    list: title.clone(),
                    column: c.internal_name.clone(),
                }));
                continue;
            };

            let existing = ExistingFields::new(self.read(|| self.store.list_fields(handle)).await?);
            for column in columns {
                match existing.find(column) {
                    None => actions.push(ProvisionAction::CreateColumn {
                        list: title.clone(),
                        column: column.internal_name.clone(),
                    }),
                    Some(field) if column.indexed && !field.indexed => {
                        actions.push(ProvisionAction::IndexColumn {
                            list: title.clone(),
                            column: field.internal_name.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        if !self.config.seed {
            return Ok(actions);
        }

        if let Some(asset) = &self.seeds.asset {
            let needs_upload = match known.get(&asset.library) {
                Some(library) => self.read(|| self.store.first_file(library)).await?.is_none(),
                None => missing.contains(&asset.library.as_str()),
            };
            if needs_upload {
                actions.push(ProvisionAction::UploadAsset {
                    library: asset.library.clone(),
                    file_name: asset.file_name.clone(),
                });
            }
        }

        for dataset in &self.seeds.datasets {
            let empty = match known.get(&dataset.list) {
                Some(list) => self.read(|| self.store.item_count(list)).await? == 0,
                None => missing.contains(&dataset.list.as_str()),
            };
            if empty && !dataset.rows.is_empty() {
                actions.push(ProvisionAction::SeedList {
                    list: dataset.list.clone(),
                    rows: dataset.rows.len(),
                });
            }
        }

        Ok(actions)
    }

    async fn read<T, F, Fut>(&self, read_fn: F) -> std::result::Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, StoreError>>,
    {
        retry_async(&self.config.retry, "plan", read_fn, StoreError::is_transient).await
    }
}

fn record_column(report: &mut ConvergenceReport, list: &str, column: String, outcome: ColumnOutcome) {
    let list = list.to_string();
    match outcome {
        ColumnOutcome::Present => {}
        ColumnOutcome::Created { metadata } => {
            report.taken(ProvisionAction::CreateColumn {
                list: list.clone(),
                column: column.clone(),
            });
            match metadata {
                MetadataOutcome::Applied => {
                    report.taken(ProvisionAction::RefineColumn { list, column });
                }
                MetadataOutcome::Skipped => {}
                MetadataOutcome::Failed { reason } => {
                    report.failed(ProvisionAction::RefineColumn { list, column }, reason);
                }
            }
        }
        ColumnOutcome::IndexApplied => report.taken(ProvisionAction::IndexColumn { list, column }),
        ColumnOutcome::IndexFailed { reason } => {
            report.failed(ProvisionAction::IndexColumn { list, column }, reason);
        }
        ColumnOutcome::Failed { reason } => {
            report.failed(ProvisionAction::CreateColumn { list, column }, reason);
        }
    }
}

#[async_trait]
impl ConvergenceRunner for Orchestrator {
    async fn run(&self) -> Result<ConvergenceReport> {
        Ok(self.converge().await)
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    store: Option<Arc<dyn SiteStore>>,
    registry: Option<Arc<SchemaRegistry>>,
    seeds: Option<SeedCatalog>,
    config: ProvisionerConfig,
}

impl OrchestratorBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            store: None,
            registry: None,
            seeds: None,
            config: ProvisionerConfig::default(),
        }
    }

    /// Set the store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn SiteStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the registry. Defaults to the standard registry.
    #[must_use]
    pub fn with_registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    /// Set the seed catalog. Defaults to the standard catalog.
    #[must_use]
    pub fn with_seeds(mut self, seeds: SeedCatalog) -> Self {
        self.seeds = Some(seeds);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ProvisionerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if no store was set, the configuration is invalid,
    /// or the standard seed catalog does not parse.
    pub fn build(self) -> Result<Orchestrator> {
        let store = self
            .store
            .ok_or_else(|| ProvisionError::invalid_config("a site store is required"))?;
        self.config.validate()?;

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(SchemaRegistry::standard().clone()));
        let seeds = match self.seeds {
            Some(seeds) => seeds,
            None => SeedCatalog::standard()?,
        };

        Ok(Orchestrator::new(store, registry, seeds, self.config))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::memory::{MemoryStore, StoreOp};
    use crate::schema::{ColumnDescriptor, ListDescriptor, ListTemplate};

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new([
            ListDescriptor::new("Articles", ListTemplate::GenericList)
                .column(ColumnDescriptor::multiline("Body"))
                .column(ColumnDescriptor::lookup("Section", "Sections")),
            ListDescriptor::new("Sections", ListTemplate::GenericList)
                .column(ColumnDescriptor::text("Code").indexed()),
        ])
    }

    fn orchestrator(store: &Arc<MemoryStore>, seeds: SeedCatalog) -> Orchestrator {
        let store: Arc<dyn SiteStore> = store.clone();
        OrchestratorBuilder::new()
            .with_store(store)
            .with_registry(registry())
            .with_seeds(seeds)
            .with_config(ProvisionerConfig::without_delays())
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_store() {
        let result = OrchestratorBuilder::new().build();
        assert!(matches!(result, Err(ProvisionError::InvalidConfig { .. })));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let store: Arc<dyn SiteStore> = MemoryStore::new_arc();
        let mut config = ProvisionerConfig::without_delays();
        config.retry.max_attempts = 0;

        let result = OrchestratorBuilder::new()
            .with_store(store)
            .with_config(config)
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_accessors_return_built_settings() {
        let store = MemoryStore::new_arc();
        let orchestrator = orchestrator(&store, SeedCatalog::default());

        assert_eq!(orchestrator.registry().len(), 2);
        assert!(orchestrator.registry().get("Sections").is_some());
        assert_eq!(orchestrator.config(), &ProvisionerConfig::without_delays());
    }

    #[tokio::test]
    async fn test_converges_empty_site() {
        let store = MemoryStore::new_arc();

        let report = orchestrator(&store, SeedCatalog::default()).converge().await;

        assert!(report.converged());
        assert_eq!(report.created_lists(), vec!["Articles", "Sections"]);
        assert_eq!(report.materialized_lists, 2);
        let section = store.field("Articles", "Section").await.unwrap();
        assert_eq!(
            section.lookup_list_id,
            store.handle("Sections").await.map(|h| h.id)
        );
    }

    #[tokio::test]
    async fn test_plan_matches_first_run_and_is_read_only() {
        let store = MemoryStore::new_arc();
        let seeds = SeedCatalog::default().with_dataset(SeedDataset::new("Sections", [
            serde_json::Map::new(),
        ]));
        let orchestrator = orchestrator(&store, seeds);

        let plan = orchestrator.plan().await.unwrap();

        assert!(store.mutations().await.is_empty());
        let report = orchestrator.converge().await;
        let taken: Vec<_> = report
            .actions_taken
            .iter()
            .filter(|a| !matches!(a, ProvisionAction::RefineColumn { .. }))
            .cloned()
            .collect();
        assert_eq!(plan, taken);
        assert!(orchestrator.plan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_list_skips_its_columns() {
        let store = MemoryStore::new_arc();
        store
            .fail_always(
                StoreOp::CreateList,
                Some("Articles"),
                StoreError::rejected(403, "forbidden"),
            )
            .await;

        let report = orchestrator(&store, SeedCatalog::default()).converge().await;

        assert!(report.has_failures_for("Articles"));
        assert!(!report.has_failures_for("Sections"));
        assert_eq!(report.materialized_lists, 1);
        assert!(store.field("Sections", "Code").await.is_some());
    }

    #[tokio::test]
    async fn test_columns_applied_to_list_recovered_after_phase_one() {
        let store = MemoryStore::new_arc();
        store.insert_list("Sections", ListTemplate::GenericList).await;
        // Every phase-one read of Sections fails, the later re-fetch succeeds.
        store
            .fail_next(
                StoreOp::GetList,
                Some("Sections"),
                3,
                StoreError::server(500, "unavailable"),
            )
            .await;

        let report = orchestrator(&store, SeedCatalog::default()).converge().await;

        assert_eq!(store.count(StoreOp::CreateList).await, 1);
        assert!(report.actions_failed.iter().any(|(action, _)| matches!(
            action,
            ProvisionAction::CreateList { list, .. } if list == "Sections"
        )));
        assert_eq!(report.materialized_lists, 1);
        assert!(store.field("Sections", "Code").await.unwrap().indexed);
        assert!(report.actions_taken.contains(&ProvisionAction::CreateColumn {
            list: "Sections".to_string(),
            column: "Code".to_string(),
        }));
        let section = store.field("Articles", "Section").await.unwrap();
        assert_eq!(
            section.lookup_list_id,
            store.handle("Sections").await.map(|h| h.id)
        );
    }

    #[tokio::test]
    async fn test_lookup_outside_registry_is_not_created() {
        let store = MemoryStore::new_arc();
        store.insert_list("External", ListTemplate::GenericList).await;
        let store_dyn: Arc<dyn SiteStore> = store.clone();
        let orchestrator = OrchestratorBuilder::new()
            .with_store(store_dyn)
            .with_registry(SchemaRegistry::new([ListDescriptor::new(
                "Events",
                ListTemplate::Events,
            )
            .column(ColumnDescriptor::lookup("Ext", "External"))
            .column(ColumnDescriptor::text("Room"))]))
            .with_config(ProvisionerConfig::without_delays())
            .build()
            .unwrap();

        let report = orchestrator.converge().await;

        assert!(store.field("Events", "Ext").await.is_none());
        assert!(store.field("Events", "Room").await.is_some());
        assert!(report.actions_failed.iter().any(|(action, _)| {
            *action
                == ProvisionAction::CreateColumn {
                    list: "Events".to_string(),
                    column: "Ext".to_string(),
                }
        }));
        let external_reads = store
            .operations()
            .await
            .into_iter()
            .filter(|record| record.target == "External")
            .count();
        assert_eq!(external_reads, 0);
    }

    #[tokio::test]
    async fn test_seeding_can_be_disabled() {
        let store = MemoryStore::new_arc();
        let seeds = SeedCatalog::default().with_dataset(SeedDataset::new("Sections", [
            serde_json::Map::new(),
        ]));
        let store_dyn: Arc<dyn SiteStore> = store.clone();
        let orchestrator = OrchestratorBuilder::new()
            .with_store(store_dyn)
            .with_registry(registry())
            .with_seeds(seeds)
            .with_config(ProvisionerConfig::without_delays().with_seed(false))
            .build()
            .unwrap();

        orchestrator.converge().await;

        assert_eq!(store.count(StoreOp::AddItem).await, 0);
    }
}
