//! Seed loader: one-time bootstrap data for empty lists.
//!
//! Seeding is never a reconciliation. A list with at least one item is left
//! untouched, whatever it contains.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::ProvisionerConfig;
use crate::error::{ProvisionError, Result};
use crate::registry::SMART_IMAGES;
use crate::retry::{RetryPolicy, retry_async};
use crate::store::{AssetRef, ItemFields, ListHandle, SiteStore, StoreError, StoreResult};

/// File name of the embedded placeholder image.
pub const DEFAULT_ASSET_NAME: &str = "smartsite-placeholder.svg";

const STANDARD_SEEDS: &str = include_str!("../seed/standard.json");
const PLACEHOLDER_SVG: &[u8] = include_bytes!("../assets/placeholder.svg");

/// Canned records for one list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedDataset {
    /// Title of the target list.
    pub list: String,
    /// Field that receives the shared asset reference, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_field: Option<String>,
    pub rows: Vec<ItemFields>,
}

impl SeedDataset {
    /// Create a dataset.
    pub fn new(list: impl Into<String>, rows: impl IntoIterator<Item = ItemFields>) -> Self {
        Self {
            list: list.into(),
            image_field: None,
            rows: rows.into_iter().collect(),
        }
    }

    /// Attach the shared asset to `field` on every row.
    #[must_use]
    pub fn with_image_field(mut self, field: impl Into<String>) -> Self {
        self.image_field = Some(field.into());
        self
    }

    /// Rows ready for insertion, with the asset reference filled in where
    /// the row does not set the image field itself.
    pub fn rows_with_asset(&self, asset: Option<&AssetRef>) -> Vec<ItemFields> {
        let image = self
            .image_field
            .as_deref()
            .zip(asset)
            .map(|(field, asset)| (field, json!({ "Url": asset.url, "Description": asset.name })));

        self.rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                if let Some((field, value)) = &image {
                    let unset = row.get(*field).is_none_or(Value::is_null);
                    if unset {
                        row.insert((*field).to_string(), value.clone());
                    }
                }
                row
            })
            .collect()
    }
}

/// Shared file used as a placeholder image by seed rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultAsset {
    /// Title of the library holding the asset.
    pub library: String,
    pub file_name: String,
    pub content: Vec<u8>,
}

impl DefaultAsset {
    /// The embedded placeholder image, kept in the SmartImages library.
    pub fn standard() -> Self {
        Self {
            library: SMART_IMAGES.to_string(),
            file_name: DEFAULT_ASSET_NAME.to_string(),
            content: PLACEHOLDER_SVG.to_vec(),
        }
    }
}

/// Everything phase 3 populates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedCatalog {
    pub asset: Option<DefaultAsset>,
    pub datasets: Vec<SeedDataset>,
}

impl SeedCatalog {
    /// The embedded datasets and placeholder asset.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded JSON does not parse.
    pub fn standard() -> Result<Self> {
        Ok(Self {
            asset: Some(DefaultAsset::standard()),
            datasets: Self::parse(STANDARD_SEEDS)?,
        })
    }

    /// Parse datasets from a JSON array.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not an array of datasets.
    pub fn parse(json: &str) -> Result<Vec<SeedDataset>> {
        serde_json::from_str(json).map_err(|e| ProvisionError::invalid_seed(e.to_string()))
    }

    /// Add a dataset.
    #[must_use]
    pub fn with_dataset(mut self, dataset: SeedDataset) -> Self {
        self.datasets.push(dataset);
        self
    }
}

/// Where the shared asset came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOutcome {
    /// The library already had a file; the first one is used.
    Existing(AssetRef),
    /// The library was empty; the placeholder was uploaded.
    Uploaded(AssetRef),
}

impl AssetOutcome {
    /// The asset reference, wherever it came from.
    pub const fn asset(&self) -> &AssetRef {
        match self {
            Self::Existing(asset) | Self::Uploaded(asset) => asset,
        }
    }
}

/// Result of seeding one list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    /// The list had items; nothing was inserted.
    AlreadyPopulated { items: u64 },
    /// The list was empty and rows were inserted.
    Seeded { inserted: usize, failed: usize },
}

/// Inserts seed rows and ensures the shared asset.
pub struct SeedLoader {
    store: Arc<dyn SiteStore>,
    retry: RetryPolicy,
}

impl SeedLoader {
    /// Create a loader over `store`.
    pub fn new(store: Arc<dyn SiteStore>, config: &ProvisionerConfig) -> Self {
        Self {
            store,
            retry: config.retry.clone(),
        }
    }

    /// Make sure `library` holds a file usable as the shared asset.
    ///
    /// # Errors
    ///
    /// Returns an error if the library cannot be read or the upload fails.
    pub async fn ensure_asset(
        &self,
        library: &ListHandle,
        asset: &DefaultAsset,
    ) -> StoreResult<AssetOutcome> {
        let existing = retry_async(
            &self.retry,
            "first_file",
            || self.store.first_file(library),
            StoreError::is_transient,
        )
        .await?;

        if let Some(existing) = existing {
            debug!(library = %library.title, url = %existing.url, "Using existing asset");
            return Ok(AssetOutcome::Existing(existing));
        }

        info!(library = %library.title, file = %asset.file_name, "Uploading placeholder asset");
        let uploaded = retry_async(
            &self.retry,
            "upload_file",
            || self.store.upload_file(library, &asset.file_name, &asset.content),
            StoreError::is_transient,
        )
        .await?;
        Ok(AssetOutcome::Uploaded(uploaded))
    }

    /// Insert `dataset` into `list` if, and only if, the list is empty.
    ///
    /// Row failures are logged and counted; they do not stop the remaining
    /// rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the item count cannot be read.
    pub async fn seed(
        &self,
        list: &ListHandle,
        dataset: &SeedDataset,
        asset: Option<&AssetRef>,
    ) -> StoreResult<SeedOutcome> {
        let items = retry_async(
            &self.retry,
            "item_count",
            || self.store.item_count(list),
            StoreError::is_transient,
        )
        .await?;

        if items > 0 {
            debug!(list = %list.title, items, "List has data, not seeding");
            return Ok(SeedOutcome::AlreadyPopulated { items });
        }

        let rows = dataset.rows_with_asset(asset);
        let mut inserted: usize = 0;
        let mut failed: usize = 0;

        for row in &rows {
            let result = retry_async(
                &self.retry,
                "add_item",
                || self.store.add_item(list, row),
                StoreError::is_transient,
            )
            .await;

            match result {
                Ok(()) => inserted = inserted.saturating_add(1),
                Err(err) => {
                    warn!(list = %list.title, error = %err, "Seed row insert failed");
                    failed = failed.saturating_add(1);
                }
            }
        }

        info!(list = %list.title, inserted, failed, "Seeded empty list");
        Ok(SeedOutcome::Seeded { inserted, failed })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::memory::{MemoryStore, StoreOp};
    use crate::registry::{NEWS, SLIDES};
    use crate::schema::ListTemplate;

    fn row(title: &str) -> ItemFields {
        let mut row = ItemFields::new();
        row.insert("Title".to_string(), title.into());
        row
    }

    fn loader(store: &Arc<MemoryStore>) -> SeedLoader {
        let store: Arc<dyn SiteStore> = store.clone();
        SeedLoader::new(store, &ProvisionerConfig::without_delays())
    }

    #[test]
    fn test_standard_catalog_parses() {
        let catalog = SeedCatalog::standard().unwrap();
        let news = catalog.datasets.iter().find(|d| d.list == NEWS).unwrap();
        assert_eq!(news.rows.len(), 4);
        assert_eq!(news.image_field.as_deref(), Some("NewsImage"));
        assert!(catalog.datasets.iter().any(|d| d.list == SLIDES));
        assert!(catalog.asset.is_some_and(|a| !a.content.is_empty()));
    }

    #[test]
    fn test_invalid_seed_json_is_an_error() {
        let result = SeedCatalog::parse("{\"list\": 1}");
        assert!(matches!(result, Err(ProvisionError::InvalidSeed { .. })));
    }

    #[test]
    fn test_rows_with_asset_keeps_explicit_values() {
        let mut explicit = row("Custom");
        explicit.insert("Image".to_string(), json!({ "Url": "/custom.png" }));
        let dataset = SeedDataset::new("News", [row("Plain"), explicit]).with_image_field("Image");
        let asset = AssetRef {
            name: "p.svg".to_string(),
            url: "/lib/p.svg".to_string(),
        };

        let rows = dataset.rows_with_asset(Some(&asset));

        assert_eq!(rows[0]["Image"]["Url"], "/lib/p.svg");
        assert_eq!(rows[1]["Image"]["Url"], "/custom.png");
    }

    #[test]
    fn test_rows_without_asset_are_unchanged() {
        let dataset = SeedDataset::new("News", [row("Plain")]).with_image_field("Image");
        let rows = dataset.rows_with_asset(None);
        assert!(!rows[0].contains_key("Image"));
    }

    #[tokio::test]
    async fn test_seeds_empty_list() {
        let store = MemoryStore::new_arc();
        let list = store.insert_list("News", ListTemplate::GenericList).await;
        let dataset = SeedDataset::new("News", [row("a"), row("b")]);

        let outcome = loader(&store).seed(&list, &dataset, None).await.unwrap();

        assert_eq!(outcome, SeedOutcome::Seeded { inserted: 2, failed: 0 });
        assert_eq!(store.items("News").await.len(), 2);
    }

    #[tokio::test]
    async fn test_populated_list_is_left_alone() {
        let store = MemoryStore::new_arc();
        let list = store.insert_list("News", ListTemplate::GenericList).await;
        store.insert_item("News", row("existing")).await;
        let dataset = SeedDataset::new("News", [row("a"), row("b")]);

        let outcome = loader(&store).seed(&list, &dataset, None).await.unwrap();

        assert_eq!(outcome, SeedOutcome::AlreadyPopulated { items: 1 });
        assert_eq!(store.count(StoreOp::AddItem).await, 0);
    }

    #[tokio::test]
    async fn test_row_failure_does_not_stop_other_rows() {
        let store = MemoryStore::new_arc();
        let list = store.insert_list("News", ListTemplate::GenericList).await;
        store
            .fail_next(StoreOp::AddItem, None, 1, StoreError::rejected(400, "bad value"))
            .await;
        let dataset = SeedDataset::new("News", [row("a"), row("b"), row("c")]);

        let outcome = loader(&store).seed(&list, &dataset, None).await.unwrap();

        assert_eq!(outcome, SeedOutcome::Seeded { inserted: 2, failed: 1 });
    }

    #[tokio::test]
    async fn test_asset_uploaded_into_empty_library() {
        let store = MemoryStore::new_arc();
        let library = store.insert_list("SmartImages", ListTemplate::PictureLibrary).await;

        let outcome = loader(&store)
            .ensure_asset(&library, &DefaultAsset::standard())
            .await
            .unwrap();

        assert!(matches!(outcome, AssetOutcome::Uploaded(_)));
        assert_eq!(outcome.asset().name, DEFAULT_ASSET_NAME);
        assert_eq!(store.files("SmartImages").await.len(), 1);
    }

    #[tokio::test]
    async fn test_existing_library_file_is_reused() {
        let store = MemoryStore::new_arc();
        let library = store.insert_list("SmartImages", ListTemplate::PictureLibrary).await;
        let existing = store.upload_file(&library, "logo.png", b"png").await.unwrap();
        store.clear_operations().await;

        let outcome = loader(&store)
            .ensure_asset(&library, &DefaultAsset::standard())
            .await
            .unwrap();

        assert_eq!(outcome, AssetOutcome::Existing(existing));
        assert_eq!(store.count(StoreOp::UploadFile).await, 0);
    }
}
