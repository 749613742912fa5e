//! In-memory [`SiteStore`] for tests and dry runs.
//!
//! Every call is recorded in an operation log. Faults can be scripted per
//! operation (and optionally per target) to exercise retry and isolation
//! paths.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::schema::{ColumnKind, ListTemplate};
use crate::store::{
    AssetRef, FieldDefinition, FieldInfo, FieldUpdate, ItemFields, ListHandle, SiteStore,
    StoreError, StoreResult,
};

/// Store operation, for logging and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    GetList,
    CreateList,
    EnableVersioning,
    ListFields,
    CreateField,
    UpdateField,
    ItemCount,
    AddItem,
    FirstFile,
    UploadFile,
}

impl StoreOp {
    /// Check if the operation changes the store.
    pub const fn is_mutation(self) -> bool {
        matches!(
            self,
            Self::CreateList
                | Self::EnableVersioning
                | Self::CreateField
                | Self::UpdateField
                | Self::AddItem
                | Self::UploadFile
        )
    }
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpRecord {
    pub op: StoreOp,
    /// `List` for list operations, `List/Field` for field operations.
    pub target: String,
}

/// A field held by the memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryField {
    pub internal_name: String,
    pub display_name: String,
    /// `None` for fields inserted directly, whose type is unknown.
    pub kind: Option<ColumnKind>,
    pub description: String,
    pub indexed: bool,
    pub lookup_list_id: Option<String>,
}

impl MemoryField {
    fn info(&self) -> FieldInfo {
        FieldInfo {
            internal_name: self.internal_name.clone(),
            display_name: self.display_name.clone(),
            indexed: self.indexed,
        }
    }

    fn answers_to(&self, name: &str) -> bool {
        self.internal_name.eq_ignore_ascii_case(name) || self.display_name.eq_ignore_ascii_case(name)
    }
}

#[derive(Debug, Clone)]
struct MemoryList {
    handle: ListHandle,
    description: String,
    versioning: bool,
    fields: Vec<MemoryField>,
    items: Vec<ItemFields>,
    files: Vec<AssetRef>,
}

#[derive(Debug, Clone)]
struct Fault {
    op: StoreOp,
    target: Option<String>,
    error: StoreError,
    /// `None` fails forever.
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
struct Inner {
    lists: Vec<MemoryList>,
    next_id: u64,
    log: Vec<OpRecord>,
    faults: Vec<Fault>,
    races: Vec<String>,
}

impl Inner {
    fn list(&self, title: &str) -> Option<&MemoryList> {
        self.lists
            .iter()
            .find(|l| l.handle.title.eq_ignore_ascii_case(title))
    }

    fn list_by_handle(&mut self, handle: &ListHandle) -> StoreResult<&mut MemoryList> {
        self.lists
            .iter_mut()
            .find(|l| l.handle.id == handle.id)
            .ok_or_else(|| StoreError::not_found(format!("list '{}'", handle.title)))
    }

    fn insert_list(&mut self, title: &str, template: u32, description: &str) -> ListHandle {
        self.next_id = self.next_id.saturating_add(1);
        let handle = ListHandle {
            id: format!("00000000-0000-0000-0000-{:012x}", self.next_id),
            title: title.to_string(),
            template,
            item_entity_type: Some(format!("SP.Data.{}ListItem", title.replace(' ', "_x0020_"))),
        };
        self.lists.push(MemoryList {
            handle: handle.clone(),
            description: description.to_string(),
            versioning: false,
            fields: Vec::new(),
            items: Vec::new(),
            files: Vec::new(),
        });
        handle
    }

    fn record(&mut self, op: StoreOp, target: &str) -> StoreResult<()> {
        self.log.push(OpRecord {
            op,
            target: target.to_string(),
        });

        let fault = self.faults.iter_mut().find(|f| {
            f.op == op
                && f.target.as_deref().is_none_or(|t| t.eq_ignore_ascii_case(target))
                && f.remaining != Some(0)
        });

        match fault {
            Some(fault) => {
                if let Some(remaining) = fault.remaining.as_mut() {
                    *remaining = remaining.saturating_sub(1);
                }
                Err(fault.error.clone())
            }
            None => Ok(()),
        }
    }
}

/// In-memory site.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    latency: Duration,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Delay every call by `latency`, so concurrent callers overlap.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    async fn enter(&self, op: StoreOp, target: &str) -> StoreResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.inner.write().await.record(op, target)
    }

    // ------------------------------------------------------------------
    // Fixtures. None of these are recorded in the operation log.
    // ------------------------------------------------------------------

    /// Put a list in place.
    pub async fn insert_list(&self, title: &str, template: ListTemplate) -> ListHandle {
        self.inner
            .write()
            .await
            .insert_list(title, template.id(), "")
    }

    /// Put a field of unknown type on an existing list. Ignored if the list is missing.
    pub async fn insert_field(&self, list: &str, internal_name: &str, display_name: &str, indexed: bool) {
        let mut inner = self.inner.write().await;
        if let Some(target) = inner
            .lists
            .iter_mut()
            .find(|l| l.handle.title.eq_ignore_ascii_case(list))
        {
            target.fields.push(MemoryField {
                internal_name: internal_name.to_string(),
                display_name: display_name.to_string(),
                kind: None,
                description: String::new(),
                indexed,
                lookup_list_id: None,
            });
        }
    }

    /// Put an item in an existing list. Ignored if the list is missing.
    pub async fn insert_item(&self, list: &str, fields: ItemFields) {
        let mut inner = self.inner.write().await;
        if let Some(target) = inner
            .lists
            .iter_mut()
            .find(|l| l.handle.title.eq_ignore_ascii_case(list))
        {
            target.items.push(fields);
        }
    }

    /// Fail the next `times` calls of `op` (on `target`, if given) with `error`.
    pub async fn fail_next(&self, op: StoreOp, target: Option<&str>, times: u32, error: StoreError) {
        self.inner.write().await.faults.push(Fault {
            op,
            target: target.map(str::to_string),
            error,
            remaining: Some(times),
        });
    }

    /// Fail every call of `op` (on `target`, if given) with `error`.
    pub async fn fail_always(&self, op: StoreOp, target: Option<&str>, error: StoreError) {
        self.inner.write().await.faults.push(Fault {
            op,
            target: target.map(str::to_string),
            error,
            remaining: None,
        });
    }

    /// Make the next creation of `title` lose a race: the list appears as if
    /// another process created it, and the call reports it already exists.
    pub async fn race_next_create(&self, title: &str) {
        self.inner.write().await.races.push(title.to_string());
    }

    /// Drop every scripted fault.
    pub async fn clear_faults(&self) {
        self.inner.write().await.faults.clear();
    }

    // ------------------------------------------------------------------
    // Inspection.
    // ------------------------------------------------------------------

    /// Every recorded call, in order.
    pub async fn operations(&self) -> Vec<OpRecord> {
        self.inner.read().await.log.clone()
    }

    /// Recorded calls that change the store.
    pub async fn mutations(&self) -> Vec<OpRecord> {
        self.inner
            .read()
            .await
            .log
            .iter()
            .filter(|r| r.op.is_mutation())
            .cloned()
            .collect()
    }

    /// Number of recorded calls of `op`.
    pub async fn count(&self, op: StoreOp) -> usize {
        self.inner.read().await.log.iter().filter(|r| r.op == op).count()
    }

    /// Forget recorded calls.
    pub async fn clear_operations(&self) {
        self.inner.write().await.log.clear();
    }

    /// Titles of every list, in creation order.
    pub async fn list_titles(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .lists
            .iter()
            .map(|l| l.handle.title.clone())
            .collect()
    }

    /// Handle of a list.
    pub async fn handle(&self, title: &str) -> Option<ListHandle> {
        self.inner.read().await.list(title).map(|l| l.handle.clone())
    }

    /// Description a list was created with.
    pub async fn description(&self, title: &str) -> Option<String> {
        self.inner.read().await.list(title).map(|l| l.description.clone())
    }

    /// Check if versioning is on for a list.
    pub async fn versioning_enabled(&self, title: &str) -> bool {
        self.inner
            .read()
            .await
            .list(title)
            .is_some_and(|l| l.versioning)
    }

    /// Fields of a list.
    pub async fn fields(&self, title: &str) -> Vec<MemoryField> {
        self.inner
            .read()
            .await
            .list(title)
            .map(|l| l.fields.clone())
            .unwrap_or_default()
    }

    /// One field of a list, by internal or display name.
    pub async fn field(&self, title: &str, name: &str) -> Option<MemoryField> {
        self.inner
            .read()
            .await
            .list(title)
            .and_then(|l| l.fields.iter().find(|f| f.answers_to(name)).cloned())
    }

    /// Items of a list.
    pub async fn items(&self, title: &str) -> Vec<ItemFields> {
        self.inner
            .read()
            .await
            .list(title)
            .map(|l| l.items.clone())
            .unwrap_or_default()
    }

    /// Files of a library.
    pub async fn files(&self, title: &str) -> Vec<AssetRef> {
        self.inner
            .read()
            .await
            .list(title)
            .map(|l| l.files.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SiteStore for MemoryStore {
    async fn get_list(&self, title: &str) -> StoreResult<ListHandle> {
        self.enter(StoreOp::GetList, title).await?;
        self.inner
            .read()
            .await
            .list(title)
            .map(|l| l.handle.clone())
            .ok_or_else(|| StoreError::not_found(format!("list '{title}'")))
    }

    async fn create_list(
        &self,
        title: &str,
        template: ListTemplate,
        description: &str,
    ) -> StoreResult<ListHandle> {
        self.enter(StoreOp::CreateList, title).await?;
        let mut inner = self.inner.write().await;

        if let Some(pos) = inner.races.iter().position(|r| r.eq_ignore_ascii_case(title)) {
            inner.races.remove(pos);
            if inner.list(title).is_none() {
                inner.insert_list(title, template.id(), description);
            }
            return Err(StoreError::already_exists(format!("list '{title}'")));
        }

        if inner.list(title).is_some() {
            return Err(StoreError::already_exists(format!("list '{title}'")));
        }
        Ok(inner.insert_list(title, template.id(), description))
    }

    async fn enable_versioning(&self, list: &ListHandle) -> StoreResult<()> {
        self.enter(StoreOp::EnableVersioning, &list.title).await?;
        self.inner.write().await.list_by_handle(list)?.versioning = true;
        Ok(())
    }

    async fn list_fields(&self, list: &ListHandle) -> StoreResult<Vec<FieldInfo>> {
        self.enter(StoreOp::ListFields, &list.title).await?;
        let mut inner = self.inner.write().await;
        Ok(inner
            .list_by_handle(list)?
            .fields
            .iter()
            .map(MemoryField::info)
            .collect())
    }

    async fn create_field(&self, list: &ListHandle, field: &FieldDefinition) -> StoreResult<()> {
        let column = &field.column;
        let target = format!("{}/{}", list.title, column.internal_name);
        self.enter(StoreOp::CreateField, &target).await?;
        let mut inner = self.inner.write().await;

        if let ColumnKind::Lookup { list: lookup_title, .. } = &column.kind {
            let resolvable = field
                .lookup_list_id
                .as_ref()
                .is_some_and(|id| inner.lists.iter().any(|l| &l.handle.id == id));
            if !resolvable {
                return Err(StoreError::rejected(
                    400,
                    format!("lookup target '{lookup_title}' has no valid list id"),
                ));
            }
        }

        let entry = inner.list_by_handle(list)?;
        if entry
            .fields
            .iter()
            .any(|f| f.internal_name.eq_ignore_ascii_case(&column.internal_name))
        {
            return Err(StoreError::already_exists(format!("field '{target}'")));
        }

        entry.fields.push(MemoryField {
            internal_name: column.internal_name.clone(),
            display_name: column.display_name.clone(),
            kind: Some(column.kind.clone()),
            description: String::new(),
            indexed: false,
            lookup_list_id: field.lookup_list_id.clone(),
        });
        Ok(())
    }

    async fn update_field(
        &self,
        list: &ListHandle,
        field_name: &str,
        update: &FieldUpdate,
    ) -> StoreResult<()> {
        let target = format!("{}/{}", list.title, field_name);
        self.enter(StoreOp::UpdateField, &target).await?;
        let mut inner = self.inner.write().await;

        let field = inner
            .list_by_handle(list)?
            .fields
            .iter_mut()
            .find(|f| f.answers_to(field_name))
            .ok_or_else(|| StoreError::not_found(format!("field '{target}'")))?;

        if let Some(description) = &update.description {
            field.description.clone_from(description);
        }
        if let Some(indexed) = update.indexed {
            field.indexed = indexed;
        }
        Ok(())
    }

    async fn item_count(&self, list: &ListHandle) -> StoreResult<u64> {
        self.enter(StoreOp::ItemCount, &list.title).await?;
        let mut inner = self.inner.write().await;
        let count = inner.list_by_handle(list)?.items.len();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn add_item(&self, list: &ListHandle, fields: &ItemFields) -> StoreResult<()> {
        self.enter(StoreOp::AddItem, &list.title).await?;
        self.inner
            .write()
            .await
            .list_by_handle(list)?
            .items
            .push(fields.clone());
        Ok(())
    }

    async fn first_file(&self, list: &ListHandle) -> StoreResult<Option<AssetRef>> {
        self.enter(StoreOp::FirstFile, &list.title).await?;
        let mut inner = self.inner.write().await;
        Ok(inner.list_by_handle(list)?.files.first().cloned())
    }

    async fn upload_file(
        &self,
        list: &ListHandle,
        file_name: &str,
        content: &[u8],
    ) -> StoreResult<AssetRef> {
        let target = format!("{}/{}", list.title, file_name);
        self.enter(StoreOp::UploadFile, &target).await?;
        if content.is_empty() {
            return Err(StoreError::rejected(400, "empty file"));
        }

        let mut inner = self.inner.write().await;
        let entry = inner.list_by_handle(list)?;
        let asset = AssetRef {
            name: file_name.to_string(),
            url: format!("/sites/memory/{}/{}", entry.handle.title, file_name),
        };

        entry.files.retain(|f| f.name != file_name);
        entry.files.push(asset.clone());

        let mut item = ItemFields::new();
        item.insert("FileLeafRef".to_string(), file_name.into());
        entry.items.push(item);

        Ok(asset)
    }
}
