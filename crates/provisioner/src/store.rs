//! Remote store contract consumed by the provisioner.
//!
//! The provisioner never talks HTTP itself. Everything it needs from the
//! backing site is expressed by [`SiteStore`], and every failure comes back
//! as a typed [`StoreError`] so that classification is a `match`, not a
//! substring search.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::{ColumnDescriptor, ListTemplate};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Field values of a single list item.
pub type ItemFields = Map<String, Value>;

/// Errors returned by a [`SiteStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The resource does not exist.
    #[error("{resource} does not exist")]
    NotFound { resource: String },

    /// The resource was created by someone else first.
    #[error("{resource} already exists")]
    AlreadyExists { resource: String },

    /// Concurrent modification conflict (HTTP 409).
    #[error("conflict on {resource}: {reason}")]
    Conflict { resource: String, reason: String },

    /// The store asked us to slow down (HTTP 429/503).
    #[error("throttled: {reason}")]
    Throttled { reason: String },

    /// Server-side failure (HTTP 5xx).
    #[error("server error {status}: {reason}")]
    Server { status: u16, reason: String },

    /// Transport failure before a response arrived.
    #[error("network error: {reason}")]
    Network { reason: String },

    /// Request rejected by the store (HTTP 4xx other than 404/409/429).
    #[error("request rejected with status {status}: {reason}")]
    Rejected { status: u16, reason: String },

    /// Request could not be built from the descriptor.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Response could not be understood.
    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },
}

/// Coarse classification that drives retry and creation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Absent resource. Drives the creation path.
    NotFound,
    /// Lost a creation race. Treated as success.
    AlreadyExists,
    /// Worth retrying with backoff.
    Transient,
    /// Retrying will not help.
    Permanent,
}

impl StoreError {
    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(resource: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource: resource.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Create a throttled error.
    pub fn throttled(reason: impl Into<String>) -> Self {
        Self::Throttled {
            reason: reason.into(),
        }
    }

    /// Create a server error.
    pub fn server(status: u16, reason: impl Into<String>) -> Self {
        Self::Server {
            status,
            reason: reason.into(),
        }
    }

    /// Create a network error.
    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network {
            reason: reason.into(),
        }
    }

    /// Create a rejected error.
    pub fn rejected(status: u16, reason: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            reason: reason.into(),
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Classify this error.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::AlreadyExists { .. } => ErrorClass::AlreadyExists,
            Self::Conflict { .. }
            | Self::Throttled { .. }
            | Self::Server { .. }
            | Self::Network { .. } => ErrorClass::Transient,
            Self::Rejected { .. } | Self::InvalidRequest { .. } | Self::InvalidResponse { .. } => {
                ErrorClass::Permanent
            }
        }
    }

    /// Check if the resource is absent.
    pub const fn is_not_found(&self) -> bool {
        matches!(self.class(), ErrorClass::NotFound)
    }

    /// Check if the error is worth retrying.
    pub const fn is_transient(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }
}

/// Handle to a list that exists in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListHandle {
    /// Store identifier (a GUID on SharePoint).
    pub id: String,
    /// List title.
    pub title: String,
    /// Numeric list template id.
    pub template: u32,
    /// Entity type name used when inserting items, if the store needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_entity_type: Option<String>,
}

/// Metadata of a field that exists on a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub internal_name: String,
    pub display_name: String,
    pub indexed: bool,
}

/// A column ready to be created, with any lookup target already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    /// The declared column.
    pub column: ColumnDescriptor,
    /// Identifier of the lookup target list. Set only for lookup columns.
    pub lookup_list_id: Option<String>,
}

impl FieldDefinition {
    /// Definition for a column with no external references.
    pub const fn plain(column: ColumnDescriptor) -> Self {
        Self {
            column,
            lookup_list_id: None,
        }
    }

    /// Definition for a lookup column pointing at `list_id`.
    pub fn lookup(column: ColumnDescriptor, list_id: impl Into<String>) -> Self {
        Self {
            column,
            lookup_list_id: Some(list_id.into()),
        }
    }
}

/// Metadata-only refinement of an existing field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldUpdate {
    pub description: Option<String>,
    pub indexed: Option<bool>,
}

impl FieldUpdate {
    /// Update carrying the descriptor's description and index flag.
    pub fn from_column(column: &ColumnDescriptor) -> Self {
        Self {
            description: Some(column.description.clone()).filter(|d| !d.is_empty()),
            indexed: column.indexed.then_some(true),
        }
    }

    /// Update that only turns on indexing.
    pub const fn index_only() -> Self {
        Self {
            description: None,
            indexed: Some(true),
        }
    }

    /// Check if there is nothing to apply.
    pub const fn is_empty(&self) -> bool {
        self.description.is_none() && self.indexed.is_none()
    }
}

/// Reference to an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    /// File name within its library.
    pub name: String,
    /// Server-relative URL.
    pub url: String,
}

/// Operations the provisioner needs from the backing site.
#[async_trait]
pub trait SiteStore: Send + Sync {
    /// Fetch a list by title.
    async fn get_list(&self, title: &str) -> StoreResult<ListHandle>;

    /// Create a list.
    async fn create_list(
        &self,
        title: &str,
        template: ListTemplate,
        description: &str,
    ) -> StoreResult<ListHandle>;

    /// Turn on versioning for a list.
    async fn enable_versioning(&self, list: &ListHandle) -> StoreResult<()>;

    /// Enumerate the fields of a list.
    async fn list_fields(&self, list: &ListHandle) -> StoreResult<Vec<FieldInfo>>;

    /// Create a field on a list.
    async fn create_field(&self, list: &ListHandle, field: &FieldDefinition) -> StoreResult<()>;

    /// Update metadata of an existing field, addressed by internal name or title.
    async fn update_field(
        &self,
        list: &ListHandle,
        field_name: &str,
        update: &FieldUpdate,
    ) -> StoreResult<()>;

    /// Count the items in a list.
    async fn item_count(&self, list: &ListHandle) -> StoreResult<u64>;

    /// Insert one item.
    async fn add_item(&self, list: &ListHandle, fields: &ItemFields) -> StoreResult<()>;

    /// First file in a library's root folder, if any.
    async fn first_file(&self, list: &ListHandle) -> StoreResult<Option<AssetRef>>;

    /// Upload a file into a library's root folder, overwriting any file of the same name.
    async fn upload_file(
        &self,
        list: &ListHandle,
        file_name: &str,
        content: &[u8],
    ) -> StoreResult<AssetRef>;
}
