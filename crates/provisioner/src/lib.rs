//! Schema convergence for a SharePoint-style site.
//!
//! The site builder keeps its content in remote lists. This crate makes sure
//! those lists, and the columns on them, exist before anything reads them:
//!
//! - **Schema registry**: declarative descriptors of every list and column
//! - **Materializers**: create-if-absent for one list or one list's columns
//! - **Orchestrator**: all lists, then all columns, then seed data
//! - **Guard**: many concurrent triggers, one run
//!
//! Convergence is additive and best effort. Nothing is ever deleted or
//! altered beyond switching on an index, and a failure on one list or column
//! is logged and skipped.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use smartsite_provisioner::{
//!     MemoryStore, Orchestrator, ProvisionGuard, ProvisionerConfig, SiteStore,
//!     read_or_provision,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryStore::new_arc();
//!     let orchestrator = Orchestrator::standard(store.clone(), ProvisionerConfig::default())?;
//!     let guard = ProvisionGuard::new_arc(Arc::new(orchestrator));
//!
//!     // A read that fails with NotFound provisions the site and retries once.
//!     let news = read_or_provision(&guard, || store.get_list("News")).await?;
//!     println!("{}", news.id);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod columns;
pub mod config;
pub mod error;
pub mod guard;
pub mod lists;
pub mod memory;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod retry;
pub mod schema;
pub mod seed;
pub mod store;
pub mod trigger;

// Re-export main types
pub use columns::{ColumnMaterializer, ColumnOutcome, ColumnReport, MetadataOutcome};
pub use config::ProvisionerConfig;
pub use error::{ProvisionError, Result};
pub use guard::{GuardPhase, ProvisionGuard, SharedOutcome};
pub use lists::{ListMaterializer, ListOutcome};
pub use memory::{MemoryField, MemoryStore, OpRecord, StoreOp};
pub use orchestrator::{ConvergenceRunner, Orchestrator, OrchestratorBuilder};
pub use report::{ConvergenceReport, ProvisionAction};
pub use retry::{RetryPolicy, retry_async};
pub use schema::{
    ColumnDescriptor, ColumnKind, ListDescriptor, ListTemplate, SchemaIssue, SchemaRegistry,
};
pub use seed::{AssetOutcome, DefaultAsset, SeedCatalog, SeedDataset, SeedLoader, SeedOutcome};
pub use store::{
    AssetRef, ErrorClass, FieldDefinition, FieldInfo, FieldUpdate, ItemFields, ListHandle,
    SiteStore, StoreError, StoreResult,
};
pub use trigger::read_or_provision;
