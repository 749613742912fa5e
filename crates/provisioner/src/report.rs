//! What a convergence run did.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::schema::ListTemplate;

/// Mutations a run performs (or attempts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProvisionAction {
    /// Materialize a list.
    CreateList { list: String, template: ListTemplate },
    /// Materialize every column of a list. Recorded only when the list as a
    /// whole could not be processed.
    EnsureColumns { list: String },
    /// Create one column.
    CreateColumn { list: String, column: String },
    /// Apply description/index metadata to a freshly created column.
    RefineColumn { list: String, column: String },
    /// Turn on indexing for an existing column.
    IndexColumn { list: String, column: String },
    /// Upload the shared placeholder asset.
    UploadAsset { library: String, file_name: String },
    /// Insert canned records into an empty list.
    SeedList { list: String, rows: usize },
}

impl ProvisionAction {
    /// Title of the list this action targets.
    pub fn list(&self) -> &str {
        match self {
            Self::CreateList { list, .. }
            | Self::EnsureColumns { list }
            | Self::CreateColumn { list, .. }
            | Self::RefineColumn { list, .. }
            | Self::IndexColumn { list, .. }
            | Self::SeedList { list, .. } => list,
            Self::UploadAsset { library, .. } => library,
        }
    }

    /// Get a description of the action.
    pub fn description(&self) -> String {
        match self {
            Self::CreateList { list, template } => format!("create list {list} ({template})"),
            Self::EnsureColumns { list } => format!("ensure columns of {list}"),
            Self::CreateColumn { list, column } => format!("create column {list}.{column}"),
            Self::RefineColumn { list, column } => format!("refine column {list}.{column}"),
            Self::IndexColumn { list, column } => format!("index column {list}.{column}"),
            Self::UploadAsset { library, file_name } => {
                format!("upload {file_name} to {library}")
            }
            Self::SeedList { list, rows } => format!("seed {list} with {rows} rows"),
        }
    }
}

/// Result of one convergence run.
///
/// A report with failed actions is still a successful run: failures are
/// isolated per resource and the run carries on.
#[derive(Debug, Clone, Serialize)]
pub struct ConvergenceReport {
    /// Actions that were taken.
    pub actions_taken: Vec<ProvisionAction>,
    /// Actions that failed, with the reason.
    pub actions_failed: Vec<(ProvisionAction, String)>,
    /// Number of lists in the registry.
    pub desired_lists: usize,
    /// Number of lists known to exist after phase 1.
    pub materialized_lists: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ConvergenceReport {
    /// Create an empty report for a registry of `desired_lists` lists.
    pub fn new(desired_lists: usize) -> Self {
        Self {
            actions_taken: Vec::new(),
            actions_failed: Vec::new(),
            desired_lists,
            materialized_lists: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Record a successful action.
    pub fn taken(&mut self, action: ProvisionAction) {
        self.actions_taken.push(action);
    }

    /// Record a failed action.
    pub fn failed(&mut self, action: ProvisionAction, reason: impl Into<String>) {
        self.actions_failed.push((action, reason.into()));
    }

    /// Stamp the finish time.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Check if every attempted action succeeded.
    pub fn converged(&self) -> bool {
        self.actions_failed.is_empty()
    }

    /// Check if the run found nothing to do.
    pub fn is_noop(&self) -> bool {
        self.actions_taken.is_empty() && self.actions_failed.is_empty()
    }

    /// Taken actions matching a predicate.
    pub fn taken_where(&self, predicate: impl Fn(&ProvisionAction) -> bool) -> Vec<&ProvisionAction> {
        self.actions_taken.iter().filter(|a| predicate(a)).collect()
    }

    /// Lists that were created during this run.
    pub fn created_lists(&self) -> Vec<&str> {
        self.actions_taken
            .iter()
            .filter_map(|a| match a {
                ProvisionAction::CreateList { list, .. } => Some(list.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Check if anything targeting `list` failed.
    pub fn has_failures_for(&self, list: &str) -> bool {
        self.actions_failed.iter().any(|(a, _)| a.list() == list)
    }
}
