//! Declarative schema descriptors.
//!
//! A [`SchemaRegistry`] is the desired state: an ordered set of lists, each
//! with its columns. Descriptors are plain data and never change at runtime.

use std::collections::HashSet;
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Field shown by lookup columns unless the descriptor says otherwise.
pub const DEFAULT_LOOKUP_FIELD: &str = "Title";

/// Column every list already has. Never materialized.
pub const TITLE_FIELD: &str = "Title";

/// Column type, with the data only some types carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    MultilineText,
    Choice {
        choices: Vec<String>,
    },
    Boolean,
    Number,
    DateTime,
    Url,
    Lookup {
        /// Title of the list the lookup points at.
        list: String,
        /// Field of the target list shown in the lookup.
        display_field: String,
    },
}

impl ColumnKind {
    /// Short name used in logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::MultilineText => "multiline_text",
            Self::Choice { .. } => "choice",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::DateTime => "date_time",
            Self::Url => "url",
            Self::Lookup { .. } => "lookup",
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Store list type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListTemplate {
    GenericList,
    DocumentLibrary,
    Events,
    PictureLibrary,
}

impl ListTemplate {
    /// Numeric template id understood by the store.
    pub const fn id(self) -> u32 {
        match self {
            Self::GenericList => 100,
            Self::DocumentLibrary => 101,
            Self::Events => 106,
            Self::PictureLibrary => 109,
        }
    }

    /// Template for a numeric id, if known.
    pub const fn from_id(id: u32) -> Option<Self> {
        match id {
            100 => Some(Self::GenericList),
            101 => Some(Self::DocumentLibrary),
            106 => Some(Self::Events),
            109 => Some(Self::PictureLibrary),
            _ => None,
        }
    }
}

impl fmt::Display for ListTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenericList => write!(f, "generic_list"),
            Self::DocumentLibrary => write!(f, "document_library"),
            Self::Events => write!(f, "events"),
            Self::PictureLibrary => write!(f, "picture_library"),
        }
    }
}

/// One target column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Stable identifier, unique within its list.
    pub internal_name: String,
    /// Name shown to users. Defaults to the internal name.
    pub display_name: String,
    #[serde(flatten)]
    pub kind: ColumnKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub indexed: bool,
}

impl ColumnDescriptor {
    /// Create a column of the given kind.
    pub fn new(internal_name: impl Into<String>, kind: ColumnKind) -> Self {
        let internal_name = internal_name.into();
        Self {
            display_name: internal_name.clone(),
            internal_name,
            kind,
            description: String::new(),
            indexed: false,
        }
    }

    /// Single line of text.
    pub fn text(internal_name: impl Into<String>) -> Self {
        Self::new(internal_name, ColumnKind::Text)
    }

    /// Multiple lines of text.
    pub fn multiline(internal_name: impl Into<String>) -> Self {
        Self::new(internal_name, ColumnKind::MultilineText)
    }

    /// Choice from a fixed, ordered set.
    pub fn choice<I, S>(internal_name: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            internal_name,
            ColumnKind::Choice {
                choices: choices.into_iter().map(Into::into).collect(),
            },
        )
    }

    /// Yes/no.
    pub fn boolean(internal_name: impl Into<String>) -> Self {
        Self::new(internal_name, ColumnKind::Boolean)
    }

    /// Number.
    pub fn number(internal_name: impl Into<String>) -> Self {
        Self::new(internal_name, ColumnKind::Number)
    }

    /// Date and time.
    pub fn date_time(internal_name: impl Into<String>) -> Self {
        Self::new(internal_name, ColumnKind::DateTime)
    }

    /// Hyperlink or picture.
    pub fn url(internal_name: impl Into<String>) -> Self {
        Self::new(internal_name, ColumnKind::Url)
    }

    /// Lookup into another list of the same registry.
    pub fn lookup(internal_name: impl Into<String>, target_list: impl Into<String>) -> Self {
        Self::new(
            internal_name,
            ColumnKind::Lookup {
                list: target_list.into(),
                display_field: DEFAULT_LOOKUP_FIELD.to_string(),
            },
        )
    }

    /// Set the display name.
    #[must_use]
    pub fn titled(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Set the description.
    #[must_use]
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark the column as indexed.
    #[must_use]
    pub const fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Override the field a lookup column shows. No effect on other kinds.
    #[must_use]
    pub fn lookup_display(mut self, field: impl Into<String>) -> Self {
        if let ColumnKind::Lookup { display_field, .. } = &mut self.kind {
            *display_field = field.into();
        }
        self
    }

    /// Title of the lookup target list, for lookup columns.
    pub fn lookup_target(&self) -> Option<&str> {
        match &self.kind {
            ColumnKind::Lookup { list, .. } => Some(list),
            _ => None,
        }
    }

    /// Check if this is the implicit title column.
    pub fn is_title(&self) -> bool {
        self.internal_name.eq_ignore_ascii_case(TITLE_FIELD)
    }
}

/// One target list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDescriptor {
    /// Stable identifier. Used for idempotency checks and lookup resolution.
    pub title: String,
    pub template: ListTemplate,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
}

impl ListDescriptor {
    /// Create a list with no columns.
    pub fn new(title: impl Into<String>, template: ListTemplate) -> Self {
        Self {
            title: title.into(),
            template,
            description: String::new(),
            columns: Vec::new(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Append a column.
    #[must_use]
    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    /// Append several columns.
    #[must_use]
    pub fn columns(mut self, columns: impl IntoIterator<Item = ColumnDescriptor>) -> Self {
        self.columns.extend(columns);
        self
    }
}

/// Something wrong with a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaIssue {
    /// Two lists share a title.
    DuplicateList { title: String },
    /// Two columns of a list share an internal name.
    DuplicateColumn { list: String, column: String },
    /// A lookup names a list that is not in the registry.
    UnknownLookupTarget {
        list: String,
        column: String,
        target: String,
    },
    /// A choice column has nothing to choose from.
    EmptyChoices { list: String, column: String },
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateList { title } => write!(f, "list '{title}' is declared twice"),
            Self::DuplicateColumn { list, column } => {
                write!(f, "column '{column}' is declared twice on '{list}'")
            }
            Self::UnknownLookupTarget {
                list,
                column,
                target,
            } => write!(
                f,
                "lookup '{list}.{column}' targets '{target}', which is not in the registry"
            ),
            Self::EmptyChoices { list, column } => {
                write!(f, "choice column '{list}.{column}' has no choices")
            }
        }
    }
}

/// The full desired state: every list the site should have.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    lists: Vec<ListDescriptor>,
}

impl SchemaRegistry {
    /// Create a registry from lists in declaration order.
    pub fn new(lists: impl IntoIterator<Item = ListDescriptor>) -> Self {
        Self {
            lists: lists.into_iter().collect(),
        }
    }

    /// Lists in declaration order.
    pub fn lists(&self) -> &[ListDescriptor] {
        &self.lists
    }

    /// Find a list by title.
    pub fn get(&self, title: &str) -> Option<&ListDescriptor> {
        self.lists.iter().find(|l| l.title == title)
    }

    /// Number of lists.
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Total number of declared columns.
    pub fn column_count(&self) -> usize {
        self.lists.iter().map(|l| l.columns.len()).sum()
    }

    /// Check the registry for structural problems.
    pub fn validate(&self) -> Vec<SchemaIssue> {
        let titles: HashSet<&str> = self.lists.iter().map(|l| l.title.as_str()).collect();

        let duplicate_lists = self
            .lists
            .iter()
            .map(|l| l.title.as_str())
            .duplicates()
            .map(|title| SchemaIssue::DuplicateList {
                title: title.to_string(),
            });

        let column_issues = self.lists.iter().flat_map(|list| {
            let duplicates = list
                .columns
                .iter()
                .map(|c| c.internal_name.to_ascii_lowercase())
                .duplicates()
                .map(|column| SchemaIssue::DuplicateColumn {
                    list: list.title.clone(),
                    column,
                })
                .collect_vec();

            let per_column = list.columns.iter().filter_map(|column| match &column.kind {
                ColumnKind::Lookup { list: target, .. } if !titles.contains(target.as_str()) => {
                    Some(SchemaIssue::UnknownLookupTarget {
                        list: list.title.clone(),
                        column: column.internal_name.clone(),
                        target: target.clone(),
                    })
                }
                ColumnKind::Choice { choices } if choices.is_empty() => {
                    Some(SchemaIssue::EmptyChoices {
                        list: list.title.clone(),
                        column: column.internal_name.clone(),
                    })
                }
                _ => None,
            });

            duplicates.into_iter().chain(per_column).collect_vec()
        });

        duplicate_lists.chain(column_issues).collect()
    }
}
