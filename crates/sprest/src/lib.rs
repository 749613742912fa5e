//! SharePoint REST store for the SmartSite provisioner.
//!
//! [`SpRestStore`] implements [`SiteStore`](smartsite_provisioner::SiteStore)
//! against a site's `/_api` endpoints using a bearer token. HTTP failures are
//! classified into the provisioner's typed
//! [`StoreError`](smartsite_provisioner::StoreError) at this boundary, so the
//! convergence engine never looks at status codes or message text.
//!
//! # Example
//!
//! ```ignore
//! use smartsite_sprest::{SpRestConfig, SpRestStore};
//!
//! let config = SpRestConfig::from_env()?;
//! let store = SpRestStore::new(config)?;
//! let news = store.get_list("News").await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod client;
pub mod config;
pub mod error;
pub mod odata;

pub use client::SpRestStore;
pub use config::{ACCESS_TOKEN_ENV, SITE_URL_ENV, SpRestConfig};
pub use error::{Error, Result};
