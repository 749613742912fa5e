//! Operator configuration file.
//!
//! ```toml
//! [site]
//! site_url = "https://contoso.sharepoint.com/sites/web"
//! timeout_secs = 30
//!
//! [provisioner]
//! list_settle_delay_ms = 1000
//! seed = true
//!
//! [provisioner.retry]
//! max_attempts = 3
//! ```
//!
//! The access token is never read from the file's `[site]` table when the
//! environment provides one.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use smartsite_provisioner::ProvisionerConfig;
use smartsite_sprest::{SITE_URL_ENV, SpRestConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Target site. Falls back to the environment when absent.
    #[serde(default)]
    pub site: Option<SpRestConfig>,

    #[serde(default)]
    pub provisioner: ProvisionerConfig,
}

impl AppConfig {
    /// Load from `path` if given, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// environment holds a malformed site URL.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        match config.site.as_mut() {
            Some(site) => site.apply_env()?,
            None if std::env::var_os(SITE_URL_ENV).is_some() => {
                config.site = Some(SpRestConfig::from_env()?);
            }
            None => {}
        }

        Ok(config)
    }

    /// Parse a config file. JSON by extension, TOML otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;

        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config {}", path.display()))
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config {}", path.display()))
        }
    }

    /// Site settings, or an error telling the operator how to provide them.
    ///
    /// # Errors
    ///
    /// Returns an error if no site is configured.
    pub fn site(&self) -> Result<&SpRestConfig> {
        self.site.as_ref().with_context(|| {
            format!("No site configured: add a [site] table or set {SITE_URL_ENV}")
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::io::Write;
    use std::time::Duration;

    use tempfile::NamedTempFile;

    use super::*;

    fn write_config(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_toml_sections() {
        let file = write_config(
            ".toml",
            r#"
[site]
site_url = "https://contoso.sharepoint.com/sites/web"
access_token = "t0ken"
timeout_secs = 10

[provisioner]
list_settle_delay_ms = 0
seed = false

[provisioner.retry]
max_attempts = 5
"#,
        );

        let config = AppConfig::from_file(file.path()).unwrap();

        let site = config.site().unwrap();
        assert_eq!(site.timeout, Duration::from_secs(10));
        assert_eq!(site.access_token, "t0ken");
        assert!(!config.provisioner.seed);
        assert_eq!(config.provisioner.list_settle_delay, Duration::ZERO);
        assert_eq!(config.provisioner.retry.max_attempts, 5);
        assert!(config.provisioner.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = write_config(".toml", "");

        let config = AppConfig::from_file(file.path()).unwrap();

        assert!(config.site.is_none());
        assert!(config.site().is_err());
        assert_eq!(config.provisioner, ProvisionerConfig::default());
    }

    #[test]
    fn test_json_by_extension() {
        let file = write_config(".json", r#"{ "provisioner": { "seed": false } }"#);

        let config = AppConfig::from_file(file.path()).unwrap();

        assert!(!config.provisioner.seed);
    }

    #[test]
    fn test_malformed_file_names_path() {
        let file = write_config(".toml", "[provisioner\nseed = ");

        let err = AppConfig::from_file(file.path()).unwrap_err();

        assert!(err.to_string().contains("Failed to parse config"));
    }
}
