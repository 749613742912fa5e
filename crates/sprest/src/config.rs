//! Configuration for the SharePoint REST store.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Environment variable holding the site URL.
pub const SITE_URL_ENV: &str = "SMARTSITE_SITE_URL";
/// Environment variable holding the bearer token.
pub const ACCESS_TOKEN_ENV: &str = "SMARTSITE_ACCESS_TOKEN";

/// Connection settings for one site.
#[derive(Clone, Serialize, Deserialize)]
pub struct SpRestConfig {
    /// Absolute URL of the site, e.g. `https://contoso.sharepoint.com/sites/web`.
    pub site_url: Url,

    /// OAuth bearer token. Never written back out.
    #[serde(default, skip_serializing)]
    pub access_token: String,

    /// Timeout for a single request.
    #[serde(rename = "timeout_secs", with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl fmt::Debug for SpRestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpRestConfig")
            .field("site_url", &self.site_url.as_str())
            .field("access_token", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl SpRestConfig {
    /// Create a config for `site_url` with default settings.
    pub fn new(site_url: Url, access_token: impl Into<String>) -> Self {
        Self {
            site_url,
            access_token: access_token.into(),
            timeout: default_timeout(),
            user_agent: default_user_agent(),
        }
    }

    /// Set the timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the site URL is missing or malformed.
    pub fn from_env() -> Result<Self> {
        let site_url = std::env::var(SITE_URL_ENV)
            .map_err(|_| Error::config_error(format!("{SITE_URL_ENV} is not set")))?;
        let token = std::env::var(ACCESS_TOKEN_ENV).unwrap_or_default();
        Ok(Self::new(site_url.parse()?, token))
    }

    /// Override settings with whatever the environment provides.
    ///
    /// # Errors
    ///
    /// Returns an error if the site URL in the environment is malformed.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var(SITE_URL_ENV) {
            self.site_url = url.parse()?;
        }
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            self.access_token = token;
        }
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.site_url.scheme(), "http" | "https") {
            return Err(Error::config_error(format!(
                "site_url must be http(s), got '{}'",
                self.site_url.scheme()
            )));
        }

        if self.access_token.trim().is_empty() {
            return Err(Error::config_error(format!(
                "access token is empty (set {ACCESS_TOKEN_ENV})"
            )));
        }

        if self.timeout.is_zero() {
            return Err(Error::config_error("timeout_secs must be greater than 0"));
        }

        Ok(())
    }

    /// Absolute URL of a REST endpoint below `_api/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the result is not a valid URL.
    pub fn api_url(&self, endpoint: &str) -> Result<Url> {
        let site = self.site_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{site}/_api/{endpoint}"))?)
    }
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("smartsite-provisioner/{}", env!("CARGO_PKG_VERSION"))
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
