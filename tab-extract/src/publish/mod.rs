//! Publishing extract files to Tableau Server as datasources.
//!
//! A publish signs in, locates the site's default project, uploads the
//! extract with overwrite semantics and signs out again, whether or not the
//! upload succeeded.

mod client;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use client::{TableauServerClient, TableauSession};

use crate::error::{ExportError, Result};
use crate::security::SecureString;

/// REST API version used when none is configured.
pub const DEFAULT_API_VERSION: &str = "3.19";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Name of the project datasources are published to.
pub const DEFAULT_PROJECT_NAME: &str = "Default";

/// A project on a Tableau site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Project {
    /// Whether this is the site's default project.
    pub fn is_default(&self) -> bool {
        self.name.eq_ignore_ascii_case(DEFAULT_PROJECT_NAME)
    }
}

/// Picks the default project, failing with
/// [`ExportError::DefaultProjectNotFound`] when the site has none.
pub fn default_project(projects: &[Project]) -> Result<&Project> {
    projects
        .iter()
        .find(|p| p.is_default())
        .ok_or(ExportError::DefaultProjectNotFound)
}

/// A datasource created or overwritten by a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedDatasource {
    pub id: String,
    pub name: String,
    pub project_id: String,
}

/// Uploads finished extracts.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, path: &Path) -> Result<PublishedDatasource>;
}

/// Connection settings for [`TableauServerClient`].
///
/// ```rust
/// use tab_extract::publish::TableauConfig;
///
/// let config = TableauConfig::new("https://tableau.example.com/", "analyst", "secret", "acme")
///     .with_datasource_name("SmartBulbs");
/// assert_eq!(
///     config.api_url("auth/signin"),
///     "https://tableau.example.com/api/3.19/auth/signin"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct TableauConfig {
    server_url: String,
    user_name: String,
    password: SecureString,
    site: String,
    api_version: String,
    timeout: Duration,
    datasource_name: Option<String>,
}

impl TableauConfig {
    /// `site` is the site's content URL; empty selects the default site.
    pub fn new(
        server_url: impl Into<String>,
        user_name: impl Into<String>,
        password: impl Into<SecureString>,
        site: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            user_name: user_name.into(),
            password: password.into(),
            site: site.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: DEFAULT_TIMEOUT,
            datasource_name: None,
        }
    }

    /// Reads `TABLEAU_SERVER_URL`, `TABLEAU_USER`, `TABLEAU_PASSWORD` and the
    /// optional `TABLEAU_SITE` and `TABLEAU_API_VERSION`.
    pub fn from_env() -> Result<Self> {
        let required = |name: &str| {
            std::env::var(name).map_err(|_| {
                ExportError::Configuration(format!("environment variable {name} is not set"))
            })
        };

        let mut config = Self::new(
            required("TABLEAU_SERVER_URL")?,
            required("TABLEAU_USER")?,
            SecureString::new(required("TABLEAU_PASSWORD")?),
            std::env::var("TABLEAU_SITE").unwrap_or_default(),
        );
        if let Ok(version) = std::env::var("TABLEAU_API_VERSION") {
            config = config.with_api_version(version);
        }
        Ok(config)
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the datasource name, which otherwise is the file stem.
    pub fn with_datasource_name(mut self, name: impl Into<String>) -> Self {
        self.datasource_name = Some(name.into());
        self
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn password(&self) -> &SecureString {
        &self.password
    }

    /// `{server}/api/{version}/{path}`.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}/{}", self.server_url, self.api_version, path)
    }

    /// Datasource name for the extract at `path`.
    pub fn datasource_name_for(&self, path: &Path) -> Result<String> {
        if let Some(name) = &self.datasource_name {
            return Ok(name.clone());
        }
        path.file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ExportError::invalid_argument(format!(
                    "cannot derive a datasource name from {}",
                    path.display()
                ))
            })
    }
}
