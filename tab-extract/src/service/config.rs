use std::time::Duration;

use crate::error::{ExportError, Result};
use crate::security::SecureString;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Credentials for the platform REST API.
#[derive(Debug, Clone)]
pub enum PlatformAuth {
    /// HTTP basic authentication.
    Basic {
        user: String,
        password: SecureString,
    },
    /// A pre-issued token sent in the `Authorization` header.
    Token(SecureString),
}

/// Connection settings for [`PlatformClient`](super::PlatformClient).
///
/// ```rust
/// use std::time::Duration;
/// use tab_extract::service::{PlatformAuth, PlatformConfig};
///
/// let config = PlatformConfig::new("https://platform.example.com", "acme", "prod")
///     .with_auth(PlatformAuth::Token("secret".into()))
///     .with_timeout(Duration::from_secs(30));
///
/// assert_eq!(
///     config.type_url("SmartBulb"),
///     "https://platform.example.com/api/1/acme/prod/SmartBulb"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    endpoint: String,
    tenant: String,
    tag: String,
    auth: Option<PlatformAuth>,
    timeout: Duration,
}

impl PlatformConfig {
    pub fn new(endpoint: impl Into<String>, tenant: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            tenant: tenant.into(),
            tag: tag.into(),
            auth: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Builds a configuration from `PLATFORM_URL`, `PLATFORM_TENANT`,
    /// `PLATFORM_TAG` and either `PLATFORM_TOKEN` or
    /// `PLATFORM_USER`/`PLATFORM_PASSWORD`.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .map_err(|_| ExportError::Configuration(format!("{name} is not set")))
        };

        let mut config = Self::new(var("PLATFORM_URL")?, var("PLATFORM_TENANT")?, var("PLATFORM_TAG")?);
        if let Ok(token) = std::env::var("PLATFORM_TOKEN") {
            config = config.with_auth(PlatformAuth::Token(token.into()));
        } else if let Ok(user) = std::env::var("PLATFORM_USER") {
            let password = var("PLATFORM_PASSWORD")?;
            config = config.with_auth(PlatformAuth::Basic {
                user,
                password: password.into(),
            });
        }
        Ok(config)
    }

    pub fn with_auth(mut self, auth: PlatformAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn auth(&self) -> Option<&PlatformAuth> {
        self.auth.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Base URL of a type's REST resource.
    pub fn type_url(&self, type_name: &str) -> String {
        format!(
            "{}/api/1/{}/{}/{}",
            self.endpoint, self.tenant, self.tag, type_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = PlatformConfig::new("http://localhost:8080/", "t", "dev")
            .with_timeout(Duration::from_secs(5))
            .with_auth(PlatformAuth::Basic {
                user: "bob".into(),
                password: "pw".into(),
            });

        assert_eq!(config.endpoint(), "http://localhost:8080");
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.type_url("Bulb"), "http://localhost:8080/api/1/t/dev/Bulb");
        assert!(matches!(config.auth(), Some(PlatformAuth::Basic { user, .. }) if user == "bob"));
    }

    #[test]
    fn test_auth_debug_is_redacted() {
        let auth = PlatformAuth::Token("abc123".into());
        assert!(!format!("{auth:?}").contains("abc123"));
    }
}
