use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{DataService, EvalMetricsSpec, FetchSpec, Page, PlatformAuth, PlatformConfig, SeriesMap};
use crate::error::{ExportError, Result};
use crate::logging::{truncate_field, LogConfig};

/// HTTP client for the platform's type REST API.
#[derive(Clone)]
pub struct PlatformClient {
    config: Arc<PlatformConfig>,
    client: Client,
    log: LogConfig,
}

#[derive(Serialize)]
struct SpecEnvelope<'a, T> {
    spec: &'a T,
}

#[derive(Deserialize)]
struct EvalMetricsResponse {
    #[serde(default)]
    result: SeriesMap,
}

impl PlatformClient {
    /// Create a new client with the given configuration.
    pub fn new(config: PlatformConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                ExportError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            config: Arc::new(config),
            client,
            log: LogConfig::default(),
        })
    }

    /// Error bodies are truncated to [`LogConfig::max_field_length`].
    pub fn with_log_config(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    async fn call<B, T>(&self, type_name: &str, action: &str, spec: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.config.type_url(type_name);
        let mut request = self
            .client
            .post(&url)
            .query(&[("action", action)])
            .header("Accept", "application/json")
            .json(&SpecEnvelope { spec });

        request = match self.config.auth() {
            Some(PlatformAuth::Basic { user, password }) => {
                request.basic_auth(user, Some(password.expose()))
            }
            Some(PlatformAuth::Token(token)) => request.header("Authorization", token.expose()),
            None => request,
        };

        let response = request.send().await.map_err(ExportError::network)?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ExportError::Serialization(e.to_string()));
        }

        let body = truncate_field(
            &response.text().await.unwrap_or_default(),
            self.log.max_field_length,
        );
        match status.as_u16() {
            401 | 403 => Err(ExportError::Authentication { message: body }),
            404 => Err(ExportError::NotFound { message: body }),
            status => Err(ExportError::Service {
                status,
                message: body,
            }),
        }
    }
}

#[async_trait]
impl DataService for PlatformClient {
    #[instrument(skip(self, spec), fields(offset = spec.offset, limit = spec.limit))]
    async fn fetch(&self, type_name: &str, spec: &FetchSpec) -> Result<Page> {
        let page: Page = self.call(type_name, "fetch", spec).await?;
        debug!(objs = page.objs.len(), has_more = page.has_more, "Fetched page");
        Ok(page)
    }

    #[instrument(skip(self, spec), fields(ids = spec.ids.len(), expressions = spec.expressions.len()))]
    async fn eval_metrics(&self, type_name: &str, spec: &EvalMetricsSpec) -> Result<SeriesMap> {
        let response: EvalMetricsResponse = self.call(type_name, "evalMetrics", spec).await?;
        Ok(response.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let config = PlatformConfig::new("http://localhost:1", "t", "dev");
        assert!(PlatformClient::new(config).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_unreachable_endpoint() {
        let config = PlatformConfig::new("http://localhost:1", "t", "dev");
        let client = PlatformClient::new(config).unwrap();
        let spec = FetchSpec {
            filter: None,
            include: "id".into(),
            limit: 1,
            offset: 0,
        };
        let result = client.fetch("Bulb", &spec).await;
        assert!(matches!(result, Err(ExportError::Network { .. })));
    }
}
