use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::{default_project, Project, PublishedDatasource, Publisher, TableauConfig};
use crate::error::{ExportError, Result};
use crate::logging::{truncate_field, LogConfig};
use crate::security::SecureString;

const AUTH_HEADER: &str = "X-Tableau-Auth";
const PROJECT_PAGE_SIZE: u32 = 100;

/// A signed-in REST session.
#[derive(Debug)]
pub struct TableauSession {
    token: SecureString,
    site_id: String,
}

impl TableauSession {
    pub fn site_id(&self) -> &str {
        &self.site_id
    }
}

#[derive(Deserialize)]
struct SignInResponse {
    credentials: SignInCredentials,
}

#[derive(Deserialize)]
struct SignInCredentials {
    token: String,
    site: SiteRef,
}

#[derive(Deserialize)]
struct SiteRef {
    id: String,
}

#[derive(Deserialize)]
struct ProjectsResponse {
    pagination: Pagination,
    #[serde(default)]
    projects: ProjectList,
}

#[derive(Deserialize, Default)]
struct ProjectList {
    #[serde(default)]
    project: Vec<Project>,
}

// Tableau reports pagination counters as strings.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    #[serde(deserialize_with = "count")]
    page_number: u32,
    #[serde(deserialize_with = "count")]
    page_size: u32,
    #[serde(deserialize_with = "count")]
    total_available: u32,
}

fn count<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u32),
        Text(String),
    }

    match Count::deserialize(deserializer)? {
        Count::Number(n) => Ok(n),
        Count::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize)]
struct DatasourceResponse {
    datasource: DatasourceItem,
}

#[derive(Deserialize)]
struct DatasourceItem {
    id: String,
    name: String,
    project: ProjectRef,
}

#[derive(Serialize, Deserialize)]
struct ProjectRef {
    id: String,
}

/// Tableau Server REST client.
#[derive(Clone)]
pub struct TableauServerClient {
    config: Arc<TableauConfig>,
    client: Client,
    log: LogConfig,
}

impl TableauServerClient {
    pub fn new(config: TableauConfig) -> Result<Self> {
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

    pub fn config(&self) -> &TableauConfig {
        &self.config
    }

    #[instrument(skip(self), fields(server = %self.config.server_url(), site = %self.config.site()))]
    pub async fn sign_in(&self) -> Result<TableauSession> {
        let body = json!({
            "credentials": {
                "name": self.config.user_name(),
                "password": self.config.password().expose(),
                "site": { "contentUrl": self.config.site() }
            }
        });
        let request = self
            .client
            .post(self.config.api_url("auth/signin"))
            .header("Accept", "application/json")
            .json(&body);

        let response: SignInResponse = self.send(request).await?;
        debug!(site_id = %response.credentials.site.id, "Signed in");
        Ok(TableauSession {
            token: SecureString::new(response.credentials.token),
            site_id: response.credentials.site.id,
        })
    }

    pub async fn sign_out(&self, session: &TableauSession) -> Result<()> {
        let response = self
            .client
            .post(self.config.api_url("auth/signout"))
            .header(AUTH_HEADER, session.token.expose())
            .send()
            .await
            .map_err(ExportError::network)?;
        check_status(response, self.log.max_field_length).await?;
        debug!("Signed out");
        Ok(())
    }

    /// Lists every project on the session's site, following pagination.
    pub async fn list_projects(&self, session: &TableauSession) -> Result<Vec<Project>> {
        let url = self
            .config
            .api_url(&format!("sites/{}/projects", session.site_id));
        let mut projects = Vec::new();
        let mut page_number = 1u32;

        loop {
            let request = self
                .authorized(self.client.get(&url), session)
                .query(&[("pageSize", PROJECT_PAGE_SIZE), ("pageNumber", page_number)]);
            let page: ProjectsResponse = self.send(request).await?;
            let received = page.projects.project.len();
            projects.extend(page.projects.project);

            let seen = page
                .pagination
                .page_number
                .saturating_mul(page.pagination.page_size);
            if received == 0 || seen >= page.pagination.total_available {
                break;
            }
            page_number += 1;
        }

        debug!(count = projects.len(), "Listed projects");
        Ok(projects)
    }

    /// Uploads `path` as datasource `name` into `project_id`, overwriting any
    /// datasource of the same name.
    #[instrument(skip(self, session, path), fields(path = %path.display()))]
    pub async fn publish_datasource(
        &self,
        session: &TableauSession,
        project_id: &str,
        path: &Path,
        name: &str,
    ) -> Result<PublishedDatasource> {
        let contents = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(name)
            .to_string();

        let payload = json!({
            "datasource": {
                "name": name,
                "project": ProjectRef { id: project_id.to_string() }
            }
        });
        let boundary = multipart_boundary();
        let body = multipart_body(&boundary, &payload.to_string(), &file_name, &contents);

        let url = self
            .config
            .api_url(&format!("sites/{}/datasources", session.site_id));
        let request = self
            .authorized(self.client.post(&url), session)
            .query(&[("overwrite", "true")])
            .header(
                "Content-Type",
                format!("multipart/mixed; boundary={boundary}"),
            )
            .body(body);

        let response: DatasourceResponse = self.send(request).await?;
        Ok(PublishedDatasource {
            id: response.datasource.id,
            name: response.datasource.name,
            project_id: response.datasource.project.id,
        })
    }

    fn authorized(&self, request: RequestBuilder, session: &TableauSession) -> RequestBuilder {
        request
            .header(AUTH_HEADER, session.token.expose())
            .header("Accept", "application/json")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.map_err(ExportError::network)?;
        let response = check_status(response, self.log.max_field_length).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ExportError::Serialization(e.to_string()))
    }
}

async fn check_status(response: Response, max_body: usize) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = truncate_field(&response.text().await.unwrap_or_default(), max_body);
    match status.as_u16() {
        401 | 403 => Err(ExportError::Authentication { message: body }),
        404 => Err(ExportError::NotFound { message: body }),
        status => Err(ExportError::Service {
            status,
            message: body,
        }),
    }
}

fn multipart_boundary() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("tab-extract-{nanos:x}")
}

fn multipart_body(boundary: &str, payload: &str, file_name: &str, contents: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(contents.len() + payload.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\n\
             Content-Disposition: name=\"request_payload\"\r\n\
             Content-Type: application/json\r\n\r\n\
             {payload}\r\n\
             --{boundary}\r\n\
             Content-Disposition: name=\"tableau_datasource\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[async_trait]
impl Publisher for TableauServerClient {
    /// Signs in, publishes to the default project, and signs out on every
    /// path once signed in.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    async fn publish(&self, path: &Path) -> Result<PublishedDatasource> {
        let name = self.config.datasource_name_for(path)?;
        let session = self.sign_in().await?;

        let published = async {
            let projects = self.list_projects(&session).await?;
            let project = default_project(&projects)?;
            self.publish_datasource(&session, &project.id, path, &name)
                .await
        }
        .await;

        if let Err(e) = self.sign_out(&session).await {
            warn!(error = %e, "Failed to sign out of Tableau Server");
        }

        let published = published?;
        info!(datasource_id = %published.id, name = %published.name, "Published datasource");
        Ok(published)
    }
}
