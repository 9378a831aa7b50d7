use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use super::{ExportSummary, InsertStrategy, PageCursor};
use crate::error::Result;
use crate::extract::{remove_extract_file, CreateMode, ExtractStore};
use crate::logging::LogConfig;
use crate::schema::{extract_field, FetchLayout, FieldSpec, ResolvedField};
use crate::service::{DataService, FetchSpec};
use crate::value::Row;

/// Exports entities of one type into an extract, one row per entity.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use tab_extract::export::FetchTableExport;
/// use tab_extract::extract::SqliteExtract;
/// use tab_extract::schema::{FieldDataType, FieldSpec};
/// use tab_extract::service::InMemoryDataService;
///
/// # #[tokio::main]
/// # async fn main() -> tab_extract::Result<()> {
/// let dir = tempfile::tempdir()?;
/// let service = InMemoryDataService::new().with_entities(
///     "SmartBulb",
///     vec![json!({"id": "b1", "wattage": 60}), json!({"id": "b2", "wattage": 40})],
/// );
///
/// let export = FetchTableExport::new(
///     "SmartBulb",
///     vec![
///         FieldSpec::new("id", FieldDataType::String, false),
///         FieldSpec::new("wattage", FieldDataType::Int, true),
///     ],
///     dir.path().join("bulbs.db"),
/// )
/// .limit(1)
/// .num_sources(10);
///
/// let summary = export.run(&service, &SqliteExtract::new()).await?;
/// assert_eq!(summary.rows_written, 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FetchTableExport {
    type_name: String,
    table: String,
    fields: Vec<FieldSpec>,
    filter: Option<String>,
    limit: u64,
    num_sources: u64,
    file: PathBuf,
    create_mode: CreateMode,
    insert_strategy: InsertStrategy,
    log: LogConfig,
}

impl FetchTableExport {
    /// Creates an export of `type_name` into `file`. The table is named after
    /// the type unless [`table`](Self::table) overrides it.
    pub fn new(
        type_name: impl Into<String>,
        fields: Vec<FieldSpec>,
        file: impl Into<PathBuf>,
    ) -> Self {
        let type_name = type_name.into();
        Self {
            table: type_name.clone(),
            type_name,
            fields,
            filter: None,
            limit: 2000,
            num_sources: 2000,
            file: file.into(),
            create_mode: CreateMode::CreateAndReplace,
            insert_strategy: InsertStrategy::AtEnd,
            log: LogConfig::default(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Filter expression forwarded to every fetch.
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Page size.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Maximum number of entities to export.
    pub fn num_sources(mut self, num_sources: u64) -> Self {
        self.num_sources = num_sources;
        self
    }

    pub fn create_mode(mut self, mode: CreateMode) -> Self {
        self.create_mode = mode;
        self
    }

    /// Defaults to [`InsertStrategy::AtEnd`].
    pub fn insert_strategy(mut self, strategy: InsertStrategy) -> Self {
        self.insert_strategy = strategy;
        self
    }

    /// Enables per-page logging through [`LogConfig::log_pages`].
    pub fn log_config(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Runs the export.
    ///
    /// Arguments are validated before the extract file is touched. The
    /// previous file at the target path is deleted, the table is created,
    /// and the fetched entities are flattened page by page.
    #[instrument(skip(self, service, store), fields(type_name = %self.type_name, store = store.name(), file = %self.file.display()))]
    pub async fn run(
        &self,
        service: &dyn DataService,
        store: &dyn ExtractStore,
    ) -> Result<ExportSummary> {
        let mut cursor = PageCursor::new(self.limit, self.num_sources)?;
        let layout = FetchLayout::derive(self.table.clone(), self.fields.clone())?;
        let include = layout.include_spec();

        remove_extract_file(&self.file)?;
        store.create(&self.file, &layout.definition, self.create_mode)?;

        let mut summary = ExportSummary::default();
        let mut buffered: Vec<Row> = Vec::new();

        while cursor.has_next() {
            let spec = FetchSpec {
                filter: self.filter.clone(),
                include: include.clone(),
                limit: cursor.page_size(),
                offset: cursor.offset(),
            };
            let page = service.fetch(&self.type_name, &spec).await?;
            if self.log.log_pages {
                debug!(
                    offset = spec.offset,
                    limit = spec.limit,
                    objs = page.objs.len(),
                    has_more = page.has_more,
                    "Fetched page"
                );
            }

            summary.pages += 1;
            summary.entities += page.objs.len();
            for entity in &page.objs {
                buffered.push(flatten(entity, &layout.fields)?);
            }

            if self.insert_strategy == InsertStrategy::PerPage && !buffered.is_empty() {
                let rows = std::mem::take(&mut buffered);
                summary.rows_written += store.insert(&self.file, &layout.definition, rows)?;
                summary.inserts += 1;
            }

            cursor.advance(page.has_more);
        }

        if !buffered.is_empty() {
            summary.rows_written += store.insert(&self.file, &layout.definition, buffered)?;
            summary.inserts += 1;
        }

        info!(
            pages = summary.pages,
            rows = summary.rows_written,
            "Fetch export complete"
        );
        Ok(summary)
    }
}

fn flatten(entity: &serde_json::Value, fields: &[ResolvedField]) -> Result<Row> {
    fields.iter().map(|field| extract_field(entity, field)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExportError;
    use crate::extract::SqliteExtract;
    use crate::schema::FieldDataType;
    use crate::service::InMemoryDataService;
    use crate::value::Value;
    use serde_json::json;

    fn bulbs(n: usize) -> Vec<serde_json::Value> {
        (0..n)
            .map(|i| json!({"id": format!("b{i}"), "wattage": 40 + i}))
            .collect()
    }

    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("id", FieldDataType::String, false),
            FieldSpec::new("wattage", FieldDataType::Int, true),
        ]
    }

    #[tokio::test]
    async fn test_requests_follow_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let service = InMemoryDataService::new().with_entities("SmartBulb", bulbs(10));
        let export = FetchTableExport::new("SmartBulb", fields(), dir.path().join("b.db"))
            .filter("wattage > 0")
            .limit(4)
            .num_sources(7);

        let summary = export.run(&service, &SqliteExtract::new()).await.unwrap();
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.rows_written, 7);
        assert_eq!(summary.inserts, 1);

        let requests = service.fetch_requests().await;
        let windows: Vec<(u64, u64)> = requests.iter().map(|(_, s)| (s.offset, s.limit)).collect();
        assert_eq!(windows, vec![(0, 4), (4, 3)]);
        assert_eq!(requests[0].1.include, "id,wattage");
        assert_eq!(requests[0].1.filter.as_deref(), Some("wattage > 0"));
    }

    #[tokio::test]
    async fn test_per_page_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let service = InMemoryDataService::new().with_entities("SmartBulb", bulbs(5));
        let export = FetchTableExport::new("SmartBulb", fields(), dir.path().join("b.db"))
            .limit(2)
            .num_sources(5)
            .insert_strategy(InsertStrategy::PerPage);

        let summary = export.run(&service, &SqliteExtract::new()).await.unwrap();
        assert_eq!(summary.inserts, 3);
        assert_eq!(summary.rows_written, 5);
    }

    #[tokio::test]
    async fn test_type_mismatch_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let service = InMemoryDataService::new()
            .with_entities("SmartBulb", vec![json!({"id": "b1", "wattage": "bright"})]);
        let export = FetchTableExport::new("SmartBulb", fields(), dir.path().join("b.db"));

        let err = export.run(&service, &SqliteExtract::new()).await.unwrap_err();
        assert!(matches!(err, ExportError::TypeMismatch { .. }));
    }

    #[test]
    fn test_flatten_order() {
        let layout = FetchLayout::derive("T", fields()).unwrap();
        let row = flatten(&json!({"wattage": 60, "id": "b1"}), &layout.fields).unwrap();
        assert_eq!(row, vec![Value::Text("b1".into()), Value::Int(60)]);
    }
}
