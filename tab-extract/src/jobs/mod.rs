//! Scheduled metric export: a start phase that prepares the extract and
//! schedules one batch per entity, and a batch phase that evaluates and
//! inserts the metrics of a single entity.

mod scheduler;

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

pub use scheduler::{BatchScheduler, MetricBatch, QueuedScheduler};

use crate::error::Result;
use crate::export::{expand_series, MetricWindow, PageCursor};
use crate::extract::{remove_extract_file, CreateMode, ExtractStore};
use crate::schema::{metric_table_definition, SqlType, TableDefinition};
use crate::service::{DataService, FetchSpec};

const START_PAGE_SIZE: u64 = 2000;

/// Metric export split into per-entity batches.
///
/// The `start` column is typed as a date.
#[derive(Debug, Clone)]
pub struct MetricBatchJob {
    type_name: String,
    metrics: Vec<String>,
    window: MetricWindow,
    file: PathBuf,
    definition: TableDefinition,
    page_size: u64,
}

impl MetricBatchJob {
    /// Builds the job and its table definition; the table is named `table`.
    pub fn new(
        type_name: impl Into<String>,
        table: impl Into<String>,
        metrics: Vec<String>,
        window: MetricWindow,
        file: impl Into<PathBuf>,
    ) -> Result<Self> {
        let definition = metric_table_definition(table, &metrics, SqlType::Date)?;
        window.validate()?;
        Ok(Self {
            type_name: type_name.into(),
            metrics,
            window,
            file: file.into(),
            definition,
            page_size: START_PAGE_SIZE,
        })
    }

    /// Page size used to list entities in [`do_start`](Self::do_start).
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Recreates the extract and schedules one batch per entity of the type.
    /// Returns the number of batches scheduled.
    #[instrument(skip_all, fields(type_name = %self.type_name, file = %self.file.display()))]
    pub async fn do_start(
        &self,
        service: &dyn DataService,
        store: &dyn ExtractStore,
        scheduler: &dyn BatchScheduler,
    ) -> Result<usize> {
        let mut cursor = PageCursor::new(self.page_size, u64::MAX)?;

        info!("Creating extract");
        remove_extract_file(&self.file)?;
        store.create(&self.file, &self.definition, CreateMode::CreateIfNotExists)?;

        let mut scheduled = 0;
        while cursor.has_next() {
            let spec = FetchSpec {
                filter: None,
                include: "id".to_string(),
                limit: cursor.page_size(),
                offset: cursor.offset(),
            };
            let page = service.fetch(&self.type_name, &spec).await?;
            for id in page.ids() {
                scheduler.schedule(MetricBatch::new(id)).await?;
                scheduled += 1;
            }
            // The row budget is unbounded here, so an empty page ends the scan.
            cursor.advance(page.has_more && !page.objs.is_empty());
        }

        info!(scheduled, "Scheduled batches");
        Ok(scheduled)
    }

    /// Evaluates the metrics of the batch's entity and appends its rows.
    /// Returns the number of rows inserted.
    #[instrument(skip(self, service, store), fields(id = %batch.batch_context))]
    pub async fn process_batch(
        &self,
        batch: &MetricBatch,
        service: &dyn DataService,
        store: &dyn ExtractStore,
    ) -> Result<usize> {
        let ids = vec![batch.batch_context.clone()];
        let spec = self.window.eval_spec(ids.clone(), &self.metrics);
        let series = service.eval_metrics(&self.type_name, &spec).await?;
        let rows = expand_series(&self.metrics, &ids, &series, self.window.interval)?;
        if rows.is_empty() {
            return Ok(0);
        }
        store.insert(&self.file, &self.definition, rows)
    }
}
