use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{ExportSummary, InsertStrategy, PageCursor};
use crate::error::{ExportError, Result};
use crate::extract::{remove_extract_file, CreateMode, ExtractStore};
use crate::logging::LogConfig;
use crate::schema::{metric_table_definition, SqlType};
use crate::service::{DataService, EvalMetricsSpec, FetchSpec, Interval, SeriesMap};
use crate::value::{render_timestamp, require_timestamp, Row, Value};

/// Time window metrics are evaluated over: `[start, end)` sampled every
/// `interval`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricWindow {
    pub start: String,
    pub end: String,
    pub interval: Interval,
}

impl MetricWindow {
    pub fn new(start: impl Into<String>, end: impl Into<String>, interval: Interval) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            interval,
        }
    }

    /// Daily window.
    pub fn daily(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self::new(start, end, Interval::Day)
    }

    /// Fails with [`ExportError::Timestamp`] when a bound does not parse.
    pub fn validate(&self) -> Result<()> {
        require_timestamp(&self.start)?;
        require_timestamp(&self.end)?;
        Ok(())
    }

    pub(crate) fn eval_spec(&self, ids: Vec<String>, metrics: &[String]) -> EvalMetricsSpec {
        EvalMetricsSpec {
            ids,
            expressions: metrics.to_vec(),
            start: self.start.clone(),
            end: self.end.clone(),
            interval: self.interval,
        }
    }
}

/// Expands evaluated series into rows `[id, start + i * interval, m1[i], ...]`.
///
/// Ids are visited in the given order. Each entity contributes one row per
/// sample of its first metric's series; without that series it contributes
/// nothing. Any other metric that is missing or shorter yields `0.0`, and a
/// null sample yields a null cell.
pub fn expand_series(
    metrics: &[String],
    ids: &[String],
    series: &SeriesMap,
    interval: Interval,
) -> Result<Vec<Row>> {
    let Some(first_metric) = metrics.first() else {
        return Err(ExportError::invalid_argument(
            "at least one metric is required",
        ));
    };

    let mut rows = Vec::new();
    for id in ids {
        let Some(by_metric) = series.get(id) else {
            debug!(id = %id, "No series returned");
            continue;
        };
        let Some(first) = by_metric.get(first_metric) else {
            debug!(id = %id, metric = %first_metric, "First metric missing");
            continue;
        };

        for i in 0..first.len() {
            let step = u32::try_from(i)
                .ok()
                .and_then(|steps| interval.advance(first.start, steps))
                .ok_or_else(|| {
                    let start = render_timestamp(&first.start);
                    ExportError::Timestamp(format!("{start} + {i} steps"))
                })?;

            let mut row = Vec::with_capacity(metrics.len() + 2);
            row.push(Value::Text(id.clone()));
            row.push(Value::Text(render_timestamp(&step)));
            for metric in metrics {
                let sample = by_metric.get(metric).and_then(|s| s.data.get(i).copied());
                row.push(match sample {
                    None => Value::Double(0.0),
                    Some(None) => Value::Null,
                    Some(Some(v)) => Value::Double(v),
                });
            }
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Exports evaluated metric series of one entity type into an extract.
#[derive(Debug, Clone)]
pub struct MetricsTableExport {
    type_name: String,
    table: String,
    metrics: Vec<String>,
    window: MetricWindow,
    filter: Option<String>,
    limit: u64,
    num_sources: u64,
    file: PathBuf,
    create_mode: CreateMode,
    insert_strategy: InsertStrategy,
    log: LogConfig,
    start_type: SqlType,
}

impl MetricsTableExport {
    pub fn new(
        type_name: impl Into<String>,
        metrics: Vec<String>,
        window: MetricWindow,
        file: impl Into<PathBuf>,
    ) -> Self {
        let type_name = type_name.into();
        Self {
            table: type_name.clone(),
            type_name,
            metrics,
            window,
            filter: None,
            limit: 100,
            num_sources: 100,
            file: file.into(),
            create_mode: CreateMode::CreateAndReplace,
            insert_strategy: InsertStrategy::PerPage,
            log: LogConfig::default(),
            start_type: SqlType::Text,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn num_sources(mut self, num_sources: u64) -> Self {
        self.num_sources = num_sources;
        self
    }

    pub fn create_mode(mut self, mode: CreateMode) -> Self {
        self.create_mode = mode;
        self
    }

    /// Defaults to [`InsertStrategy::PerPage`].
    pub fn insert_strategy(mut self, strategy: InsertStrategy) -> Self {
        self.insert_strategy = strategy;
        self
    }

    /// Type of the `start` column, text or date.
    pub fn start_type(mut self, start_type: SqlType) -> Self {
        self.start_type = start_type;
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

    #[instrument(skip(self, service, store), fields(type_name = %self.type_name, metrics = self.metrics.len(), file = %self.file.display()))]
    pub async fn run(
        &self,
        service: &dyn DataService,
        store: &dyn ExtractStore,
    ) -> Result<ExportSummary> {
        let mut cursor = PageCursor::new(self.limit, self.num_sources)?;
        let definition =
            metric_table_definition(self.table.clone(), &self.metrics, self.start_type)?;
        self.window.validate()?;

        remove_extract_file(&self.file)?;
        store.create(&self.file, &definition, self.create_mode)?;

        let mut summary = ExportSummary::default();
        let mut buffered: Vec<Row> = Vec::new();

        while cursor.has_next() {
            let spec = FetchSpec {
                filter: self.filter.clone(),
                include: "id".to_string(),
                limit: cursor.page_size(),
                offset: cursor.offset(),
            };
            let page = service.fetch(&self.type_name, &spec).await?;
            let ids = page.ids();
            summary.pages += 1;
            summary.entities += ids.len();

            if !ids.is_empty() {
                let eval = self.window.eval_spec(ids.clone(), &self.metrics);
                let series = service.eval_metrics(&self.type_name, &eval).await?;
                let rows = expand_series(&self.metrics, &ids, &series, self.window.interval)?;
                if self.log.log_pages {
                    debug!(offset = spec.offset, ids = ids.len(), rows = rows.len(), "Expanded page");
                }
                buffered.extend(rows);
            }

            if self.insert_strategy == InsertStrategy::PerPage && !buffered.is_empty() {
                let rows = std::mem::take(&mut buffered);
                summary.rows_written += store.insert(&self.file, &definition, rows)?;
                summary.inserts += 1;
            }

            cursor.advance(page.has_more);
        }

        if !buffered.is_empty() {
            summary.rows_written += store.insert(&self.file, &definition, buffered)?;
            summary.inserts += 1;
        }

        info!(
            pages = summary.pages,
            rows = summary.rows_written,
            "Metrics export complete"
        );
        Ok(summary)
    }
}
