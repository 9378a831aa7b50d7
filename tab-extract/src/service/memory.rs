//! In-memory implementation of DataService for testing and development.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::instrument;

use super::{DataService, EvalMetricsSpec, FetchSpec, MetricSeries, Page, SeriesMap};
use crate::error::{ExportError, Result};

/// Serves fixture entities and metric series with the platform's paging
/// contract, and records every request it receives.
///
/// Filters are recorded but not evaluated.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use tab_extract::service::{DataService, FetchSpec, InMemoryDataService};
///
/// # #[tokio::main]
/// # async fn main() {
/// let service = InMemoryDataService::new()
///     .with_entities("Bulb", vec![json!({"id": "b1"}), json!({"id": "b2"})]);
///
/// let spec = FetchSpec { filter: None, include: "id".into(), limit: 1, offset: 0 };
/// let page = service.fetch("Bulb", &spec).await.unwrap();
/// assert_eq!(page.objs.len(), 1);
/// assert!(page.has_more);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryDataService {
    entities: Arc<HashMap<String, Vec<serde_json::Value>>>,
    series: Arc<SeriesMap>,
    fetches: Arc<RwLock<Vec<(String, FetchSpec)>>>,
    evals: Arc<RwLock<Vec<(String, EvalMetricsSpec)>>>,
}

impl InMemoryDataService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the entities returned for `type_name`, in fetch order.
    pub fn with_entities(mut self, type_name: impl Into<String>, objs: Vec<serde_json::Value>) -> Self {
        Arc::make_mut(&mut self.entities).insert(type_name.into(), objs);
        self
    }

    /// Registers one evaluated series.
    pub fn with_series(
        mut self,
        id: impl Into<String>,
        metric: impl Into<String>,
        series: MetricSeries,
    ) -> Self {
        Arc::make_mut(&mut self.series)
            .entry(id.into())
            .or_default()
            .insert(metric.into(), series);
        self
    }

    /// Every fetch received so far, with its type name.
    pub async fn fetch_requests(&self) -> Vec<(String, FetchSpec)> {
        self.fetches.read().await.clone()
    }

    /// Every metric evaluation received so far, with its type name.
    pub async fn eval_requests(&self) -> Vec<(String, EvalMetricsSpec)> {
        self.evals.read().await.clone()
    }
}

#[async_trait]
impl DataService for InMemoryDataService {
    #[instrument(skip(self, spec))]
    async fn fetch(&self, type_name: &str, spec: &FetchSpec) -> Result<Page> {
        self.fetches
            .write()
            .await
            .push((type_name.to_string(), spec.clone()));

        let objs = self
            .entities
            .get(type_name)
            .ok_or_else(|| ExportError::NotFound {
                message: format!("type '{type_name}' is not registered"),
            })?;

        let total = objs.len() as u64;
        let start = spec.offset.min(total) as usize;
        let end = spec.offset.saturating_add(spec.limit).min(total) as usize;

        Ok(Page {
            objs: objs[start..end].to_vec(),
            has_more: (end as u64) < total,
        })
    }

    #[instrument(skip(self, spec))]
    async fn eval_metrics(&self, type_name: &str, spec: &EvalMetricsSpec) -> Result<SeriesMap> {
        self.evals
            .write()
            .await
            .push((type_name.to_string(), spec.clone()));

        let mut result = SeriesMap::new();
        for id in &spec.ids {
            let Some(by_metric) = self.series.get(id) else {
                continue;
            };
            let selected: HashMap<String, MetricSeries> = spec
                .expressions
                .iter()
                .filter_map(|expr| by_metric.get(expr).map(|s| (expr.clone(), s.clone())))
                .collect();
            result.insert(id.clone(), selected);
        }
        Ok(result)
    }
}
