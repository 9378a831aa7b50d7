//! Platform data service: paged entity fetch and metric evaluation.
//!
//! Exports never talk to the platform directly; they receive a
//! [`DataService`] and issue [`FetchSpec`] and [`EvalMetricsSpec`] requests
//! through it. [`PlatformClient`] is the HTTP implementation and
//! [`InMemoryDataService`] serves fixtures.

mod client;
mod config;
mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Months, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

pub use client::PlatformClient;
pub use config::{PlatformAuth, PlatformConfig};
pub use memory::InMemoryDataService;

use crate::error::Result;
use crate::value::require_timestamp;

/// Paged fetch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    pub include: String,
    pub limit: u64,
    pub offset: u64,
}

/// One page of fetched entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(default)]
    pub objs: Vec<serde_json::Value>,
    #[serde(default)]
    pub has_more: bool,
}

impl Page {
    /// The `id` of every entity in the page that has a string or numeric id.
    pub fn ids(&self) -> Vec<String> {
        self.objs
            .iter()
            .filter_map(|obj| match obj.get("id")? {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()
    }
}

/// Sampling interval of an evaluated metric series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Interval {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Interval {
    /// Returns `ts` moved forward by `steps` intervals, or `None` on overflow.
    pub fn advance(&self, ts: NaiveDateTime, steps: u32) -> Option<NaiveDateTime> {
        let steps_i64 = i64::from(steps);
        match self {
            Interval::Minute => ts.checked_add_signed(Duration::try_minutes(steps_i64)?),
            Interval::Hour => ts.checked_add_signed(Duration::try_hours(steps_i64)?),
            Interval::Day => ts.checked_add_signed(Duration::try_days(steps_i64)?),
            Interval::Week => ts.checked_add_signed(Duration::try_weeks(steps_i64)?),
            Interval::Month => ts.checked_add_months(Months::new(steps)),
            Interval::Quarter => ts.checked_add_months(Months::new(steps.checked_mul(3)?)),
            Interval::Year => ts.checked_add_months(Months::new(steps.checked_mul(12)?)),
        }
    }
}

/// Metric evaluation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalMetricsSpec {
    pub ids: Vec<String>,
    pub expressions: Vec<String>,
    pub start: String,
    pub end: String,
    pub interval: Interval,
}

/// One evaluated series: samples aligned to `start` + i * interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    #[serde(alias = "m_start", deserialize_with = "deserialize_start")]
    pub start: NaiveDateTime,
    #[serde(alias = "m_data", default)]
    pub data: Vec<Option<f64>>,
}

impl MetricSeries {
    pub fn new(start: NaiveDateTime, data: Vec<f64>) -> Self {
        Self {
            start,
            data: data.into_iter().map(Some).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn deserialize_start<'de, D>(deserializer: D) -> std::result::Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    require_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// Evaluation result: entity id -> metric name -> series.
pub type SeriesMap = HashMap<String, HashMap<String, MetricSeries>>;

/// The platform API used by exports.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Fetches one page of entities of `type_name`.
    async fn fetch(&self, type_name: &str, spec: &FetchSpec) -> Result<Page>;

    /// Evaluates metric expressions for a set of entities of `type_name`.
    async fn eval_metrics(&self, type_name: &str, spec: &EvalMetricsSpec) -> Result<SeriesMap>;
}
