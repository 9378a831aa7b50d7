//! # tab-extract - Platform data to Tableau extracts
//!
//! tab-extract pages through a platform's entity and metric APIs, flattens
//! the (possibly nested, possibly time-series) results into fixed-order rows
//! and writes them into local extract files, which can then be published to
//! Tableau Server as datasources.
//!
//! ## Quick Start
//!
//! ```rust
//! use serde_json::json;
//! use tab_extract::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> tab_extract::Result<()> {
//! # let dir = tempfile::tempdir()?;
//! let service = InMemoryDataService::new().with_entities(
//!     "SmartBulb",
//!     vec![
//!         json!({"id": "b1", "installed": "2019-03-04T05:06:07Z", "fixture": {"wattage": 60}}),
//!         json!({"id": "b2", "installed": "2019-05-01T00:00:00Z", "fixture": {"wattage": 40}}),
//!     ],
//! );
//!
//! let fields = vec![
//!     FieldSpec::new("id", FieldDataType::String, false),
//!     FieldSpec::new("installed", FieldDataType::Datetime, true),
//!     FieldSpec::new("fixture.wattage", FieldDataType::Int, true),
//! ];
//!
//! let summary = FetchTableExport::new("SmartBulb", fields, dir.path().join("bulbs.db"))
//!     .filter("wattage > 0")
//!     .limit(100)
//!     .num_sources(1000)
//!     .run(&service, &SqliteExtract::new())
//!     .await?;
//!
//! assert_eq!(summary.rows_written, 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`service`**: the [`DataService`](service::DataService) seam, its HTTP
//!   client and an in-memory implementation
//! - **`schema`**: field specs, table definitions and value coercion
//! - **`export`**: the paged flattener (`FetchTableExport`, `MetricsTableExport`)
//! - **`extract`**: extract files, create modes and the SQLite/Parquet stores
//! - **`publish`**: Tableau Server REST publishing
//! - **`jobs`**: the scheduled per-entity metric export
//!
//! Pages are processed strictly one after another. Every extract operation
//! opens and releases its own session on the file.

pub mod error;
pub mod export;
pub mod extract;
pub mod jobs;
pub mod logging;
pub mod prelude;
pub mod publish;
pub mod schema;
pub mod security;
pub mod service;
pub mod value;

pub use error::{ExportError, Result};
