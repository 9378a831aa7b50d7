//! Paged export of platform data into extract files.
//!
//! Both exports walk the platform with a [`PageCursor`], flatten every page
//! into rows matching a [`TableDefinition`](crate::schema::TableDefinition)
//! and hand the rows to an [`ExtractStore`](crate::extract::ExtractStore):
//!
//! - [`FetchTableExport`] writes one row per entity, one column per field;
//! - [`MetricsTableExport`] writes one row per entity per sample step.

mod fetch;
mod metrics;

use serde::{Deserialize, Serialize};

pub use fetch::FetchTableExport;
pub use metrics::{expand_series, MetricWindow, MetricsTableExport};

use crate::error::{ExportError, Result};

/// When buffered rows are written to the extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InsertStrategy {
    /// One insert transaction per fetched page.
    PerPage,
    /// A single insert transaction after the last page.
    AtEnd,
}

/// Offset bookkeeping for a paged fetch.
///
/// Every request asks for `min(limit, num_sources - offset)` entities, so the
/// final page never overshoots the budget. The offset always advances by the
/// full `limit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    offset: u64,
    limit: u64,
    num_sources: u64,
    has_more: bool,
}

impl PageCursor {
    /// Fails with [`ExportError::InvalidArgument`] unless both bounds are at
    /// least one.
    pub fn new(limit: u64, num_sources: u64) -> Result<Self> {
        if limit < 1 {
            return Err(ExportError::invalid_argument(format!(
                "limit must be at least 1, got {limit}"
            )));
        }
        if num_sources < 1 {
            return Err(ExportError::invalid_argument(format!(
                "num_sources must be at least 1, got {num_sources}"
            )));
        }
        Ok(Self {
            offset: 0,
            limit,
            num_sources,
            has_more: true,
        })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the next page request.
    pub fn page_size(&self) -> u64 {
        self.limit.min(self.num_sources.saturating_sub(self.offset))
    }

    /// Whether another page should be requested.
    pub fn has_next(&self) -> bool {
        self.has_more && self.offset < self.num_sources
    }

    /// Records a received page and moves to the next offset.
    pub fn advance(&mut self, has_more: bool) {
        self.has_more = has_more;
        self.offset = self.offset.saturating_add(self.limit);
    }
}

/// Counters reported by a finished export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub pages: usize,
    pub entities: usize,
    pub rows_written: usize,
    pub inserts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_rejects_zero_bounds() {
        assert!(matches!(
            PageCursor::new(0, 10),
            Err(ExportError::InvalidArgument(_))
        ));
        assert!(matches!(
            PageCursor::new(10, 0),
            Err(ExportError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_cursor_clamps_last_page() {
        let mut cursor = PageCursor::new(4, 10).unwrap();
        let mut sizes = Vec::new();
        while cursor.has_next() {
            sizes.push((cursor.offset(), cursor.page_size()));
            cursor.advance(true);
        }
        assert_eq!(sizes, vec![(0, 4), (4, 4), (8, 2)]);
    }

    #[test]
    fn test_cursor_stops_without_more() {
        let mut cursor = PageCursor::new(4, 100).unwrap();
        assert!(cursor.has_next());
        cursor.advance(false);
        assert!(!cursor.has_next());
        assert_eq!(cursor.offset(), 4);
    }

    #[test]
    fn test_cursor_budget_smaller_than_limit() {
        let cursor = PageCursor::new(50, 3).unwrap();
        assert_eq!(cursor.page_size(), 3);
    }
}
