// This file is part of BLSAgg.
//
// BLSAgg is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// BLSAgg is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with BLSAgg.
// If not, see https://www.gnu.org/licenses/.

//! Durable ordered store of pending bundles, plus the query-group scope that
//! serializes access to it.

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

use blsagg_types::{Bundle, BundleRow, RowId};

mod local;
pub use local::LocalBundleTable;

mod query_group;
pub use query_group::{QueryGroup, QueryGroupEvent, TableGuard};

/// Table storage errors.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// An update or removal referenced a row that is not in the table
    #[error("no row with id {0}")]
    UnknownRow(RowId),
    /// Underlying storage fault
    #[error("table storage error: {0}")]
    Storage(String),
}

/// Result type for table operations.
pub type TableResult<T> = Result<T, TableError>;

/// Ordered store of pending bundle rows.
///
/// Implementations must be atomic with respect to crash: a row is either
/// fully present or fully absent. Callers are expected to serialize
/// read-then-write sequences through a [`QueryGroup`]; implementations only
/// guarantee per-call atomicity.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait::async_trait]
pub trait BundleTable: Send + Sync + 'static {
    /// Insert a freshly admitted bundle, assigning the next row id.
    /// The row starts with a one-block eligibility delay.
    async fn add_row(&self, bundle: Bundle, eligible_after: u64) -> TableResult<BundleRow>;

    /// Rewrite a row in place, keyed by its id.
    async fn update_row(&self, row: &BundleRow) -> TableResult<()>;

    /// Delete rows by id. Ids not present are ignored.
    async fn remove_rows(&self, ids: &[RowId]) -> TableResult<()>;

    /// Up to `limit` rows with `eligible_after <= block_number`, in
    /// insertion order (stable FIFO tie-break).
    async fn find_eligible(&self, block_number: u64, limit: usize) -> TableResult<Vec<BundleRow>>;
}
