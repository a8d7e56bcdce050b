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

use std::collections::BTreeMap;

use blsagg_types::{Bundle, BundleRow, RowId};
use parking_lot::Mutex;

use crate::{BundleTable, TableError, TableResult};

/// In-memory bundle table.
///
/// Rows live in a `BTreeMap` keyed by id, so ascending-key iteration is
/// insertion order. Used by tests and single-node deployments; durable
/// backends implement [`BundleTable`] over a real store with an index on
/// `eligible_after`.
#[derive(Debug, Default)]
pub struct LocalBundleTable {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    rows: BTreeMap<RowId, BundleRow>,
    next_id: u64,
}

impl LocalBundleTable {
    /// Create an empty table. Ids start at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    /// True if no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl BundleTable for LocalBundleTable {
    async fn add_row(&self, bundle: Bundle, eligible_after: u64) -> TableResult<BundleRow> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let mut row = BundleRow::new(bundle, eligible_after);
        row.id = RowId(inner.next_id);
        inner.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_row(&self, row: &BundleRow) -> TableResult<()> {
        let mut inner = self.inner.lock();
        match inner.rows.get_mut(&row.id) {
            Some(stored) => {
                *stored = row.clone();
                Ok(())
            }
            None => Err(TableError::UnknownRow(row.id)),
        }
    }

    async fn remove_rows(&self, ids: &[RowId]) -> TableResult<()> {
        let mut inner = self.inner.lock();
        for id in ids {
            inner.rows.remove(id);
        }
        Ok(())
    }

    async fn find_eligible(&self, block_number: u64, limit: usize) -> TableResult<Vec<BundleRow>> {
        let inner = self.inner.lock();
        Ok(inner
            .rows
            .values()
            .filter(|row| row.eligible_at(block_number))
            .take(limit)
            .cloned()
            .collect())
    }
}
