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

//! Persisted bundle rows.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::Bundle;

/// Key of a persisted bundle row, assigned monotonically on insert.
///
/// Insertion order doubles as submission priority: `find_eligible` returns
/// rows in ascending id order.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RowId(pub u64);

impl Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pending bundle as stored in the bundle table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRow {
    /// Table key, assigned on insert
    pub id: RowId,
    /// The client-signed bundle
    pub bundle: Bundle,
    /// Block number at which the row becomes eligible for aggregation
    pub eligible_after: u64,
    /// Blocks to defer the row by on its next economic failure, doubling
    /// each time. Always at least 1.
    pub next_eligibility_delay: u64,
}

impl BundleRow {
    /// A freshly admitted row: eligible at `eligible_after`, one-block
    /// backoff on first failure. The id is assigned by the table on insert.
    pub fn new(bundle: Bundle, eligible_after: u64) -> Self {
        Self {
            id: RowId::default(),
            bundle,
            eligible_after,
            next_eligibility_delay: 1,
        }
    }

    /// Whether the row may be included in an aggregate at `block_number`.
    pub fn eligible_at(&self, block_number: u64) -> bool {
        self.eligible_after <= block_number
    }
}
