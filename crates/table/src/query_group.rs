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

use std::{
    fmt::{self, Display},
    ops::Deref,
    time::{Duration, Instant},
};

use tokio::sync::{broadcast, Mutex, MutexGuard};

use crate::BundleTable;

/// Lifecycle events of the query-group lock, for observability.
#[derive(Clone, Debug)]
pub enum QueryGroupEvent {
    /// The lock was acquired after waiting `waited`
    Acquired {
        /// Time spent queued behind other query groups
        waited: Duration,
    },
    /// The lock was released after being held for `held`
    Released {
        /// Time the query group was held
        held: Duration,
    },
}

impl Display for QueryGroupEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acquired { waited } => write!(f, "Query group acquired after {waited:?}"),
            Self::Released { held } => write!(f, "Query group released after {held:?}"),
        }
    }
}

/// Mutual-exclusion scope over the bundle table.
///
/// Every read-then-write sequence against the table, and every read whose
/// meaning depends on a block-number snapshot, runs while holding the guard
/// returned by [`QueryGroup::acquire`]. At most one guard exists at a time;
/// the guard scopes a single storage transaction in durable backends.
#[derive(Debug)]
pub struct QueryGroup<T> {
    table: T,
    lock: Mutex<()>,
    event_sender: broadcast::Sender<QueryGroupEvent>,
}

impl<T: BundleTable> QueryGroup<T> {
    /// Wrap a table. Lifecycle events go out on `event_sender`.
    pub fn new(table: T, event_sender: broadcast::Sender<QueryGroupEvent>) -> Self {
        Self {
            table,
            lock: Mutex::new(()),
            event_sender,
        }
    }

    /// Wait for exclusive access to the table.
    pub async fn acquire(&self) -> TableGuard<'_, T> {
        let requested_at = Instant::now();
        let guard = self.lock.lock().await;
        let acquired_at = Instant::now();
        let _ = self.event_sender.send(QueryGroupEvent::Acquired {
            waited: acquired_at - requested_at,
        });
        TableGuard {
            table: &self.table,
            _guard: guard,
            acquired_at,
            event_sender: self.event_sender.clone(),
        }
    }
}

/// Exclusive access to the table for the lifetime of one query group.
#[derive(Debug)]
pub struct TableGuard<'a, T> {
    table: &'a T,
    _guard: MutexGuard<'a, ()>,
    acquired_at: Instant,
    event_sender: broadcast::Sender<QueryGroupEvent>,
}

impl<T> Deref for TableGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.table
    }
}

impl<T> Drop for TableGuard<'_, T> {
    fn drop(&mut self) {
        let _ = self.event_sender.send(QueryGroupEvent::Released {
            held: self.acquired_at.elapsed(),
        });
    }
}
