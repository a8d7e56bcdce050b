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

//! The BLSAgg aggregation engine.
//!
//! [`BundleService`] admits client bundles, batches eligible rows into
//! aggregate bundles, hunts down bundles that fail to pay for themselves,
//! and submits each aggregate as a single gateway transaction.

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

mod culprit;

mod emit;
pub use emit::AggregatorEvent;

mod service;
pub use service::{BundleService, Settings};

mod tasks;
pub use tasks::TaskTracker;

mod timer;
pub use timer::SubmissionTimer;
