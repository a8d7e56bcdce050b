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

//! Core types shared across the BLSAgg aggregator crates.

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

mod aggregator;
pub use aggregator::{SignatureAggregator, SignatureAggregatorError, SignatureAggregatorResult};
#[cfg(feature = "test-utils")]
pub use aggregator::MockSignatureAggregator;

mod bundle;
pub use bundle::{Action, BlsSignature, Bundle, Operation, PublicKey};

pub mod contracts;

mod failure;
pub use failure::TransactionFailure;

mod reward;
pub use reward::{RewardModel, RewardParseError, RewardToken};

mod row;
pub use row::{BundleRow, RowId};
