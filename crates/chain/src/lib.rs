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

//! Thin, testable facade over the blockchain for the BLSAgg aggregator.

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

mod adapter;
pub use adapter::{
    CallResult, ChainAdapter, ChainError, ChainResult, EthCall, MeasureResult, SequenceWithMeasure,
    SubmitReceipt,
};
#[cfg(any(test, feature = "test-utils"))]
pub use adapter::MockChainAdapter;

mod bls;
pub use bls::GatewaySignatureAggregator;

mod ethers;
pub use self::ethers::EthersChainAdapter;
