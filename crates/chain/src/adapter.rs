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

use std::time::Duration;

use blsagg_types::{Bundle, TransactionFailure};
use ethers::types::{Address, Bytes, H256, U256};

/// Chain adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// JSON-RPC / transport error
    #[error("provider error: {0}")]
    Provider(String),
    /// Contract call error
    #[error("contract error: {0}")]
    Contract(String),
    /// Malformed response from a contract call
    #[error("could not decode contract response: {0}")]
    Decode(String),
    /// The submitted transaction was not mined within the timeout
    #[error("bundle transaction not mined within {0:?}")]
    SubmissionTimeout(Duration),
    /// The submitted transaction was dropped from the mempool
    #[error("bundle transaction dropped")]
    SubmissionDropped,
    /// Internal errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for chain adapter operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// A prepared `eth_call`-able invocation: target and encoded data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EthCall {
    /// Call target
    pub to: Address,
    /// ABI-encoded call data
    pub data: Bytes,
}

/// Outcome of one balance measurement within a staged sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeasureResult {
    /// Whether the measure call itself succeeded
    pub success: bool,
    /// The measured balance (zero when the call failed)
    pub balance: U256,
}

/// Outcome of one action call within a staged sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallResult {
    /// Whether the call succeeded (did not revert)
    pub success: bool,
    /// Raw return data
    pub return_data: Bytes,
}

/// Results of a staged `measure, c₀, measure, …, cₙ₋₁, measure` simulation.
///
/// For `n` action calls there are `n + 1` measure results; the difference
/// between measure `i` and measure `i + 1` is the balance change
/// attributable to call `i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceWithMeasure {
    /// `n + 1` balance measurements
    pub measure_results: Vec<MeasureResult>,
    /// `n` action call outcomes
    pub call_results: Vec<CallResult>,
}

/// Receipt of a mined bundle transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Hash of the mined transaction
    pub tx_hash: H256,
    /// Block the transaction was included in
    pub block_number: u64,
}

/// Facade over the blockchain: everything the aggregation engine needs and
/// nothing else.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait::async_trait]
pub trait ChainAdapter: Send + Sync + 'static {
    /// Current head block number.
    async fn block_number(&self) -> ChainResult<u64>;

    /// Compare each operation's declared nonce with its wallet's on-chain
    /// nonce; one failure entry per mismatched pair. Wallets not yet
    /// deployed are treated as having nonce zero.
    async fn check_nonces(&self, bundle: &Bundle) -> ChainResult<Vec<TransactionFailure>>;

    /// The balance probe for the aggregator's reward currency, bound to the
    /// configured reward token at construction.
    fn measure_call(&self) -> EthCall;

    /// Encoded `processBundle` invocation for a bundle. The data length is
    /// the bundle's call-data footprint.
    fn process_bundle_call(&self, bundle: &Bundle) -> EthCall;

    /// Simulate `measure, c₀, measure, c₁, …, measure` in one atomic read at
    /// the current head. Simulation is sequential: later calls observe the
    /// state effects of earlier ones.
    async fn call_static_sequence_with_measure(
        &self,
        measure: EthCall,
        calls: Vec<EthCall>,
    ) -> ChainResult<SequenceWithMeasure>;

    /// Gas estimate for submitting the bundle through the gateway.
    async fn estimate_gas(&self, bundle: &Bundle) -> ChainResult<U256>;

    /// Broadcast the aggregate bundle and wait for inclusion.
    async fn submit_bundle(&self, bundle: &Bundle, timeout: Duration) -> ChainResult<SubmitReceipt>;
}
