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

use std::{sync::Arc, time::Duration};

use blsagg_types::{
    contracts::{AggregatorUtilities, BLSWallet, IERC20, SequenceAction, VerificationGateway},
    Bundle, RewardToken, TransactionFailure,
};
use ethers::{
    providers::Middleware,
    types::{Address, Bytes, U256},
};
use tracing::debug;

use crate::adapter::{
    CallResult, ChainAdapter, ChainError, ChainResult, EthCall, MeasureResult,
    SequenceWithMeasure, SubmitReceipt,
};

/// [`ChainAdapter`] over an ethers `Middleware`.
///
/// Holds bound instances of the verification gateway and the utilities
/// contract, and the aggregator wallet address rewards accrue to. Submission
/// requires the middleware stack to sign (e.g. a `SignerMiddleware`).
#[derive(Debug)]
pub struct EthersChainAdapter<M> {
    provider: Arc<M>,
    gateway: VerificationGateway<M>,
    utilities: AggregatorUtilities<M>,
    wallet: Address,
    measure: EthCall,
}

impl<M: Middleware + 'static> EthersChainAdapter<M> {
    /// Bind the adapter to the gateway and utilities contracts.
    ///
    /// The balance probe for `reward_token` is encoded once here: rewards in
    /// ether are observed through `AggregatorUtilities.ethBalanceOf`, token
    /// rewards through the token's `balanceOf`.
    pub fn new(
        provider: Arc<M>,
        gateway_address: Address,
        utilities_address: Address,
        wallet: Address,
        reward_token: RewardToken,
    ) -> Self {
        let gateway = VerificationGateway::new(gateway_address, Arc::clone(&provider));
        let utilities = AggregatorUtilities::new(utilities_address, Arc::clone(&provider));
        let measure = match reward_token {
            RewardToken::Native => EthCall {
                to: utilities_address,
                data: utilities
                    .eth_balance_of(wallet)
                    .calldata()
                    .expect("ethBalanceOf calldata"),
            },
            RewardToken::Token(token) => EthCall {
                to: token,
                data: IERC20::new(token, Arc::clone(&provider))
                    .balance_of(wallet)
                    .calldata()
                    .expect("balanceOf calldata"),
            },
        };
        Self {
            provider,
            gateway,
            utilities,
            wallet,
            measure,
        }
    }
}

#[async_trait::async_trait]
impl<M: Middleware + 'static> ChainAdapter for EthersChainAdapter<M> {
    async fn block_number(&self) -> ChainResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| ChainError::Provider(e.to_string()))
    }

    async fn check_nonces(&self, bundle: &Bundle) -> ChainResult<Vec<TransactionFailure>> {
        let mut failures = Vec::new();
        for (key_index, (key, operation)) in bundle
            .sender_public_keys
            .iter()
            .zip(&bundle.operations)
            .enumerate()
        {
            let wallet = self
                .gateway
                .wallet_from_hash(key.wallet_hash().to_fixed_bytes())
                .call()
                .await
                .map_err(|e| ChainError::Contract(e.to_string()))?;
            // wallets are deployed lazily; an unknown key is at nonce zero
            let actual = if wallet == Address::zero() {
                U256::zero()
            } else {
                BLSWallet::new(wallet, Arc::clone(&self.provider))
                    .nonce()
                    .call()
                    .await
                    .map_err(|e| ChainError::Contract(e.to_string()))?
            };
            let declared = operation.nonce;
            if declared < actual {
                failures.push(TransactionFailure::NonceTooLow {
                    key_index,
                    declared,
                    actual,
                });
            } else if declared > actual {
                failures.push(TransactionFailure::NonceTooHigh {
                    key_index,
                    declared,
                    actual,
                });
            }
        }
        Ok(failures)
    }

    fn measure_call(&self) -> EthCall {
        self.measure.clone()
    }

    fn process_bundle_call(&self, bundle: &Bundle) -> EthCall {
        EthCall {
            to: self.gateway.address(),
            data: self
                .gateway
                .process_bundle(bundle.into())
                .calldata()
                .expect("processBundle calldata"),
        }
    }

    async fn call_static_sequence_with_measure(
        &self,
        measure: EthCall,
        calls: Vec<EthCall>,
    ) -> ChainResult<SequenceWithMeasure> {
        let call_count = calls.len();
        debug!(
            "Staging {call_count} calls with {} balance probes",
            call_count + 1
        );
        let mut actions = Vec::with_capacity(2 * call_count + 1);
        actions.push(sequence_action(&measure));
        for call in &calls {
            actions.push(sequence_action(call));
            actions.push(sequence_action(&measure));
        }

        let (successes, results) = self
            .utilities
            .perform_sequence(actions)
            .from(self.wallet)
            .call()
            .await
            .map_err(|e| ChainError::Contract(e.to_string()))?;

        split_sequence_results(call_count, successes, results)
    }

    async fn estimate_gas(&self, bundle: &Bundle) -> ChainResult<U256> {
        self.gateway
            .process_bundle(bundle.into())
            .from(self.wallet)
            .estimate_gas()
            .await
            .map_err(|e| ChainError::Contract(e.to_string()))
    }

    async fn submit_bundle(
        &self,
        bundle: &Bundle,
        timeout: Duration,
    ) -> ChainResult<SubmitReceipt> {
        debug!(
            "Submitting aggregate bundle of {} actions",
            bundle.action_count()
        );
        let call = self.gateway.process_bundle(bundle.into()).from(self.wallet);
        let pending = call
            .send()
            .await
            .map_err(|e| ChainError::Contract(e.to_string()))?;
        let tx_hash = *pending;
        debug!("Broadcast bundle transaction {tx_hash:?}, awaiting inclusion");
        let receipt = tokio::time::timeout(timeout, pending)
            .await
            .map_err(|_| ChainError::SubmissionTimeout(timeout))?
            .map_err(|e| ChainError::Provider(e.to_string()))?
            .ok_or(ChainError::SubmissionDropped)?;
        debug!(
            "Bundle transaction {:?} mined in block {:?}",
            receipt.transaction_hash, receipt.block_number
        );
        Ok(SubmitReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt
                .block_number
                .ok_or_else(|| ChainError::Decode("receipt missing block number".to_string()))?
                .as_u64(),
        })
    }
}

fn sequence_action(call: &EthCall) -> SequenceAction {
    SequenceAction {
        target: call.to,
        data: call.data.clone(),
    }
}

/// Split the flat `measure, c₀, measure, …, measure` results of a staged
/// sequence back into measure and call halves.
fn split_sequence_results(
    call_count: usize,
    successes: Vec<bool>,
    results: Vec<Bytes>,
) -> ChainResult<SequenceWithMeasure> {
    let expected = 2 * call_count + 1;
    if successes.len() != expected || results.len() != expected {
        return Err(ChainError::Decode(format!(
            "sequence returned {} results, expected {expected}",
            successes.len().max(results.len()),
        )));
    }

    let mut measure_results = Vec::with_capacity(call_count + 1);
    let mut call_results = Vec::with_capacity(call_count);
    for (i, (success, data)) in successes.into_iter().zip(results).enumerate() {
        if i % 2 == 0 {
            measure_results.push(MeasureResult {
                success,
                balance: decode_balance(success, &data)?,
            });
        } else {
            call_results.push(CallResult {
                success,
                return_data: data,
            });
        }
    }
    Ok(SequenceWithMeasure {
        measure_results,
        call_results,
    })
}

fn decode_balance(success: bool, data: &Bytes) -> ChainResult<U256> {
    if !success {
        return Ok(U256::zero());
    }
    if data.len() < 32 {
        return Err(ChainError::Decode(format!(
            "balance probe returned {} bytes",
            data.len()
        )));
    }
    Ok(U256::from_big_endian(&data[..32]))
}
