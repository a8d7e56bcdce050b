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

//! Chain-backed BLS signature operations.
//!
//! Verification delegates to the gateway's `verify` view function;
//! aggregation folds the G1 signature points through the bn128 addition
//! precompile. Both go over `eth_call`, so no pairing library is linked
//! into the aggregator.

use std::sync::Arc;

use blsagg_types::{
    contracts::VerificationGateway, BlsSignature, Bundle, SignatureAggregator,
    SignatureAggregatorError, SignatureAggregatorResult,
};
use ethers::{
    contract::ContractError,
    providers::Middleware,
    types::{transaction::eip2718::TypedTransaction, Address, Bytes, TransactionRequest, H160, U256},
};
use tracing::debug;

/// bn128 G1 addition precompile
const BN128_ADD_ADDRESS: Address = H160([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x06,
]);

const G1_IDENTITY: [U256; 2] = [U256([0, 0, 0, 0]), U256([0, 0, 0, 0])];

/// BLS backend that leans on the chain for the curve math.
#[derive(Debug)]
pub struct GatewaySignatureAggregator<M> {
    provider: Arc<M>,
    gateway: VerificationGateway<M>,
}

impl<M: Middleware + 'static> GatewaySignatureAggregator<M> {
    /// Bind the backend to a verification gateway.
    pub fn new(provider: Arc<M>, gateway_address: Address) -> Self {
        let gateway = VerificationGateway::new(gateway_address, Arc::clone(&provider));
        Self { provider, gateway }
    }

    async fn add_g1_points(
        &self,
        a: [U256; 2],
        b: [U256; 2],
    ) -> SignatureAggregatorResult<[U256; 2]> {
        // the precompile treats (0, 0) as the point at infinity, but skipping
        // the round trip for it keeps the common first fold free
        if a == G1_IDENTITY {
            return Ok(b);
        }
        if b == G1_IDENTITY {
            return Ok(a);
        }
        let tx: TypedTransaction = TransactionRequest::new()
            .to(BN128_ADD_ADDRESS)
            .data(pack_g1_pair(a, b))
            .into();
        let out = self
            .provider
            .call(&tx, None)
            .await
            .map_err(|e| SignatureAggregatorError::Backend(e.to_string()))?;
        unpack_g1_point(&out)
    }
}

#[async_trait::async_trait]
impl<M: Middleware + 'static> SignatureAggregator for GatewaySignatureAggregator<M> {
    async fn aggregate(&self, bundles: &[Bundle]) -> SignatureAggregatorResult<Bundle> {
        let mut signature = G1_IDENTITY;
        for bundle in bundles {
            signature = self.add_g1_points(signature, bundle.signature.0).await?;
        }
        let mut out = Bundle::concat_unsigned(bundles);
        out.signature = BlsSignature(signature);
        Ok(out)
    }

    async fn verify(&self, bundle: &Bundle) -> SignatureAggregatorResult<bool> {
        match self.gateway.verify(bundle.into()).call().await {
            Ok(()) => Ok(true),
            Err(ContractError::Revert(_)) => {
                debug!("Gateway rejected bundle signature");
                Ok(false)
            }
            Err(e) => Err(SignatureAggregatorError::Backend(e.to_string())),
        }
    }
}

fn pack_g1_pair(a: [U256; 2], b: [U256; 2]) -> Bytes {
    let mut buf = [0u8; 128];
    for (i, fe) in a.iter().chain(b.iter()).enumerate() {
        fe.to_big_endian(&mut buf[i * 32..(i + 1) * 32]);
    }
    buf.to_vec().into()
}

fn unpack_g1_point(data: &Bytes) -> SignatureAggregatorResult<[U256; 2]> {
    if data.len() < 64 {
        return Err(SignatureAggregatorError::Backend(format!(
            "bn128 add returned {} bytes",
            data.len()
        )));
    }
    Ok([
        U256::from_big_endian(&data[..32]),
        U256::from_big_endian(&data[32..64]),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_points_big_endian() {
        let packed = pack_g1_pair(
            [U256::from(1), U256::from(2)],
            [U256::from(3), U256::from(4)],
        );
        assert_eq!(packed.len(), 128);
        assert_eq!(packed[31], 1);
        assert_eq!(packed[63], 2);
        assert_eq!(packed[95], 3);
        assert_eq!(packed[127], 4);
    }

    #[test]
    fn unpack_round_trips_pack_halves() {
        let packed = pack_g1_pair(
            [U256::from(7), U256::from(9)],
            [U256::zero(), U256::zero()],
        );
        let first: Bytes = packed[..64].to_vec().into();
        assert_eq!(
            unpack_g1_point(&first).unwrap(),
            [U256::from(7), U256::from(9)]
        );
        assert!(unpack_g1_point(&Bytes::from(vec![0u8; 10])).is_err());
    }
}
