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

//! Bundle, operation, and action types.

use ethers::{
    abi::{encode, Token},
    types::{Address, Bytes, H256, U256},
    utils::{hex, keccak256},
};
use serde::{Deserialize, Serialize};

/// BLS public key of a single wallet: four field elements over the BN254
/// curve, in the encoding expected by the verification gateway.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey(pub [U256; 4]);

impl PublicKey {
    /// Keccak hash of the key, used by the gateway to look up the wallet
    /// deployed for this key.
    pub fn wallet_hash(&self) -> H256 {
        let tokens: Vec<Token> = self.0.iter().map(|fe| Token::Uint(*fe)).collect();
        H256::from(keccak256(encode(&[Token::FixedArray(tokens)])))
    }

    /// Short hex form of the key's first field element, for event payloads
    /// and logs.
    pub fn short(&self) -> String {
        let mut buf = [0u8; 32];
        self.0[0].to_big_endian(&mut buf);
        format!("0x{}", hex::encode(&buf[..4]))
    }
}

/// Aggregated BLS signature: a G1 point as two field elements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlsSignature(pub [U256; 2]);

/// A single call made by a wallet: target contract, attached ether value,
/// and the encoded function data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Ether value forwarded with the call
    pub eth_value: U256,
    /// Call target
    pub contract_address: Address,
    /// ABI-encoded function call
    pub encoded_function: Bytes,
}

/// One wallet's nonce-guarded, ordered list of actions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Wallet nonce this operation is valid at
    pub nonce: U256,
    /// Actions executed in order, atomically per operation
    pub actions: Vec<Action>,
}

/// A signed set of operations from one or more BLS wallets.
///
/// `sender_public_keys` and `operations` are parallel lists: the i-th
/// operation is authorized by the i-th key. An aggregate bundle is the
/// concatenation of many bundles under one aggregated signature; the empty
/// bundle is the identity for aggregation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    /// One key per operation, in operation order
    pub sender_public_keys: Vec<PublicKey>,
    /// Operations in submission order
    pub operations: Vec<Operation>,
    /// Aggregated signature over all operations
    pub signature: BlsSignature,
}

impl Bundle {
    /// Total number of actions across all operations.
    pub fn action_count(&self) -> usize {
        self.operations.iter().map(|op| op.actions.len()).sum()
    }

    /// A bundle must carry exactly one sender key per operation.
    pub fn is_well_formed(&self) -> bool {
        self.sender_public_keys.len() == self.operations.len()
    }

    /// True if the bundle carries no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Concatenate keys and operations of many bundles, preserving order.
    ///
    /// The result carries a zero signature. Signature aggregation is the
    /// backend's job; see [`crate::SignatureAggregator::aggregate`].
    pub fn concat_unsigned<'a>(bundles: impl IntoIterator<Item = &'a Bundle>) -> Bundle {
        let mut out = Bundle::default();
        for bundle in bundles {
            out.sender_public_keys
                .extend(bundle.sender_public_keys.iter().copied());
            out.operations.extend(bundle.operations.iter().cloned());
        }
        out
    }
}
