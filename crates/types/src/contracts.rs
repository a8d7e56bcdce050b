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

//! Generated contract interfaces
//!
//! Wire semantics of these contracts are fixed on-chain; the aggregator only
//! calls them.

#![allow(non_snake_case)]
#![allow(clippy::all)]
#![allow(missing_docs)]
#![allow(unreachable_pub)]
#![allow(rust_2018_idioms)]

use ethers::contract::abigen;

use crate::{Action, Bundle as DomainBundle, Operation as DomainOperation};

abigen!(
    VerificationGateway,
    r#"[
        struct ActionData { uint256 ethValue; address contractAddress; bytes encodedFunction; }
        struct Operation { uint256 nonce; ActionData[] actions; }
        struct Bundle { uint256[4][] senderPublicKeys; Operation[] operations; uint256[2] signature; }
        function processBundle(Bundle calldata bundle) external returns (bool[] memory successes, bytes[][] memory results)
        function verify(Bundle calldata bundle) external view
        function walletFromHash(bytes32 hash) external view returns (address)
    ]"#
);

abigen!(
    AggregatorUtilities,
    r#"[
        struct SequenceAction { address target; bytes data; }
        function ethBalanceOf(address account) external view returns (uint256)
        function performSequence(SequenceAction[] calldata actions) external returns (bool[] memory successes, bytes[] memory results)
    ]"#
);

abigen!(
    BLSWallet,
    r#"[
        function nonce() external view returns (uint256)
    ]"#
);

abigen!(
    IERC20,
    r#"[
        function balanceOf(address account) external view returns (uint256)
    ]"#
);

impl From<&Action> for ActionData {
    fn from(action: &Action) -> Self {
        Self {
            eth_value: action.eth_value,
            contract_address: action.contract_address,
            encoded_function: action.encoded_function.clone(),
        }
    }
}

impl From<&DomainOperation> for Operation {
    fn from(op: &DomainOperation) -> Self {
        Self {
            nonce: op.nonce,
            actions: op.actions.iter().map(ActionData::from).collect(),
        }
    }
}

impl From<&DomainBundle> for Bundle {
    fn from(bundle: &DomainBundle) -> Self {
        Self {
            sender_public_keys: bundle.sender_public_keys.iter().map(|k| k.0).collect(),
            operations: bundle.operations.iter().map(Operation::from).collect(),
            signature: bundle.signature.0,
        }
    }
}
