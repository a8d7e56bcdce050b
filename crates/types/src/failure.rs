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

//! Client-visible admission failures.

use std::fmt::{self, Display};

use ethers::types::U256;
use serde::{Deserialize, Serialize};

/// A reason a submitted bundle was refused at admission.
///
/// Failures are returned synchronously from `add` and are never persisted or
/// retried; the client is expected to fix and resubmit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TransactionFailure {
    /// The bundle shape is wrong (e.g. key/operation count mismatch)
    InvalidFormat {
        /// What was malformed
        description: String,
    },
    /// The aggregated BLS signature did not verify
    InvalidSignature,
    /// An operation's nonce is behind the wallet's on-chain nonce
    NonceTooLow {
        /// Index of the offending key/operation pair
        key_index: usize,
        /// Nonce declared by the operation
        declared: U256,
        /// Current on-chain nonce
        actual: U256,
    },
    /// An operation's nonce is ahead of the wallet's on-chain nonce
    NonceTooHigh {
        /// Index of the offending key/operation pair
        key_index: usize,
        /// Nonce declared by the operation
        declared: U256,
        /// Current on-chain nonce
        actual: U256,
    },
}

impl TransactionFailure {
    /// Stable kind string, matching the serialized `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidFormat { .. } => "invalid-format",
            Self::InvalidSignature => "invalid-signature",
            Self::NonceTooLow { .. } => "nonce-too-low",
            Self::NonceTooHigh { .. } => "nonce-too-high",
        }
    }
}

impl Display for TransactionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFormat { description } => {
                write!(f, "invalid-format: {description}")
            }
            Self::InvalidSignature => write!(f, "invalid-signature"),
            Self::NonceTooLow {
                key_index,
                declared,
                actual,
            } => write!(
                f,
                "nonce-too-low: operation {key_index} declared nonce {declared}, wallet is at {actual}"
            ),
            Self::NonceTooHigh {
                key_index,
                declared,
                actual,
            } => write!(
                f,
                "nonce-too-high: operation {key_index} declared nonce {declared}, wallet is at {actual}"
            ),
        }
    }
}
