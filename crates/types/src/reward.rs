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

//! Reward accounting: what a bundle must pay to be worth including.

use std::{
    fmt::{self, Display},
    str::FromStr,
};

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

/// The currency bundle rewards are paid in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardToken {
    /// Rewards arrive as ether transfers to the aggregator wallet
    Native,
    /// Rewards arrive as ERC-20 transfers of the given token
    Token(Address),
}

/// Error parsing a reward token specification string.
#[derive(Debug, thiserror::Error)]
pub enum RewardParseError {
    /// Unrecognized specification
    #[error("unrecognized reward token {0:?}, expected \"ether\" or \"token:0x…\"")]
    Unrecognized(String),
    /// `token:` prefix with a malformed address
    #[error("invalid token address in reward spec: {0}")]
    BadAddress(String),
}

impl FromStr for RewardToken {
    type Err = RewardParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "ether" {
            return Ok(Self::Native);
        }
        if let Some(address) = s.strip_prefix("token:") {
            return address
                .parse::<Address>()
                .map(Self::Token)
                .map_err(|e| RewardParseError::BadAddress(e.to_string()));
        }
        Err(RewardParseError::Unrecognized(s.to_string()))
    }
}

impl Display for RewardToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "ether"),
            Self::Token(address) => write!(f, "token:{address:?}"),
        }
    }
}

/// Linear reward requirement: a bundle pays for the gas it consumes and the
/// call data it occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardModel {
    /// Currency the reward is measured in
    pub token: RewardToken,
    /// Required reward per unit of estimated gas
    pub per_gas: U256,
    /// Required reward per byte of call data
    pub per_byte: U256,
}

impl RewardModel {
    /// Full requirement: `per_gas · gas + per_byte · call_data_len`.
    pub fn required_reward(&self, gas_estimate: U256, call_data_len: usize) -> U256 {
        self.per_gas * gas_estimate + self.per_byte * U256::from(call_data_len)
    }

    /// Requirement ignoring gas. Monotone in call-data size and cheap to
    /// compute per bundle, which makes it usable as a fast-scan filter: a
    /// bundle paying less than this can never cover its full requirement.
    pub fn lower_bound(&self, call_data_len: usize) -> U256 {
        self.per_byte * U256::from(call_data_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ether_and_token_specs() {
        assert_eq!("ether".parse::<RewardToken>().unwrap(), RewardToken::Native);
        let token = "token:0x00000000000000000000000000000000000000aa"
            .parse::<RewardToken>()
            .unwrap();
        assert_eq!(
            token,
            RewardToken::Token(Address::from_low_u64_be(0xaa))
        );
        assert!("wei".parse::<RewardToken>().is_err());
        assert!("token:xyz".parse::<RewardToken>().is_err());
    }

    #[test]
    fn required_reward_is_linear() {
        let model = RewardModel {
            token: RewardToken::Native,
            per_gas: U256::from(3),
            per_byte: U256::from(10),
        };
        assert_eq!(
            model.required_reward(U256::from(1000), 68),
            U256::from(3 * 1000 + 10 * 68)
        );
        assert_eq!(model.lower_bound(68), U256::from(680));
        assert!(model.lower_bound(68) <= model.required_reward(U256::from(1000), 68));
    }
}
