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

//! Culprit search: locate the first bundle in a candidate list whose
//! cumulative reward fails to cover the cumulative cost.

use ethers::types::U256;
use tracing::debug;

/// Per-candidate measurements collected before the search.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CandidateReward {
    /// At least one inner operation succeeded in the staged simulation
    pub(crate) success: bool,
    /// Reward-balance delta attributable to this bundle
    pub(crate) reward: U256,
    /// The reward is already below the per-byte lower bound, so the bundle
    /// can never cover its full requirement
    pub(crate) below_lower_bound: bool,
}

impl CandidateReward {
    fn visibly_failing(&self) -> bool {
        !self.success || self.below_lower_bound
    }
}

/// Economics of one candidate prefix.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PrefixOutcome {
    /// Whether the prefix pays for itself
    pub(crate) success: bool,
    /// Sum of the prefix's measured rewards
    pub(crate) reward: U256,
    /// What the prefix's aggregate must pay
    pub(crate) required_reward: U256,
}

/// Evaluates whether the first `n` candidates, aggregated, pay for
/// themselves. `n = 0` is the empty prefix and trivially succeeds.
///
/// Each evaluation costs a gas estimate, so the search keeps the number of
/// calls logarithmic.
#[async_trait::async_trait]
pub(crate) trait PrefixCheck {
    async fn check_first_n(&self, n: usize) -> anyhow::Result<PrefixOutcome>;
}

/// Index of the first candidate whose inclusion makes the prefix unprofitable,
/// or `None` when the whole candidate list pays.
///
/// A fast linear scan over the per-candidate measurements handles the common
/// case for free: reward deficits almost always come from call-data size,
/// which is locally visible via the per-byte lower bound. Only when the scan
/// finds nothing (or its hint is not the true first failure) does the search
/// fall back to bisection, bounding the expensive prefix checks at
/// `⌈log₂ n⌉ + 1`.
pub(crate) async fn find_first_failure_index<C: PrefixCheck>(
    checker: &C,
    candidates: &[CandidateReward],
) -> anyhow::Result<Option<usize>> {
    let n = candidates.len();
    if n == 0 {
        return Ok(None);
    }

    let fast_failure_index = candidates.iter().position(CandidateReward::visibly_failing);

    let (mut left, mut right) = match fast_failure_index {
        Some(f) => {
            let outcome = check(checker, f).await?;
            if outcome.success {
                // everything before the visibly failing candidate pays, so
                // it is the first failure
                return Ok(Some(f));
            }
            debug!(
                "Prefix of {f} fails before the fast-scan hint: reward {} < required {}",
                outcome.reward, outcome.required_reward
            );
            (0, f)
        }
        None => {
            let outcome = check(checker, n).await?;
            if outcome.success {
                return Ok(None);
            }
            debug!(
                "Full candidate list fails: reward {} < required {}",
                outcome.reward, outcome.required_reward
            );
            (0, n)
        }
    };

    // Invariant: the prefix of length `right` fails, the prefix of length
    // `left` succeeds (length 0 vacuously), so the first failing index lies
    // in [left, right).
    while right - left > 1 {
        let mid = (left + right) / 2;
        if check(checker, mid).await?.success {
            left = mid;
        } else {
            right = mid;
        }
    }

    debug_assert_eq!(right - left, 1);
    Ok(Some(left))
}

async fn check<C: PrefixCheck>(checker: &C, n: usize) -> anyhow::Result<PrefixOutcome> {
    if n == 0 {
        return Ok(PrefixOutcome {
            success: true,
            reward: U256::zero(),
            required_reward: U256::zero(),
        });
    }
    checker.check_first_n(n).await
}
