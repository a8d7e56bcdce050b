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

use std::{
    fmt::{self, Display},
    sync::Arc,
};

use blsagg_types::RowId;
use ethers::types::H256;

/// Events emitted by the aggregation engine, observable by upper layers.
#[derive(Clone, Debug)]
pub enum AggregatorEvent {
    /// A client bundle passed admission and was persisted
    BundleAdded {
        /// Assigned row id
        row_id: RowId,
        /// Short form of each sender public key
        public_key_shorts: Vec<String>,
    },
    /// An aggregate was formed and is about to be submitted
    AggregateFormed {
        /// Rows included in the aggregate
        row_ids: Vec<RowId>,
        /// Total actions in the aggregate
        action_count: usize,
    },
    /// A submission is blocked on the unconfirmed-action cap
    WaitingUnconfirmedSpace {
        /// Actions currently reserved by unconfirmed aggregates
        unconfirmed_actions: usize,
    },
    /// An aggregate's transaction was mined
    SubmissionConfirmed {
        /// Rows covered by the aggregate
        row_ids: Vec<RowId>,
        /// Block the transaction landed in
        block_number: u64,
        /// Transaction hash
        tx_hash: H256,
    },
    /// An aggregate's transaction was not mined; its rows stay in the table
    SubmissionFailed {
        /// Rows covered by the aggregate
        row_ids: Vec<RowId>,
        /// Why the submission failed
        error: Arc<String>,
    },
    /// A row failed economically and was deferred with a doubled delay
    RowRescheduled {
        /// The deferred row
        row_id: RowId,
        /// Block the row becomes eligible again
        eligible_after: u64,
        /// Delay that will apply on its next failure
        next_eligibility_delay: u64,
    },
    /// A row exhausted its eligibility delays and was dropped
    RowAbandoned {
        /// The dropped row
        row_id: RowId,
    },
}

impl Display for AggregatorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BundleAdded {
                row_id,
                public_key_shorts,
            } => write!(
                f,
                "Bundle added.    Row id: {row_id}    Senders: {}",
                public_key_shorts.join(", ")
            ),
            Self::AggregateFormed {
                row_ids,
                action_count,
            } => write!(
                f,
                "Aggregate formed.    Rows: {}    Actions: {action_count}",
                join_row_ids(row_ids)
            ),
            Self::WaitingUnconfirmedSpace {
                unconfirmed_actions,
            } => write!(
                f,
                "Waiting for unconfirmed space.    Unconfirmed actions: {unconfirmed_actions}"
            ),
            Self::SubmissionConfirmed {
                row_ids,
                block_number,
                tx_hash,
            } => write!(
                f,
                "Submission confirmed!    Rows: {}    Block number: {block_number}    Transaction hash: {tx_hash:?}",
                join_row_ids(row_ids)
            ),
            Self::SubmissionFailed { row_ids, error } => write!(
                f,
                "Submission failed, rows remain queued.    Rows: {}    Error: {error}",
                join_row_ids(row_ids)
            ),
            Self::RowRescheduled {
                row_id,
                eligible_after,
                next_eligibility_delay,
            } => write!(
                f,
                "Row rescheduled.    Row id: {row_id}    Eligible after block: {eligible_after}    Next delay: {next_eligibility_delay}"
            ),
            Self::RowAbandoned { row_id } => {
                write!(f, "Row abandoned after exhausting delays.    Row id: {row_id}")
            }
        }
    }
}

fn join_row_ids(row_ids: &[RowId]) -> String {
    row_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
