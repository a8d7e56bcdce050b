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

//! Block watcher utility functions.

use std::time::Duration;

use blsagg_chain::ChainAdapter;
use tokio::time;
use tracing::warn;

/// Wait until the chain head moves past `last_seen` and return the new block
/// number.
///
/// Polls with unlimited retries; provider errors are logged and retried
/// after the poll interval.
pub async fn wait_for_new_block<C: ChainAdapter>(
    chain: &C,
    last_seen: u64,
    poll_interval: Duration,
) -> u64 {
    loop {
        match chain.block_number().await {
            Ok(block_number) if block_number > last_seen => return block_number,
            Ok(_) => {}
            Err(error) => warn!("Could not poll block number: {error}"),
        }
        time::sleep(poll_interval).await;
    }
}
