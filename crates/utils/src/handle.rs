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

//! Utilities for working with future handles.

use anyhow::Context;
use tokio::task::JoinHandle;

/// Flatten a `JoinHandle` result.
///
/// Merges the two kinds of errors awaiting a handle can produce. Useful when
/// joining several spawned handles together.
pub async fn flatten_handle<T>(handle: JoinHandle<anyhow::Result<T>>) -> anyhow::Result<T> {
    match handle.await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(err)?,
        Err(err) => Err(err).context("handling failed")?,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flattens_task_and_join_outcomes() {
        let ok = tokio::spawn(async { Ok(7) });
        assert_eq!(flatten_handle(ok).await.unwrap(), 7);

        let failed: JoinHandle<anyhow::Result<u32>> =
            tokio::spawn(async { Err(anyhow::anyhow!("boom")) });
        assert!(flatten_handle(failed).await.is_err());
    }
}
