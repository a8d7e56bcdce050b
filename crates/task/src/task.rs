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

use async_trait::async_trait;
use blsagg_utils::handle::flatten_handle;
use futures::{future::try_join_all, Future};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A top-level long-running component of the aggregator binary.
#[async_trait]
pub trait Task: Sync + Send + 'static {
    /// Run the task until it finishes or the token is cancelled.
    async fn run(self: Box<Self>, shutdown_token: CancellationToken) -> anyhow::Result<()>;
}

/// Spawn a set of tasks and wait for a shutdown signal.
///
/// Each task runs on the runtime holding a clone of the shared token and a
/// shutdown scope. When the signal resolves (or any task exits unexpectedly)
/// the token is cancelled and this function waits for every task to drop its
/// scope on the way out.
pub async fn spawn_tasks_with_shutdown<T, R, E>(
    tasks: impl IntoIterator<Item = Box<dyn Task>>,
    signal: T,
) where
    T: Future<Output = Result<R, E>> + Send + 'static,
    E: std::fmt::Debug,
{
    let (shutdown_scope, mut shutdown_wait) = mpsc::channel::<()>(1);
    let shutdown_token = CancellationToken::new();
    let mut shutdown_scope = Some(shutdown_scope);

    let handles: Vec<_> = tasks
        .into_iter()
        .map(|task| {
            let token = shutdown_token.clone();
            let scope = shutdown_scope.clone();
            flatten_handle(tokio::spawn(async move {
                let result = task.run(token).await;
                drop(scope);
                result
            }))
        })
        .collect();

    tokio::select! {
        result = try_join_all(handles) => {
            error!("Task exited unexpectedly: {result:?}");
        }
        result = signal => {
            match result {
                Ok(_) => info!("Received signal, shutting down"),
                Err(error) => error!("Error while waiting for signal: {error:?}"),
            }
        }
    }

    shutdown_token.cancel();
    shutdown_scope.take();
    shutdown_wait.recv().await;
}
