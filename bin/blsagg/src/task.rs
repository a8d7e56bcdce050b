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

use std::sync::Arc;

use anyhow::Context;
use blsagg_chain::ChainAdapter;
use blsagg_service::BundleService;
use blsagg_table::BundleTable;
use blsagg_task::Task;
use blsagg_types::SignatureAggregator;
use jsonrpsee::server::ServerHandle;
use tokio_util::sync::CancellationToken;

/// Top-level task owning the running service and its ingress server.
///
/// The service drives itself; this task waits for shutdown and winds both
/// down in order (ingress first, so no new bundles arrive mid-drain).
pub(crate) struct AggregatorTask<C, T, A> {
    service: Arc<BundleService<C, T, A>>,
    rpc_handle: ServerHandle,
}

impl<C, T, A> AggregatorTask<C, T, A>
where
    C: ChainAdapter,
    T: BundleTable,
    A: SignatureAggregator,
{
    pub(crate) fn boxed(
        service: Arc<BundleService<C, T, A>>,
        rpc_handle: ServerHandle,
    ) -> Box<dyn Task> {
        Box::new(Self {
            service,
            rpc_handle,
        })
    }
}

#[async_trait::async_trait]
impl<C, T, A> Task for AggregatorTask<C, T, A>
where
    C: ChainAdapter,
    T: BundleTable,
    A: SignatureAggregator,
{
    async fn run(self: Box<Self>, shutdown_token: CancellationToken) -> anyhow::Result<()> {
        shutdown_token.cancelled().await;
        self.rpc_handle
            .stop()
            .context("ingress server should stop")?;
        self.service.stop().await;
        Ok(())
    }
}
