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

//! JSON-RPC ingress: the single `add(bundle)` operation.

use std::{net::SocketAddr, sync::Arc};

use blsagg_chain::ChainAdapter;
use blsagg_service::BundleService;
use blsagg_table::BundleTable;
use blsagg_types::{Bundle, SignatureAggregator, TransactionFailure};
use jsonrpsee::{
    core::RpcResult,
    proc_macros::rpc,
    server::{ServerBuilder, ServerHandle},
    types::error::ErrorObjectOwned,
};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Response of `aggregator_addBundle`: empty `failures` means the bundle was
/// accepted and queued.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddBundleResponse {
    pub(crate) failures: Vec<TransactionFailure>,
}

#[rpc(server, namespace = "aggregator")]
pub(crate) trait AggregatorApi {
    /// Submit a signed bundle for aggregation.
    #[method(name = "addBundle")]
    async fn add_bundle(&self, bundle: Bundle) -> RpcResult<AddBundleResponse>;
}

pub(crate) struct AggregatorApiImpl<C, T, A> {
    service: Arc<BundleService<C, T, A>>,
}

#[async_trait::async_trait]
impl<C, T, A> AggregatorApiServer for AggregatorApiImpl<C, T, A>
where
    C: ChainAdapter,
    T: BundleTable,
    A: SignatureAggregator,
{
    async fn add_bundle(&self, bundle: Bundle) -> RpcResult<AddBundleResponse> {
        match self.service.add(bundle).await {
            Ok(failures) => Ok(AddBundleResponse { failures }),
            Err(err) => {
                error!("Internal error adding bundle: {err:#}");
                Err(ErrorObjectOwned::owned(
                    jsonrpsee::types::error::INTERNAL_ERROR_CODE,
                    "internal error adding bundle",
                    None::<()>,
                ))
            }
        }
    }
}

/// Start the ingress server.
pub(crate) async fn serve<C, T, A>(
    addr: SocketAddr,
    service: Arc<BundleService<C, T, A>>,
) -> anyhow::Result<ServerHandle>
where
    C: ChainAdapter,
    T: BundleTable,
    A: SignatureAggregator,
{
    let server = ServerBuilder::default().build(addr).await?;
    Ok(server.start(AggregatorApiImpl { service }.into_rpc()))
}
