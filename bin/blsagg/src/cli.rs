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

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use blsagg_chain::{EthersChainAdapter, GatewaySignatureAggregator};
use blsagg_service::{BundleService, Settings};
use blsagg_table::{LocalBundleTable, QueryGroup};
use blsagg_task::spawn_tasks_with_shutdown;
use blsagg_types::{RewardModel, RewardToken};
use blsagg_utils::emit::{receive_and_log_events_with_filter, EVENT_CHANNEL_CAPACITY};
use clap::Parser;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, U256},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::{signal, sync::broadcast};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::{rpc, task::AggregatorTask};

/// BLS bundle aggregator.
///
/// Accepts signed transaction bundles over JSON-RPC, batches them into
/// aggregate bundles, and submits each aggregate through the verification
/// gateway.
#[derive(Debug, Parser)]
#[command(name = "blsagg", version)]
struct Cli {
    /// Ethereum JSON-RPC endpoint
    #[arg(long, env = "BLSAGG_RPC_URL", default_value = "http://localhost:8545")]
    rpc_url: String,

    /// Address of the verification gateway contract
    #[arg(long, env = "BLSAGG_GATEWAY")]
    gateway: Address,

    /// Address of the aggregator utilities contract
    #[arg(long, env = "BLSAGG_UTILITIES")]
    utilities: Address,

    /// Private key of the submitting wallet
    #[arg(long, env = "BLSAGG_PRIVATE_KEY")]
    private_key: String,

    /// Reward currency: "ether" or "token:0x…"
    #[arg(long, env = "BLSAGG_REWARD_TOKEN", default_value = "ether")]
    reward_token: RewardToken,

    /// Required reward per unit of estimated gas, in the reward currency's
    /// smallest denomination
    #[arg(long, default_value_t = 0)]
    reward_per_gas: u64,

    /// Required reward per byte of call data
    #[arg(long, default_value_t = 0)]
    reward_per_byte: u64,

    /// Cap on rows fetched per eligibility query
    #[arg(long, default_value_t = 50)]
    bundle_query_limit: usize,

    /// Target and hard cap on actions per aggregate
    #[arg(long, default_value_t = 12)]
    max_aggregation_size: usize,

    /// Soft submission deadline after the first eligible activity
    #[arg(long, default_value_t = 5000)]
    max_aggregation_delay_millis: u64,

    /// Cap on concurrently unconfirmed aggregates
    #[arg(long, default_value_t = 3)]
    max_unconfirmed_aggregations: usize,

    /// Largest eligibility delay (in blocks) before a failing bundle is
    /// abandoned
    #[arg(long, default_value_t = 16)]
    max_eligibility_delay: u64,

    /// How long to wait for a submitted aggregate to be mined
    #[arg(long, default_value_t = 60)]
    submission_timeout_secs: u64,

    /// Block watcher poll interval
    #[arg(long, default_value_t = 1000)]
    block_poll_interval_millis: u64,

    /// JSON-RPC listen address for bundle ingress
    #[arg(long, default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Prometheus exporter listen address; disabled when omitted
    #[arg(long)]
    metrics_listen: Option<SocketAddr>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log file; stdout when omitted
    #[arg(long)]
    log_file: Option<String>,
}

/// Parse the CLI, wire the components, and run until ctrl-c.
pub(crate) async fn run() -> anyhow::Result<()> {
    let opt = Cli::parse();

    let (appender, _guard) = match &opt.log_file {
        Some(log_file) => {
            tracing_appender::non_blocking(tracing_appender::rolling::never(".", log_file))
        }
        None => tracing_appender::non_blocking(io::stdout()),
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(opt.log_level.parse::<Level>()?)
        .with_writer(appender)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    info!(
        "Starting aggregator: gateway {:?}, utilities {:?}, reward {}, ingress {}",
        opt.gateway, opt.utilities, opt.reward_token, opt.listen
    );

    if let Some(metrics_addr) = opt.metrics_listen {
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
            .context("metrics exporter should start")?;
    }

    let provider =
        Provider::<Http>::try_from(opt.rpc_url.as_str()).context("should parse RPC url")?;
    let chain_id = provider
        .get_chainid()
        .await
        .context("should fetch chain id")?;
    let wallet = opt
        .private_key
        .parse::<LocalWallet>()
        .context("should parse submitter key")?
        .with_chain_id(chain_id.as_u64());
    let wallet_address = wallet.address();
    let client = Arc::new(SignerMiddleware::new(provider, wallet));
    info!("Submitting as {wallet_address:?} on chain {chain_id}");

    let reward = RewardModel {
        token: opt.reward_token,
        per_gas: U256::from(opt.reward_per_gas),
        per_byte: U256::from(opt.reward_per_byte),
    };
    let chain = Arc::new(EthersChainAdapter::new(
        Arc::clone(&client),
        opt.gateway,
        opt.utilities,
        wallet_address,
        opt.reward_token,
    ));
    let signatures = Arc::new(GatewaySignatureAggregator::new(
        Arc::clone(&client),
        opt.gateway,
    ));

    let (table_event_sender, table_events) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let query_group = Arc::new(QueryGroup::new(LocalBundleTable::new(), table_event_sender));
    let (event_sender, events) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let _event_log = receive_and_log_events_with_filter(events, |_| true);
    let _table_event_log = receive_and_log_events_with_filter(table_events, |_| true);

    let service = BundleService::new(
        chain,
        query_group,
        signatures,
        Settings {
            bundle_query_limit: opt.bundle_query_limit,
            max_aggregation_size: opt.max_aggregation_size,
            max_aggregation_delay: Duration::from_millis(opt.max_aggregation_delay_millis),
            max_unconfirmed_aggregations: opt.max_unconfirmed_aggregations,
            max_eligibility_delay: opt.max_eligibility_delay,
            reward,
            submission_timeout: Duration::from_secs(opt.submission_timeout_secs),
            block_poll_interval: Duration::from_millis(opt.block_poll_interval_millis),
        },
        event_sender,
    );

    let rpc_handle = rpc::serve(opt.listen, Arc::clone(&service)).await?;
    info!("Bundle ingress listening on {}", opt.listen);

    spawn_tasks_with_shutdown(
        [AggregatorTask::boxed(service, rpc_handle)],
        signal::ctrl_c(),
    )
    .await;
    info!("Shutdown, goodbye");
    Ok(())
}
