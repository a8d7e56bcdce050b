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
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use anyhow::Context;
use blsagg_chain::ChainAdapter;
use blsagg_table::{BundleTable, QueryGroup};
use blsagg_task::wait_for_new_block;
use blsagg_types::{
    contracts::ProcessBundleReturn, Bundle, BundleRow, RewardModel, RowId, SignatureAggregator,
    TransactionFailure,
};
use ethers::{abi::AbiDecode, types::U256};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, info, instrument, warn};

use crate::{
    culprit::{find_first_failure_index, CandidateReward, PrefixCheck, PrefixOutcome},
    emit::AggregatorEvent,
    tasks::TaskTracker,
    timer::SubmissionTimer,
};

/// Delay before the block-tick loop starts watching for new heads.
const BLOCK_LOOP_WARMUP: Duration = Duration::from_millis(500);

/// Aggregation engine configuration, fixed at construction.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Cap on rows fetched per eligibility query
    pub bundle_query_limit: usize,
    /// Target and hard cap on actions per aggregate
    pub max_aggregation_size: usize,
    /// Soft deadline after the first eligible activity
    pub max_aggregation_delay: Duration,
    /// Concurrency cap: with `max_aggregation_size`, bounds the in-flight
    /// unconfirmed action count
    pub max_unconfirmed_aggregations: usize,
    /// Largest `next_eligibility_delay` before a failing row is dropped
    pub max_eligibility_delay: u64,
    /// Linear reward requirement bundles must meet
    pub reward: RewardModel,
    /// How long to wait for a submitted aggregate to be mined
    pub submission_timeout: Duration,
    /// Poll interval of the block-tick loop
    pub block_poll_interval: Duration,
}

/// The aggregation engine.
///
/// Admits client bundles into the table, batches eligible rows into
/// aggregates on timer firings, excises bundles that fail to pay for
/// themselves, and submits each aggregate through the gateway while tracking
/// it as unconfirmed until it is mined.
#[derive(Debug)]
pub struct BundleService<C, T, A> {
    chain: Arc<C>,
    query_group: Arc<QueryGroup<T>>,
    signatures: Arc<A>,
    settings: Settings,
    event_sender: broadcast::Sender<AggregatorEvent>,
    timer: SubmissionTimer,
    unconfirmed: Mutex<UnconfirmedState>,
    unconfirmed_changed: Notify,
    submissions_in_progress: AtomicUsize,
    stopping: AtomicBool,
    stopped: AtomicBool,
    shutdown: Notify,
    tasks: TaskTracker,
    me: Weak<Self>,
}

#[derive(Debug, Default)]
struct UnconfirmedState {
    aggregates: HashMap<u64, UnconfirmedAggregate>,
    row_ids: HashSet<RowId>,
    action_count: usize,
    next_aggregate_id: u64,
}

#[derive(Debug)]
struct UnconfirmedAggregate {
    action_count: usize,
    row_ids: Vec<RowId>,
}

impl UnconfirmedState {
    fn reserve(&mut self, row_ids: &[RowId], action_count: usize) -> u64 {
        self.next_aggregate_id += 1;
        self.row_ids.extend(row_ids.iter().copied());
        self.action_count += action_count;
        self.aggregates.insert(
            self.next_aggregate_id,
            UnconfirmedAggregate {
                action_count,
                row_ids: row_ids.to_vec(),
            },
        );
        self.next_aggregate_id
    }
}

struct AugmentOutcome {
    aggregate: Bundle,
    included: Vec<BundleRow>,
    failed_row: Option<BundleRow>,
    remaining: Vec<BundleRow>,
}

struct MeasuredReward {
    success: bool,
    reward: U256,
}

impl<C, T, A> BundleService<C, T, A>
where
    C: ChainAdapter,
    T: BundleTable,
    A: SignatureAggregator,
{
    /// Start the engine: spawns the submission timer, the loop consuming its
    /// firings, and the block-tick loop.
    pub fn new(
        chain: Arc<C>,
        query_group: Arc<QueryGroup<T>>,
        signatures: Arc<A>,
        settings: Settings,
        event_sender: broadcast::Sender<AggregatorEvent>,
    ) -> Arc<Self> {
        let (timer, firing_rx) = SubmissionTimer::spawn(settings.max_aggregation_delay);
        let service = Arc::new_cyclic(|me| Self {
            chain,
            query_group,
            signatures,
            settings,
            event_sender,
            timer,
            unconfirmed: Mutex::new(UnconfirmedState::default()),
            unconfirmed_changed: Notify::new(),
            submissions_in_progress: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            shutdown: Notify::new(),
            tasks: TaskTracker::new(),
            me: me.clone(),
        });
        service.tasks.spawn(
            "submission-loop",
            Arc::clone(&service).submission_loop(firing_rx),
        );
        service
            .tasks
            .spawn("block-tick-loop", Arc::clone(&service).block_tick_loop());
        service
    }

    /// Admit a client bundle.
    ///
    /// Returns the admission failures, empty on success. A bundle that fails
    /// any check is not persisted.
    #[instrument(skip_all)]
    pub async fn add(&self, bundle: Bundle) -> anyhow::Result<Vec<TransactionFailure>> {
        if !bundle.is_well_formed() {
            return Ok(vec![TransactionFailure::InvalidFormat {
                description: format!(
                    "{} sender keys for {} operations",
                    bundle.sender_public_keys.len(),
                    bundle.operations.len()
                ),
            }]);
        }
        if !self
            .signatures
            .verify(&bundle)
            .await
            .context("should verify bundle signature")?
        {
            return Ok(vec![TransactionFailure::InvalidSignature]);
        }
        let failures = self
            .chain
            .check_nonces(&bundle)
            .await
            .context("should check bundle nonces")?;
        if !failures.is_empty() {
            return Ok(failures);
        }

        let public_key_shorts = bundle
            .sender_public_keys
            .iter()
            .map(|key| key.short())
            .collect();
        let row = {
            let table = self.query_group.acquire().await;
            let block_number = self
                .chain
                .block_number()
                .await
                .context("should fetch block number for admission")?;
            table
                .add_row(bundle, block_number)
                .await
                .context("should persist admitted bundle")?
        };
        AggregatorMetrics::increment_bundles_added();
        self.emit(AggregatorEvent::BundleAdded {
            row_id: row.id,
            public_key_shorts,
        });
        self.schedule_try_aggregating();
        Ok(Vec::new())
    }

    /// Wait until every aggregate that is unconfirmed right now has been
    /// confirmed or released.
    pub async fn wait_for_confirmations(&self) {
        let snapshot: Vec<u64> = self.unconfirmed.lock().aggregates.keys().copied().collect();
        loop {
            let changed = self.unconfirmed_changed.notified();
            let settled = {
                let state = self.unconfirmed.lock();
                snapshot.iter().all(|id| !state.aggregates.contains_key(id))
            };
            if settled {
                return;
            }
            changed.await;
        }
    }

    /// Cooperative shutdown: stop the timer and loops, then drain in-flight
    /// tasks. Chain calls already underway are awaited to completion.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.shutdown.notify_waiters();
        self.timer.shutdown();
        self.tasks.drain().await;
        self.stopped.store(true, Ordering::Release);
        info!("Bundle service stopped");
    }

    fn stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    fn emit(&self, event: AggregatorEvent) {
        let _ = self.event_sender.send(event);
    }

    fn schedule_try_aggregating(&self) {
        let Some(service) = self.me.upgrade() else {
            return;
        };
        self.tasks.spawn("try-aggregating", async move {
            service.try_aggregating().await;
            Ok(())
        });
    }

    async fn submission_loop(
        self: Arc<Self>,
        mut firing_rx: mpsc::Receiver<()>,
    ) -> anyhow::Result<()> {
        while let Some(()) = firing_rx.recv().await {
            self.run_submission().await;
        }
        debug!("Submission loop stopped");
        Ok(())
    }

    async fn block_tick_loop(self: Arc<Self>) -> anyhow::Result<()> {
        tokio::time::sleep(BLOCK_LOOP_WARMUP).await;
        let mut last_seen = 0;
        while !self.stopping() {
            tokio::select! {
                block_number = wait_for_new_block(
                    self.chain.as_ref(),
                    last_seen,
                    self.settings.block_poll_interval,
                ) => {
                    last_seen = block_number;
                    self.try_aggregating().await;
                }
                _ = self.shutdown.notified() => break,
            }
        }
        debug!("Block-tick loop stopped");
        Ok(())
    }

    /// Assess the eligible backlog and drive the submission timer: trigger
    /// at a full aggregate's worth of actions, arm the deadline when any
    /// work exists, disarm otherwise.
    async fn try_aggregating(&self) {
        if self.stopping() {
            return;
        }
        if self.submissions_in_progress.load(Ordering::Acquire) > 0 {
            // a fresh pass is scheduled unconditionally after every
            // submission, so nothing is lost by returning here
            return;
        }
        match self.eligible_action_count().await {
            Ok(action_count) => {
                if action_count >= self.settings.max_aggregation_size {
                    self.timer.trigger();
                } else if action_count > 0 {
                    self.timer.notify_active();
                } else {
                    self.timer.clear();
                }
            }
            Err(error) => warn!("Could not assess eligible bundles: {error:#}"),
        }
    }

    async fn eligible_action_count(&self) -> anyhow::Result<usize> {
        let table = self.query_group.acquire().await;
        let block_number = self.chain.block_number().await?;
        let rows = table
            .find_eligible(block_number, self.settings.bundle_query_limit)
            .await?;
        let unconfirmed = self.unconfirmed.lock();
        Ok(rows
            .iter()
            .filter(|row| !unconfirmed.row_ids.contains(&row.id))
            .map(|row| row.bundle.action_count())
            .sum())
    }

    #[instrument(skip_all)]
    async fn run_submission(&self) {
        self.submissions_in_progress.fetch_add(1, Ordering::AcqRel);
        if let Err(error) = self.run_submission_inner().await {
            warn!("Submission pass failed: {error:#}");
        }
        self.submissions_in_progress.fetch_sub(1, Ordering::AcqRel);
        self.schedule_try_aggregating();
    }

    async fn run_submission_inner(&self) -> anyhow::Result<()> {
        let (aggregate, included_ids) = {
            let table = self.query_group.acquire().await;
            let block_number = self.chain.block_number().await?;
            let rows = table
                .find_eligible(block_number, self.settings.bundle_query_limit)
                .await?;
            let rows: Vec<BundleRow> = {
                let unconfirmed = self.unconfirmed.lock();
                rows.into_iter()
                    .filter(|row| !unconfirmed.row_ids.contains(&row.id))
                    .collect()
            };
            self.create_aggregate_bundle(&table, block_number, rows)
                .await?
        };
        if aggregate.is_empty() {
            return Ok(());
        }
        self.emit(AggregatorEvent::AggregateFormed {
            row_ids: included_ids.clone(),
            action_count: aggregate.action_count(),
        });
        self.submit_aggregate_bundle(aggregate, included_ids).await
    }

    /// Build the largest profitable aggregate from the eligible rows.
    ///
    /// When a row fails its economics check it is excised and rescheduled,
    /// and the aggregate closes at the prefix before it. Rows beyond the
    /// culprit stay eligible in the table and are picked up by the pass that
    /// is scheduled after every submission; charging them against an
    /// aggregate they did not benefit from would penalize them for their
    /// neighbor's deficit.
    async fn create_aggregate_bundle(
        &self,
        table: &T,
        block_number: u64,
        mut remaining: Vec<BundleRow>,
    ) -> anyhow::Result<(Bundle, Vec<RowId>)> {
        let mut aggregate = Bundle::default();
        let mut included_ids = Vec::new();
        loop {
            if remaining.is_empty() || aggregate.action_count() >= self.settings.max_aggregation_size
            {
                break;
            }
            let outcome = self.augment_aggregate_bundle(&aggregate, remaining).await?;
            let made_progress = !outcome.included.is_empty();
            included_ids.extend(outcome.included.iter().map(|row| row.id));
            aggregate = outcome.aggregate;
            remaining = outcome.remaining;
            if let Some(failed) = outcome.failed_row {
                self.handle_failed_row(table, block_number, failed).await?;
                break;
            }
            if !made_progress {
                break;
            }
        }
        Ok((aggregate, included_ids))
    }

    /// Admit a size-bounded prefix of `rows` on top of `previous`, measure
    /// each admitted bundle's reward in one staged simulation, and search
    /// for the first bundle that fails to pay.
    async fn augment_aggregate_bundle(
        &self,
        previous: &Bundle,
        rows: Vec<BundleRow>,
    ) -> anyhow::Result<AugmentOutcome> {
        let mut included = Vec::new();
        let mut remaining = Vec::new();
        let mut action_count = previous.action_count();
        let mut rows_iter = rows.into_iter();
        for row in rows_iter.by_ref() {
            let row_actions = row.bundle.action_count();
            if action_count + row_actions > self.settings.max_aggregation_size {
                // stop at the first overflowing row; order is preserved
                remaining.push(row);
                break;
            }
            action_count += row_actions;
            included.push(row);
        }
        remaining.extend(rows_iter);

        if included.is_empty() {
            return Ok(AugmentOutcome {
                aggregate: previous.clone(),
                included,
                failed_row: None,
                remaining,
            });
        }

        let rewards = self.measure_bundle_rewards(previous, &included).await?;
        let candidates: Vec<CandidateReward> = included
            .iter()
            .zip(&rewards)
            .map(|(row, measured)| CandidateReward {
                success: measured.success,
                reward: measured.reward,
                below_lower_bound: measured.reward
                    < self
                        .settings
                        .reward
                        .lower_bound(self.chain.process_bundle_call(&row.bundle).data.len()),
            })
            .collect();

        let attempt = AggregationAttempt {
            service: self,
            previous,
            included: &included,
            candidates: &candidates,
        };
        match find_first_failure_index(&attempt, &candidates).await? {
            None => {
                let aggregate = self.aggregate_with(previous, &included).await?;
                Ok(AugmentOutcome {
                    aggregate,
                    included,
                    failed_row: None,
                    remaining,
                })
            }
            Some(index) => {
                // re-derive the remainder by scanning past the culprit
                let mut tail = included.split_off(index);
                let failed = tail.remove(0);
                let mut rest = tail;
                rest.extend(remaining);
                debug!(
                    "Row {} fails to cover its reward requirement, excising",
                    failed.id
                );
                let aggregate = self.aggregate_with(previous, &included).await?;
                Ok(AugmentOutcome {
                    aggregate,
                    included,
                    failed_row: Some(failed),
                    remaining: rest,
                })
            }
        }
    }

    /// Stage `previous, b₀, …, bₙ₋₁` in one atomic simulation and attribute
    /// a reward-balance delta to each of the trailing bundles. A bundle
    /// succeeds when its staged `processBundle` call did and at least one
    /// inner operation went through.
    async fn measure_bundle_rewards(
        &self,
        previous: &Bundle,
        included: &[BundleRow],
    ) -> anyhow::Result<Vec<MeasuredReward>> {
        let offset = usize::from(!previous.is_empty());
        let mut calls = Vec::with_capacity(included.len() + offset);
        if !previous.is_empty() {
            calls.push(self.chain.process_bundle_call(previous));
        }
        calls.extend(
            included
                .iter()
                .map(|row| self.chain.process_bundle_call(&row.bundle)),
        );

        let sequence = self
            .chain
            .call_static_sequence_with_measure(self.chain.measure_call(), calls)
            .await?;
        let expected = included.len() + offset;
        if sequence.call_results.len() != expected
            || sequence.measure_results.len() != expected + 1
        {
            anyhow::bail!(
                "staged simulation returned {} call results for {expected} calls",
                sequence.call_results.len()
            );
        }

        Ok((0..included.len())
            .map(|i| {
                let call = &sequence.call_results[offset + i];
                let before = &sequence.measure_results[offset + i];
                let after = &sequence.measure_results[offset + i + 1];
                MeasuredReward {
                    success: call.success
                        && before.success
                        && after.success
                        && any_operation_succeeded(&call.return_data),
                    reward: after.balance.saturating_sub(before.balance),
                }
            })
            .collect())
    }

    /// Aggregate `previous` and the given rows' bundles. Single-bundle
    /// aggregates skip the signature backend.
    async fn aggregate_with(&self, previous: &Bundle, rows: &[BundleRow]) -> anyhow::Result<Bundle> {
        let mut bundles = Vec::with_capacity(rows.len() + 1);
        if !previous.is_empty() {
            bundles.push(previous.clone());
        }
        bundles.extend(rows.iter().map(|row| row.bundle.clone()));
        match bundles.len() {
            0 => Ok(Bundle::default()),
            1 => Ok(bundles.swap_remove(0)),
            _ => self
                .signatures
                .aggregate(&bundles)
                .await
                .context("should aggregate bundle signatures"),
        }
    }

    /// Defer a failing row with a doubled delay, or drop it once the delay
    /// exceeds the configured maximum.
    async fn handle_failed_row(
        &self,
        table: &T,
        block_number: u64,
        mut row: BundleRow,
    ) -> anyhow::Result<()> {
        if row.next_eligibility_delay <= self.settings.max_eligibility_delay {
            row.eligible_after = block_number + row.next_eligibility_delay;
            row.next_eligibility_delay *= 2;
            table
                .update_row(&row)
                .await
                .context("should reschedule failed row")?;
            AggregatorMetrics::increment_rows_rescheduled();
            self.emit(AggregatorEvent::RowRescheduled {
                row_id: row.id,
                eligible_after: row.eligible_after,
                next_eligibility_delay: row.next_eligibility_delay,
            });
        } else {
            table
                .remove_rows(&[row.id])
                .await
                .context("should drop exhausted row")?;
            AggregatorMetrics::increment_rows_abandoned();
            self.emit(AggregatorEvent::RowAbandoned { row_id: row.id });
        }
        self.unconfirmed.lock().row_ids.remove(&row.id);
        Ok(())
    }

    /// Reserve unconfirmed capacity for the aggregate (waiting for space if
    /// the cap is hit) and submit it in the background. Capacity is released
    /// in all terminal cases.
    async fn submit_aggregate_bundle(
        &self,
        aggregate: Bundle,
        row_ids: Vec<RowId>,
    ) -> anyhow::Result<()> {
        let action_count = aggregate.action_count();
        let action_cap =
            self.settings.max_unconfirmed_aggregations * self.settings.max_aggregation_size;

        let aggregate_id = loop {
            if self.stopping() {
                anyhow::bail!("not submitting while stopping; rows remain queued");
            }
            let changed = self.unconfirmed_changed.notified();
            let unconfirmed_actions = {
                let mut state = self.unconfirmed.lock();
                if state.action_count + action_count <= action_cap {
                    break state.reserve(&row_ids, action_count);
                }
                state.action_count
            };
            AggregatorMetrics::increment_waiting_unconfirmed_space();
            self.emit(AggregatorEvent::WaitingUnconfirmedSpace {
                unconfirmed_actions,
            });
            changed.await;
        };
        AggregatorMetrics::set_unconfirmed_actions(self.unconfirmed.lock().action_count);

        let Some(service) = self.me.upgrade() else {
            return Ok(());
        };
        let spawned_ids = row_ids.clone();
        self.tasks.spawn("finalize-submission", async move {
            service
                .finalize_submission(aggregate_id, aggregate, spawned_ids)
                .await
        });
        Ok(())
    }

    async fn finalize_submission(
        &self,
        aggregate_id: u64,
        aggregate: Bundle,
        row_ids: Vec<RowId>,
    ) -> anyhow::Result<()> {
        AggregatorMetrics::increment_submissions_sent();
        let result = self
            .chain
            .submit_bundle(&aggregate, self.settings.submission_timeout)
            .await;
        let outcome = match result {
            Ok(receipt) => {
                info!(
                    "Aggregate of {} rows confirmed in block {}",
                    row_ids.len(),
                    receipt.block_number
                );
                AggregatorMetrics::increment_submissions_confirmed();
                self.emit(AggregatorEvent::SubmissionConfirmed {
                    row_ids: row_ids.clone(),
                    block_number: receipt.block_number,
                    tx_hash: receipt.tx_hash,
                });
                let table = self.query_group.acquire().await;
                table
                    .remove_rows(&row_ids)
                    .await
                    .context("should remove confirmed rows")
            }
            Err(error) => {
                warn!("Aggregate submission failed: {error}");
                AggregatorMetrics::increment_submissions_failed();
                self.emit(AggregatorEvent::SubmissionFailed {
                    row_ids: row_ids.clone(),
                    error: Arc::new(error.to_string()),
                });
                // rows keep their eligibility and will be retried
                Ok(())
            }
        };
        self.release_unconfirmed(aggregate_id);
        self.schedule_try_aggregating();
        outcome
    }

    fn release_unconfirmed(&self, aggregate_id: u64) {
        let unconfirmed_actions = {
            let mut state = self.unconfirmed.lock();
            if let Some(entry) = state.aggregates.remove(&aggregate_id) {
                state.action_count -= entry.action_count;
                for row_id in entry.row_ids {
                    state.row_ids.remove(&row_id);
                }
            }
            state.action_count
        };
        AggregatorMetrics::set_unconfirmed_actions(unconfirmed_actions);
        self.unconfirmed_changed.notify_waiters();
    }
}

/// One culprit hunt over a fixed candidate list, layered on `previous`.
struct AggregationAttempt<'a, C, T, A> {
    service: &'a BundleService<C, T, A>,
    previous: &'a Bundle,
    included: &'a [BundleRow],
    candidates: &'a [CandidateReward],
}

#[async_trait::async_trait]
impl<C, T, A> PrefixCheck for AggregationAttempt<'_, C, T, A>
where
    C: ChainAdapter,
    T: BundleTable,
    A: SignatureAggregator,
{
    async fn check_first_n(&self, n: usize) -> anyhow::Result<PrefixOutcome> {
        let reward = self.candidates[..n]
            .iter()
            .fold(U256::zero(), |acc, candidate| acc + candidate.reward);
        let aggregate = self
            .service
            .aggregate_with(self.previous, &self.included[..n])
            .await?;
        let call_data_len = self.service.chain.process_bundle_call(&aggregate).data.len();
        let required_reward = match self.service.chain.estimate_gas(&aggregate).await {
            Ok(gas_estimate) => self
                .service
                .settings
                .reward
                .required_reward(gas_estimate, call_data_len),
            Err(error) => {
                // a prefix whose gas cannot even be estimated is failing
                debug!("Gas estimate failed for prefix of {n} bundles: {error}");
                U256::MAX
            }
        };
        Ok(PrefixOutcome {
            success: reward >= required_reward,
            reward,
            required_reward,
        })
    }
}

fn any_operation_succeeded(return_data: &ethers::types::Bytes) -> bool {
    match ProcessBundleReturn::decode(return_data) {
        Ok(decoded) => decoded.successes.iter().any(|success| *success),
        Err(_) => false,
    }
}

struct AggregatorMetrics;

impl AggregatorMetrics {
    fn increment_bundles_added() {
        metrics::counter!("aggregator_bundles_added").increment(1);
    }

    fn increment_rows_rescheduled() {
        metrics::counter!("aggregator_rows_rescheduled").increment(1);
    }

    fn increment_rows_abandoned() {
        metrics::counter!("aggregator_rows_abandoned").increment(1);
    }

    fn increment_submissions_sent() {
        metrics::counter!("aggregator_submissions_sent").increment(1);
    }

    fn increment_submissions_confirmed() {
        metrics::counter!("aggregator_submissions_confirmed").increment(1);
    }

    fn increment_submissions_failed() {
        metrics::counter!("aggregator_submissions_failed").increment(1);
    }

    fn increment_waiting_unconfirmed_space() {
        metrics::counter!("aggregator_waiting_unconfirmed_space").increment(1);
    }

    fn set_unconfirmed_actions(action_count: usize) {
        metrics::gauge!("aggregator_unconfirmed_actions").set(action_count as f64);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use blsagg_chain::{
        CallResult, ChainError, EthCall, MeasureResult, MockChainAdapter, SequenceWithMeasure,
        SubmitReceipt,
    };
    use blsagg_table::LocalBundleTable;
    use blsagg_types::{
        Action, BlsSignature, MockSignatureAggregator, Operation, PublicKey, RewardToken,
    };
    use ethers::{
        abi::AbiEncode,
        types::{Address, Bytes, H256},
    };
    use tokio::{
        sync::Semaphore,
        time::timeout,
    };

    use super::*;

    type TestService = BundleService<MockChainAdapter, LocalBundleTable, MockSignatureAggregator>;

    type Submissions = Arc<Mutex<Vec<Bundle>>>;

    const POISON_MARKER: u8 = 1;
    const REVERT_MARKER: u8 = 2;

    fn poison_nonce() -> U256 {
        U256::MAX
    }

    fn revert_nonce() -> U256 {
        U256::MAX - U256::one()
    }

    fn bundle_with_nonce(seed: u64, nonce: U256) -> Bundle {
        Bundle {
            sender_public_keys: vec![PublicKey([U256::from(seed); 4])],
            operations: vec![Operation {
                nonce,
                actions: vec![Action {
                    eth_value: U256::zero(),
                    contract_address: Address::from_low_u64_be(seed),
                    encoded_function: Bytes::new(),
                }],
            }],
            signature: BlsSignature::default(),
        }
    }

    fn one_action_bundle(seed: u64) -> Bundle {
        bundle_with_nonce(seed, U256::zero())
    }

    /// Pays nothing but processes successfully.
    fn poison_bundle(seed: u64) -> Bundle {
        bundle_with_nonce(seed, poison_nonce())
    }

    /// Reverts in the staged simulation.
    fn revert_bundle(seed: u64) -> Bundle {
        bundle_with_nonce(seed, revert_nonce())
    }

    fn marker_of(bundle: &Bundle) -> u8 {
        if bundle.operations.iter().any(|op| op.nonce == poison_nonce()) {
            POISON_MARKER
        } else if bundle.operations.iter().any(|op| op.nonce == revert_nonce()) {
            REVERT_MARKER
        } else {
            0
        }
    }

    fn encoded_process_call(bundle: &Bundle) -> EthCall {
        let mut data = vec![0u8; 4 + 32 * bundle.action_count()];
        data[0] = marker_of(bundle);
        EthCall {
            to: Address::from_low_u64_be(0xaa),
            data: data.into(),
        }
    }

    /// Healthy bundles pay one unit per call-data byte, poisoned bundles pay
    /// nothing, revert-marked bundles fail their staged call.
    fn staged_sequence(calls: &[EthCall]) -> SequenceWithMeasure {
        let ok_return: Bytes = ProcessBundleReturn {
            successes: vec![true],
            results: Vec::new(),
        }
        .encode()
        .into();
        let mut balance = U256::from(1_000_000u64);
        let mut measure_results = vec![MeasureResult {
            success: true,
            balance,
        }];
        let mut call_results = Vec::new();
        for call in calls {
            let (success, reward) = match call.data.first().copied().unwrap_or_default() {
                POISON_MARKER => (true, U256::zero()),
                REVERT_MARKER => (false, U256::zero()),
                _ => (true, U256::from(call.data.len())),
            };
            balance += reward;
            call_results.push(CallResult {
                success,
                return_data: if success { ok_return.clone() } else { Bytes::new() },
            });
            measure_results.push(MeasureResult {
                success: true,
                balance,
            });
        }
        SequenceWithMeasure {
            measure_results,
            call_results,
        }
    }

    fn mock_chain_core(block: Arc<AtomicU64>) -> MockChainAdapter {
        let mut chain = MockChainAdapter::new();
        chain.expect_block_number().returning(move || {
            let current = block.load(Ordering::SeqCst);
            Ok(current)
        });
        chain.expect_measure_call().returning(|| EthCall {
            to: Address::zero(),
            data: Bytes::new(),
        });
        chain
            .expect_process_bundle_call()
            .returning(encoded_process_call);
        chain
            .expect_call_static_sequence_with_measure()
            .returning(|_, calls| {
                let out = staged_sequence(&calls);
                Ok(out)
            });
        chain
    }

    fn with_zero_gas(chain: &mut MockChainAdapter) {
        chain
            .expect_estimate_gas()
            .returning(|_| Ok(U256::zero()));
    }

    fn with_clean_nonces(chain: &mut MockChainAdapter) {
        chain
            .expect_check_nonces()
            .returning(|_| Ok(Vec::new()));
    }

    fn mock_chain(block: Arc<AtomicU64>) -> MockChainAdapter {
        let mut chain = mock_chain_core(block);
        with_zero_gas(&mut chain);
        with_clean_nonces(&mut chain);
        chain
    }

    fn capture_submissions(chain: &mut MockChainAdapter) -> Submissions {
        let submissions: Submissions = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&submissions);
        chain.expect_submit_bundle().returning(move |bundle, _| {
            captured.lock().push(bundle.clone());
            Ok(SubmitReceipt {
                tx_hash: H256::zero(),
                block_number: 100,
            })
        });
        submissions
    }

    fn mock_signatures() -> MockSignatureAggregator {
        let mut signatures = MockSignatureAggregator::new();
        signatures
            .expect_verify()
            .returning(|_| Ok(true));
        with_concat_aggregation(&mut signatures);
        signatures
    }

    fn with_concat_aggregation(signatures: &mut MockSignatureAggregator) {
        signatures.expect_aggregate().returning(|bundles| {
            let out = Bundle::concat_unsigned(bundles);
            Ok(out)
        });
    }

    struct Harness {
        service: Arc<TestService>,
        events: broadcast::Receiver<AggregatorEvent>,
    }

    fn start(
        chain: MockChainAdapter,
        signatures: MockSignatureAggregator,
        settings: Settings,
    ) -> Harness {
        let (event_sender, events) = broadcast::channel(256);
        let query_group = Arc::new(QueryGroup::new(
            LocalBundleTable::new(),
            broadcast::channel(256).0,
        ));
        let service = BundleService::new(
            Arc::new(chain),
            query_group,
            Arc::new(signatures),
            settings,
            event_sender,
        );
        Harness { service, events }
    }

    fn settings() -> Settings {
        Settings {
            bundle_query_limit: 100,
            max_aggregation_size: 16,
            max_aggregation_delay: Duration::from_millis(500),
            max_unconfirmed_aggregations: 10,
            max_eligibility_delay: 8,
            reward: RewardModel {
                token: RewardToken::Native,
                per_gas: U256::zero(),
                per_byte: U256::one(),
            },
            submission_timeout: Duration::from_secs(5),
            block_poll_interval: Duration::from_secs(60),
        }
    }

    async fn seed_rows(service: &TestService, bundles: Vec<Bundle>) -> Vec<RowId> {
        let table = service.query_group.acquire().await;
        let mut ids = Vec::new();
        for bundle in bundles {
            ids.push(table.add_row(bundle, 0).await.unwrap().id);
        }
        ids
    }

    async fn table_rows(service: &TestService) -> Vec<BundleRow> {
        let table = service.query_group.acquire().await;
        table.find_eligible(u64::MAX, 1000).await.unwrap()
    }

    fn submitted_targets(bundle: &Bundle) -> Vec<Address> {
        bundle
            .operations
            .iter()
            .flat_map(|op| op.actions.iter().map(|action| action.contract_address))
            .collect()
    }

    fn targets(seeds: impl IntoIterator<Item = u64>) -> Vec<Address> {
        seeds.into_iter().map(Address::from_low_u64_be).collect()
    }

    fn assert_unconfirmed_empty(service: &TestService) {
        let state = service.unconfirmed.lock();
        assert_eq!(state.action_count, 0);
        assert!(state.row_ids.is_empty());
        assert!(state.aggregates.is_empty());
    }

    async fn wait_for_event(
        events: &mut broadcast::Receiver<AggregatorEvent>,
        mut pred: impl FnMut(&AggregatorEvent) -> bool,
    ) -> AggregatorEvent {
        timeout(Duration::from_secs(10), async {
            loop {
                match events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) => {}
                    Err(error) => panic!("event stream ended: {error}"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        timeout(Duration::from_secs(10), async {
            loop {
                if cond() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn add_rejects_malformed_bundles() {
        let block = Arc::new(AtomicU64::new(10));
        let h = start(
            mock_chain(Arc::clone(&block)),
            // no expectations: the signature backend must not be consulted
            MockSignatureAggregator::new(),
            settings(),
        );
        h.service.timer.shutdown();

        let mut bundle = one_action_bundle(1);
        bundle.sender_public_keys.clear();
        let failures = h.service.add(bundle).await.unwrap();
        assert!(matches!(
            failures[..],
            [TransactionFailure::InvalidFormat { .. }]
        ));
        assert!(table_rows(&h.service).await.is_empty());
    }

    #[tokio::test]
    async fn add_rejects_invalid_signatures() {
        let block = Arc::new(AtomicU64::new(10));
        let mut signatures = MockSignatureAggregator::new();
        signatures
            .expect_verify()
            .returning(|_| Ok(false));
        let h = start(mock_chain(Arc::clone(&block)), signatures, settings());
        h.service.timer.shutdown();

        let failures = h.service.add(one_action_bundle(1)).await.unwrap();
        assert_eq!(failures, vec![TransactionFailure::InvalidSignature]);
        assert!(table_rows(&h.service).await.is_empty());
    }

    #[tokio::test]
    async fn add_returns_nonce_failures_without_persisting() {
        let block = Arc::new(AtomicU64::new(10));
        let mut chain = mock_chain_core(Arc::clone(&block));
        with_zero_gas(&mut chain);
        let expected = TransactionFailure::NonceTooLow {
            key_index: 0,
            declared: U256::zero(),
            actual: U256::from(3),
        };
        let returned = expected.clone();
        chain.expect_check_nonces().returning(move |_| {
            let failure = returned.clone();
            Ok(vec![failure])
        });
        let h = start(chain, mock_signatures(), settings());
        h.service.timer.shutdown();

        let failures = h.service.add(one_action_bundle(1)).await.unwrap();
        assert_eq!(failures, vec![expected]);
        assert!(table_rows(&h.service).await.is_empty());
    }

    #[tokio::test]
    async fn add_persists_and_emits() {
        let block = Arc::new(AtomicU64::new(10));
        let mut h = start(mock_chain(Arc::clone(&block)), mock_signatures(), settings());
        h.service.timer.shutdown();

        let failures = h.service.add(one_action_bundle(7)).await.unwrap();
        assert!(failures.is_empty());

        let rows = table_rows(&h.service).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].eligible_after, 10);
        assert_eq!(rows[0].next_eligibility_delay, 1);

        let event = wait_for_event(&mut h.events, |event| {
            matches!(event, AggregatorEvent::BundleAdded { .. })
        })
        .await;
        let AggregatorEvent::BundleAdded {
            row_id,
            public_key_shorts,
        } = event
        else {
            unreachable!()
        };
        assert_eq!(row_id, rows[0].id);
        assert_eq!(public_key_shorts.len(), 1);
    }

    #[tokio::test]
    async fn happy_batch_confirms_and_clears() {
        let block = Arc::new(AtomicU64::new(10));
        let mut chain = mock_chain(Arc::clone(&block));
        let submissions = capture_submissions(&mut chain);
        let h = start(chain, mock_signatures(), settings());
        h.service.timer.shutdown();
        seed_rows(&h.service, (1..=10).map(one_action_bundle).collect()).await;

        h.service.run_submission().await;
        h.service.wait_for_confirmations().await;

        let submitted = submissions.lock().clone();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].action_count(), 10);
        // FIFO: included rows are a prefix of the eligible list in insertion order
        assert_eq!(submitted_targets(&submitted[0]), targets(1..=10));
        assert!(table_rows(&h.service).await.is_empty());
        assert_unconfirmed_empty(&h.service);
    }

    #[tokio::test]
    async fn overflow_splits_into_two_aggregates() {
        let block = Arc::new(AtomicU64::new(10));
        let mut chain = mock_chain(Arc::clone(&block));
        let submissions = capture_submissions(&mut chain);
        let h = start(chain, mock_signatures(), settings());
        h.service.timer.shutdown();
        seed_rows(&h.service, (1..=20).map(one_action_bundle).collect()).await;

        h.service.run_submission().await;
        // rows reserved by the unconfirmed aggregate are excluded from the
        // aggregator's view of the eligible list
        assert_eq!(h.service.eligible_action_count().await.unwrap(), 4);
        h.service.wait_for_confirmations().await;

        h.service.run_submission().await;
        h.service.wait_for_confirmations().await;

        let submitted = submissions.lock().clone();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].action_count(), 16);
        assert_eq!(submitted[1].action_count(), 4);
        assert_eq!(submitted_targets(&submitted[0]), targets(1..=16));
        assert_eq!(submitted_targets(&submitted[1]), targets(17..=20));
        assert!(table_rows(&h.service).await.is_empty());
        assert_unconfirmed_empty(&h.service);
    }

    #[tokio::test]
    async fn single_poisoner_is_excised_and_rescheduled() {
        let block = Arc::new(AtomicU64::new(10));
        let mut chain = mock_chain(Arc::clone(&block));
        let submissions = capture_submissions(&mut chain);
        let h = start(chain, mock_signatures(), settings());
        h.service.timer.shutdown();
        let bundles = vec![
            one_action_bundle(1),
            one_action_bundle(2),
            poison_bundle(3),
            one_action_bundle(4),
            one_action_bundle(5),
        ];
        let ids = seed_rows(&h.service, bundles).await;

        h.service.run_submission().await;
        h.service.wait_for_confirmations().await;

        {
            let submitted = submissions.lock().clone();
            assert_eq!(submitted.len(), 1);
            assert_eq!(submitted_targets(&submitted[0]), targets(1..=2));
        }
        let rows = table_rows(&h.service).await;
        assert_eq!(
            rows.iter().map(|row| row.id).collect::<Vec<_>>(),
            vec![ids[2], ids[3], ids[4]]
        );
        let poisoned = &rows[0];
        assert_eq!(poisoned.next_eligibility_delay, 2);
        assert_eq!(poisoned.eligible_after, 11);

        // the poisoned row is not yet eligible; the next pass takes the rest
        h.service.run_submission().await;
        h.service.wait_for_confirmations().await;

        let submitted = submissions.lock().clone();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted_targets(&submitted[1]), targets(4..=5));
        let rows = table_rows(&h.service).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, ids[2]);
        assert_unconfirmed_empty(&h.service);
    }

    #[tokio::test]
    async fn reverting_bundle_takes_the_backoff_path() {
        let block = Arc::new(AtomicU64::new(10));
        let mut chain = mock_chain(Arc::clone(&block));
        let submissions = capture_submissions(&mut chain);
        let h = start(chain, mock_signatures(), settings());
        h.service.timer.shutdown();
        let ids = seed_rows(
            &h.service,
            vec![one_action_bundle(1), revert_bundle(2), one_action_bundle(3)],
        )
        .await;

        h.service.run_submission().await;
        h.service.wait_for_confirmations().await;

        let submitted = submissions.lock().clone();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted_targets(&submitted[0]), targets([1]));
        let rows = table_rows(&h.service).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, ids[1]);
        assert_eq!(rows[0].next_eligibility_delay, 2);
    }

    #[tokio::test]
    async fn aggregate_gas_failure_is_bisected_to_its_culprit() {
        let block = Arc::new(AtomicU64::new(10));
        let mut chain = mock_chain_core(Arc::clone(&block));
        // a one-action aggregate is cheap, anything bigger is not
        chain.expect_estimate_gas().returning(|bundle| {
            let gas = if bundle.action_count() <= 1 {
                U256::zero()
            } else {
                U256::from(10_000)
            };
            Box::pin(async move { Ok(gas) })
        });
        let submissions = capture_submissions(&mut chain);
        let mut test_settings = settings();
        test_settings.reward.per_gas = U256::one();
        let h = start(chain, mock_signatures(), test_settings);
        h.service.timer.shutdown();
        let ids = seed_rows(
            &h.service,
            vec![one_action_bundle(1), one_action_bundle(2)],
        )
        .await;

        h.service.run_submission().await;
        h.service.wait_for_confirmations().await;

        let submitted = submissions.lock().clone();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted_targets(&submitted[0]), targets([1]));
        let rows = table_rows(&h.service).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, ids[1]);
        assert_eq!(rows[0].next_eligibility_delay, 2);
    }

    #[tokio::test]
    async fn backoff_exhaustion_drops_the_row() {
        let block = Arc::new(AtomicU64::new(10));
        // no submit expectation: submitting anything here is a bug
        let mut chain = mock_chain_core(Arc::clone(&block));
        with_zero_gas(&mut chain);
        let mut test_settings = settings();
        test_settings.max_eligibility_delay = 4;
        let mut h = start(chain, mock_signatures(), test_settings);
        h.service.timer.shutdown();
        seed_rows(&h.service, vec![poison_bundle(1)]).await;

        // delays double 1 → 2 → 4 → 8; the 8 > 4 step removes the row
        for expected_delay in [2u64, 4, 8] {
            h.service.run_submission().await;
            let rows = table_rows(&h.service).await;
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].next_eligibility_delay, expected_delay);
            assert!(rows[0].next_eligibility_delay <= 2 * 4);
            block.store(rows[0].eligible_after, Ordering::SeqCst);
        }
        h.service.run_submission().await;
        assert!(table_rows(&h.service).await.is_empty());

        let mut rescheduled = 0;
        let mut abandoned = 0;
        while let Ok(event) = h.events.try_recv() {
            match event {
                AggregatorEvent::RowRescheduled { .. } => rescheduled += 1,
                AggregatorEvent::RowAbandoned { .. } => abandoned += 1,
                _ => {}
            }
        }
        assert_eq!(rescheduled, 3);
        assert_eq!(abandoned, 1);
    }

    #[tokio::test]
    async fn back_pressure_defers_submissions_until_space_frees() {
        let block = Arc::new(AtomicU64::new(10));
        let mut chain = mock_chain_core(Arc::clone(&block));
        with_zero_gas(&mut chain);
        let submissions: Submissions = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Semaphore::new(0));
        {
            let submissions = Arc::clone(&submissions);
            let gate = Arc::clone(&gate);
            chain.expect_submit_bundle().returning(move |bundle, _| {
                submissions.lock().push(bundle.clone());
                let gate = Arc::clone(&gate);
                Box::pin(async move {
                    gate.acquire().await.expect("gate closed").forget();
                    Ok(SubmitReceipt {
                        tx_hash: H256::zero(),
                        block_number: 100,
                    })
                })
            });
        }
        let mut test_settings = settings();
        test_settings.max_aggregation_size = 4;
        test_settings.max_unconfirmed_aggregations = 2;
        let mut h = start(chain, mock_signatures(), test_settings);
        h.service.timer.shutdown();
        seed_rows(&h.service, (1..=12).map(one_action_bundle).collect()).await;

        h.service.run_submission().await;
        h.service.run_submission().await;
        assert_eq!(submissions.lock().len(), 2);
        assert_eq!(h.service.unconfirmed.lock().action_count, 8);

        let third = {
            let service = Arc::clone(&h.service);
            tokio::spawn(async move { service.run_submission().await })
        };
        wait_for_event(&mut h.events, |event| {
            matches!(event, AggregatorEvent::WaitingUnconfirmedSpace { .. })
        })
        .await;
        // still at the cap: the third submission has not begun
        assert_eq!(submissions.lock().len(), 2);

        gate.add_permits(1);
        wait_until(|| submissions.lock().len() == 3).await;

        gate.add_permits(2);
        third.await.unwrap();
        h.service.wait_for_confirmations().await;
        wait_until(|| h.service.unconfirmed.lock().aggregates.is_empty()).await;

        assert_eq!(submissions.lock().len(), 3);
        assert!(table_rows(&h.service).await.is_empty());
        assert_unconfirmed_empty(&h.service);
    }

    #[tokio::test]
    async fn failed_submission_releases_rows_for_retry() {
        let block = Arc::new(AtomicU64::new(10));
        let mut chain = mock_chain_core(Arc::clone(&block));
        with_zero_gas(&mut chain);
        chain
            .expect_submit_bundle()
            .returning(|_, _| Box::pin(async { Err(ChainError::SubmissionDropped) }));
        let mut h = start(chain, mock_signatures(), settings());
        h.service.timer.shutdown();
        let ids = seed_rows(&h.service, (1..=4).map(one_action_bundle).collect()).await;

        h.service.run_submission().await;
        h.service.wait_for_confirmations().await;

        wait_for_event(&mut h.events, |event| {
            matches!(event, AggregatorEvent::SubmissionFailed { .. })
        })
        .await;
        // the rows stay queued with their eligibility intact
        let rows = table_rows(&h.service).await;
        assert_eq!(rows.iter().map(|row| row.id).collect::<Vec<_>>(), ids);
        assert_unconfirmed_empty(&h.service);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_pipeline_submits_after_max_delay() {
        let block = Arc::new(AtomicU64::new(10));
        let mut chain = mock_chain(Arc::clone(&block));
        let submissions = capture_submissions(&mut chain);
        let mut h = start(chain, mock_signatures(), settings());

        for seed in 1..=2 {
            assert!(h.service.add(one_action_bundle(seed)).await.unwrap().is_empty());
        }
        // extra passes between state changes change nothing
        h.service.try_aggregating().await;
        h.service.try_aggregating().await;

        let event = wait_for_event(&mut h.events, |event| {
            matches!(event, AggregatorEvent::SubmissionConfirmed { .. })
        })
        .await;
        let AggregatorEvent::SubmissionConfirmed { row_ids, .. } = event else {
            unreachable!()
        };
        assert_eq!(row_ids.len(), 2);
        assert_eq!(submissions.lock().len(), 1);
        assert_eq!(submissions.lock()[0].action_count(), 2);

        h.service.stop().await;
        assert!(h.service.stopped.load(Ordering::Acquire));
        assert_eq!(h.service.tasks.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_aggregate_triggers_without_waiting_out_the_delay() {
        let block = Arc::new(AtomicU64::new(10));
        let mut chain = mock_chain(Arc::clone(&block));
        let submissions = capture_submissions(&mut chain);
        let mut test_settings = settings();
        test_settings.max_aggregation_size = 2;
        // far beyond the test timeout: only a trigger can fire in time
        test_settings.max_aggregation_delay = Duration::from_secs(3600);
        let mut h = start(chain, mock_signatures(), test_settings);

        for seed in 1..=2 {
            assert!(h.service.add(one_action_bundle(seed)).await.unwrap().is_empty());
        }
        wait_for_event(&mut h.events, |event| {
            matches!(event, AggregatorEvent::SubmissionConfirmed { .. })
        })
        .await;
        assert_eq!(submissions.lock().len(), 1);
        assert_eq!(submissions.lock()[0].action_count(), 2);
        h.service.stop().await;
    }

    #[tokio::test]
    async fn stop_drains_inflight_submissions() {
        let block = Arc::new(AtomicU64::new(10));
        let mut chain = mock_chain_core(Arc::clone(&block));
        with_zero_gas(&mut chain);
        let gate = Arc::new(Semaphore::new(0));
        {
            let gate = Arc::clone(&gate);
            chain.expect_submit_bundle().returning(move |_, _| {
                let gate = Arc::clone(&gate);
                Box::pin(async move {
                    gate.acquire().await.expect("gate closed").forget();
                    Ok(SubmitReceipt {
                        tx_hash: H256::zero(),
                        block_number: 100,
                    })
                })
            });
        }
        let h = start(chain, mock_signatures(), settings());
        h.service.timer.shutdown();
        seed_rows(&h.service, (1..=4).map(one_action_bundle).collect()).await;

        h.service.run_submission().await;
        let stopper = {
            let service = Arc::clone(&h.service);
            tokio::spawn(async move { service.stop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!stopper.is_finished());

        gate.add_permits(1);
        stopper.await.unwrap();
        assert!(table_rows(&h.service).await.is_empty());
        assert_unconfirmed_empty(&h.service);
    }
}
