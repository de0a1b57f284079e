//! Drives bucket moves against the live bucket table.

use crate::bucket::BucketTable;
use crate::config::DistributionConfig;
use crate::distribution::{DistributionMap, TransferPlan};
use crate::error::{Error, TransferError};
use crate::metrics::DistributionMetrics;
use crate::transfer::payload::TransferBatch;
use crate::transfer::transport::{BucketDataSource, BucketTransport};
use crate::types::{BucketId, NodeAddress};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// State of a single bucket move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveState {
    /// Queued, waiting for a transfer slot.
    Pending,
    /// Actively copying.
    InFlight,
    /// Data copied and ownership handed over.
    Completed,
    /// Gave up; the bucket stayed with its pre-transfer owner.
    Failed,
}

impl std::fmt::Display for MoveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MoveState::Pending => write!(f, "pending"),
            MoveState::InFlight => write!(f, "in_flight"),
            MoveState::Completed => write!(f, "completed"),
            MoveState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone)]
struct MoveRecord {
    to: NodeAddress,
    state: MoveState,
    attempts: u32,
    error: Option<TransferError>,
    started_at: tokio::time::Instant,
}

/// Outcome of executing a transfer plan.
#[derive(Debug, Default)]
pub struct TransferSummary {
    /// Buckets whose moves completed.
    pub completed: Vec<BucketId>,
    /// Buckets whose moves failed, with the terminal error.
    pub failed: Vec<(BucketId, TransferError)>,
}

impl TransferSummary {
    /// Whether every move in the plan completed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Shared pieces a spawned move task needs.
#[derive(Clone)]
struct MoveContext {
    table: Arc<BucketTable>,
    source: Arc<dyn BucketDataSource>,
    transport: Arc<dyn BucketTransport>,
    metrics: Arc<DistributionMetrics>,
    moves: Arc<RwLock<HashMap<BucketId, MoveRecord>>>,
    changed: Arc<Notify>,
    config: DistributionConfig,
}

/// Executes transfer plans bucket by bucket.
///
/// At most `max_concurrent_transfers` buckets copy at once; moves for the
/// same bucket are serialized — a second request while one is in flight
/// fails with [`TransferError::AlreadyInTransfer`]. Each move is bounded by
/// `transfer_timeout` per attempt and `max_transfer_retries` retries; an
/// exhausted move reverts the bucket to its pre-transfer owner and is
/// surfaced, never left mid-transfer.
///
/// Writes are not accepted for a bucket while it is under transfer: clients
/// are redirected to the owner reported by the bucket table and retry once
/// the bucket is functional again, so exactly one node ever mutates a
/// bucket's data.
pub struct StateTransferCoordinator {
    ctx: MoveContext,
    permits: Arc<Semaphore>,
}

impl StateTransferCoordinator {
    /// Create a coordinator over the given table and boundary
    /// implementations.
    pub fn new(
        table: Arc<BucketTable>,
        source: Arc<dyn BucketDataSource>,
        transport: Arc<dyn BucketTransport>,
        config: DistributionConfig,
        metrics: Arc<DistributionMetrics>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_transfers as usize));
        Self {
            ctx: MoveContext {
                table,
                source,
                transport,
                metrics,
                moves: Arc::new(RwLock::new(HashMap::new())),
                changed: Arc::new(Notify::new()),
                config,
            },
            permits,
        }
    }

    /// Execute a transfer plan, returning when every move has reached a
    /// terminal state.
    pub async fn execute(&self, plan: &TransferPlan) -> TransferSummary {
        info!(
            source_view = plan.source_view,
            target_view = plan.target_view,
            moves = plan.len(),
            "Executing transfer plan"
        );

        let mut summary = TransferSummary::default();
        let mut tasks = tokio::task::JoinSet::new();

        for m in &plan.moves {
            // Serialize per bucket: only one live move at a time.
            {
                let mut moves = self.ctx.moves.write();
                if let Some(existing) = moves.get(&m.bucket_id) {
                    if matches!(existing.state, MoveState::Pending | MoveState::InFlight) {
                        warn!(bucket_id = m.bucket_id, "Bucket already has a move in flight");
                        summary
                            .failed
                            .push((m.bucket_id, TransferError::AlreadyInTransfer(m.bucket_id)));
                        continue;
                    }
                }
                moves.insert(
                    m.bucket_id,
                    MoveRecord {
                        to: m.to,
                        state: MoveState::Pending,
                        attempts: 0,
                        error: None,
                        started_at: tokio::time::Instant::now(),
                    },
                );
            }

            let ctx = self.ctx.clone();
            let permits = self.permits.clone();
            let (bucket_id, to) = (m.bucket_id, m.to);
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                let result = run_move(&ctx, bucket_id, to).await;
                finish_move(&ctx, bucket_id, &result);
                (bucket_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((bucket_id, Ok(()))) => summary.completed.push(bucket_id),
                Ok((bucket_id, Err(e))) => summary.failed.push((bucket_id, e)),
                Err(e) => error!(error = %e, "Bucket move task failed to join"),
            }
        }

        summary.completed.sort_unstable();
        summary.failed.sort_unstable_by_key(|(id, _)| *id);
        info!(
            completed = summary.completed.len(),
            failed = summary.failed.len(),
            "Transfer plan finished"
        );
        summary
    }

    /// Block until the bucket's move reaches a terminal state. Returns
    /// immediately when no move is tracked for the bucket.
    ///
    /// Waiting has no side effects on the move or the bucket.
    pub async fn await_completion(&self, bucket_id: BucketId) -> Result<(), TransferError> {
        loop {
            let mut notified = pin!(self.ctx.changed.notified());
            notified.as_mut().enable();
            {
                let moves = self.ctx.moves.read();
                match moves.get(&bucket_id) {
                    None => return Ok(()),
                    Some(record) => match record.state {
                        MoveState::Completed => return Ok(()),
                        MoveState::Failed => {
                            return Err(record.error.clone().unwrap_or_else(|| {
                                TransferError::Aborted("move failed without detail".into())
                            }))
                        }
                        MoveState::Pending | MoveState::InFlight => {}
                    },
                }
            }
            notified.await;
        }
    }

    /// Current state of a bucket's move, if one is tracked.
    pub fn move_state(&self, bucket_id: BucketId) -> Option<MoveState> {
        self.ctx.moves.read().get(&bucket_id).map(|r| r.state)
    }

    /// Number of moves currently pending or in flight.
    pub fn active_moves(&self) -> usize {
        self.ctx
            .moves
            .read()
            .values()
            .filter(|r| matches!(r.state, MoveState::Pending | MoveState::InFlight))
            .count()
    }

    /// Drop records of finished moves.
    pub fn clear_finished(&self) {
        self.ctx
            .moves
            .write()
            .retain(|_, r| matches!(r.state, MoveState::Pending | MoveState::InFlight));
    }

    /// Force-revert moves that have been live longer than `older_than`.
    ///
    /// A backstop for moves whose task died without cleaning up: the bucket
    /// reverts to its pre-transfer owner and the move is marked failed.
    /// Returns the reverted bucket ids.
    pub fn force_revert_stuck(&self, older_than: Duration) -> Vec<BucketId> {
        let mut reverted = Vec::new();
        {
            let mut moves = self.ctx.moves.write();
            for (bucket_id, record) in moves.iter_mut() {
                if matches!(record.state, MoveState::Pending | MoveState::InFlight)
                    && record.started_at.elapsed() >= older_than
                {
                    if let Err(e) = self.ctx.table.abort_transfer(*bucket_id) {
                        error!(bucket_id, error = %e, "Failed to revert stuck bucket");
                        continue;
                    }
                    record.state = MoveState::Failed;
                    record.error = Some(TransferError::Aborted("force-reverted by watchdog".into()));
                    self.ctx.metrics.transfers_failed.inc();
                    error!(
                        bucket_id,
                        to = %record.to,
                        attempts = record.attempts,
                        "Force-reverted stuck bucket move"
                    );
                    reverted.push(*bucket_id);
                }
            }
        }
        if !reverted.is_empty() {
            self.ctx.changed.notify_waiters();
        }
        reverted
    }

    /// Spawn the periodic watchdog. Moves older than the full retry budget
    /// (`transfer_timeout * (max_transfer_retries + 1)`) are force-reverted.
    pub fn start_watchdog(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let budget = coordinator.ctx.config.transfer_timeout
            * (coordinator.ctx.config.max_transfer_retries + 1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                coordinator.force_revert_stuck(budget);
            }
        })
    }

    /// Fan a map out to the cluster. Fire-and-forget: failures are logged,
    /// not propagated.
    pub async fn broadcast_map(&self, map: &DistributionMap) {
        if let Err(e) = self.ctx.transport.broadcast_map_update(map).await {
            warn!(view_id = map.view_id(), error = %e, "Map broadcast failed");
        }
    }
}

impl std::fmt::Debug for StateTransferCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTransferCoordinator")
            .field("active_moves", &self.active_moves())
            .finish()
    }
}

fn to_transfer_error(e: Error) -> TransferError {
    match e {
        Error::Transfer(t) => t,
        other => TransferError::Aborted(other.to_string()),
    }
}

fn set_move_state(ctx: &MoveContext, bucket_id: BucketId, state: MoveState) {
    if let Some(record) = ctx.moves.write().get_mut(&bucket_id) {
        record.state = state;
    }
    ctx.changed.notify_waiters();
}

/// Record the terminal state of a move, unless the watchdog got there
/// first.
fn finish_move(ctx: &MoveContext, bucket_id: BucketId, result: &Result<(), TransferError>) {
    let recorded = {
        let mut moves = ctx.moves.write();
        match moves.get_mut(&bucket_id) {
            Some(record) if matches!(record.state, MoveState::Pending | MoveState::InFlight) => {
                match result {
                    Ok(()) => record.state = MoveState::Completed,
                    Err(e) => {
                        record.state = MoveState::Failed;
                        record.error = Some(e.clone());
                    }
                }
                true
            }
            _ => false,
        }
    };
    if recorded {
        match result {
            Ok(()) => ctx.metrics.transfers_completed.inc(),
            Err(_) => ctx.metrics.transfers_failed.inc(),
        }
    }
    ctx.metrics.buckets_in_transfer.dec();
    ctx.changed.notify_waiters();
}

async fn run_move(
    ctx: &MoveContext,
    bucket_id: BucketId,
    to: NodeAddress,
) -> Result<(), TransferError> {
    set_move_state(ctx, bucket_id, MoveState::InFlight);
    ctx.metrics.transfers_started.inc();
    ctx.metrics.buckets_in_transfer.inc();

    ctx.table
        .begin_transfer(bucket_id, to)
        .map_err(to_transfer_error)?;
    if let Err(e) = ctx.table.mark_under_transfer(bucket_id) {
        let _ = ctx.table.abort_transfer(bucket_id);
        return Err(to_transfer_error(e));
    }

    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let attempt = ship_bucket(ctx, bucket_id, to);
        let outcome = match tokio::time::timeout(ctx.config.transfer_timeout, attempt).await {
            Ok(Ok(())) => {
                ctx.table
                    .complete_transfer(bucket_id)
                    .map_err(to_transfer_error)?;
                info!(bucket_id, to = %to, attempts, "Bucket move complete");
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(_) => TransferError::Aborted(format!(
                "attempt exceeded {:?}",
                ctx.config.transfer_timeout
            )),
        };

        if attempts > ctx.config.max_transfer_retries {
            let _ = ctx.table.abort_transfer(bucket_id);
            error!(bucket_id, to = %to, attempts, error = %outcome, "Bucket move failed");
            if let Some(record) = ctx.moves.write().get_mut(&bucket_id) {
                record.attempts = attempts;
            }
            return Err(TransferError::RetriesExhausted {
                bucket: bucket_id,
                attempts,
            });
        }

        ctx.metrics.transfers_retried.inc();
        warn!(bucket_id, to = %to, attempts, error = %outcome, "Retrying bucket move");
    }
}

/// Copy one bucket's contents batch by batch. A retried attempt restarts
/// from the beginning; the receiver applies entries idempotently.
async fn ship_bucket(
    ctx: &MoveContext,
    bucket_id: BucketId,
    to: NodeAddress,
) -> Result<(), TransferError> {
    let mut cursor: Option<Vec<u8>> = None;
    let mut shipped = 0u64;
    loop {
        let batch = ctx
            .source
            .drain_bucket(bucket_id, cursor.take(), ctx.config.transfer_batch_size)
            .await?;
        let is_final = batch.is_final;
        cursor = batch.last_key().map(|k| k.to_vec());
        shipped += batch.len() as u64;
        ctx.transport.send_bucket_payload(to, batch).await?;
        if is_final {
            break;
        }
    }
    debug!(bucket_id, to = %to, entries = shipped, "Bucket contents shipped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::payload::TransferEntry;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn addr(port: u16) -> NodeAddress {
        NodeAddress::loopback(port)
    }

    /// In-memory data source: a fixed entry list per bucket.
    #[derive(Debug, Default)]
    struct MemorySource {
        entries: HashMap<BucketId, Vec<TransferEntry>>,
    }

    impl MemorySource {
        fn with_bucket(mut self, bucket_id: BucketId, count: usize) -> Self {
            let entries = (0..count)
                .map(|i| {
                    TransferEntry::new(
                        format!("key-{i:04}").into_bytes(),
                        format!("value-{i}").into_bytes(),
                    )
                })
                .collect();
            self.entries.insert(bucket_id, entries);
            self
        }
    }

    #[async_trait::async_trait]
    impl BucketDataSource for MemorySource {
        async fn drain_bucket(
            &self,
            bucket_id: BucketId,
            last_key: Option<Vec<u8>>,
            batch_size: usize,
        ) -> Result<TransferBatch, TransferError> {
            let all = self.entries.get(&bucket_id).cloned().unwrap_or_default();
            let start = match last_key {
                None => 0,
                Some(k) => all.iter().position(|e| e.key == k).map_or(all.len(), |i| i + 1),
            };
            let chunk: Vec<_> = all[start..].iter().take(batch_size).cloned().collect();
            let is_final = start + chunk.len() >= all.len();
            Ok(TransferBatch::new(bucket_id, 0, chunk, is_final))
        }
    }

    /// Transport that can fail a few times or hang forever.
    #[derive(Debug, Default)]
    struct FlakyTransport {
        sent: parking_lot::Mutex<Vec<TransferBatch>>,
        fail_remaining: AtomicU32,
        hang: std::sync::atomic::AtomicBool,
    }

    impl FlakyTransport {
        fn failing(times: u32) -> Self {
            let t = Self::default();
            t.fail_remaining.store(times, Ordering::SeqCst);
            t
        }

        fn entries_sent(&self) -> usize {
            self.sent.lock().iter().map(|b| b.len()).sum()
        }
    }

    #[async_trait::async_trait]
    impl BucketTransport for FlakyTransport {
        async fn send_bucket_payload(
            &self,
            to: NodeAddress,
            batch: TransferBatch,
        ) -> Result<(), TransferError> {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let remaining = self.fail_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(TransferError::PeerUnreachable(to));
            }
            self.sent.lock().push(batch);
            Ok(())
        }

        async fn broadcast_map_update(
            &self,
            _map: &DistributionMap,
        ) -> Result<(), TransferError> {
            Ok(())
        }
    }

    struct Harness {
        table: Arc<BucketTable>,
        transport: Arc<FlakyTransport>,
        metrics: Arc<DistributionMetrics>,
        coordinator: Arc<StateTransferCoordinator>,
    }

    fn harness(config: DistributionConfig, source: MemorySource, transport: FlakyTransport) -> Harness {
        let metrics = Arc::new(DistributionMetrics::new());
        let table = Arc::new(BucketTable::with_metrics(
            &config,
            addr(9000),
            metrics.clone(),
        ));
        let transport = Arc::new(transport);
        let coordinator = Arc::new(StateTransferCoordinator::new(
            table.clone(),
            Arc::new(source),
            transport.clone(),
            config,
            metrics.clone(),
        ));
        Harness {
            table,
            transport,
            metrics,
            coordinator,
        }
    }

    fn plan(moves: &[(BucketId, NodeAddress)]) -> TransferPlan {
        TransferPlan {
            source_view: 1,
            target_view: 2,
            moves: moves
                .iter()
                .map(|&(bucket_id, to)| crate::distribution::BucketMove {
                    bucket_id,
                    from: addr(9000),
                    to,
                    percent_hint: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_plan_execution_moves_ownership() {
        let config = DistributionConfig::new(16).with_transfer_batch_size(10);
        let source = MemorySource::default()
            .with_bucket(1, 25)
            .with_bucket(2, 5);
        let h = harness(config, source, FlakyTransport::default());

        let summary = h
            .coordinator
            .execute(&plan(&[(1, addr(9001)), (2, addr(9001))]))
            .await;
        assert!(summary.is_clean());
        assert_eq!(summary.completed, vec![1, 2]);

        for bucket_id in [1, 2] {
            let bucket = h.table.bucket(bucket_id).unwrap();
            assert!(bucket.is_stable());
            assert_eq!(bucket.permanent_owner, addr(9001));
        }
        // 25 entries in 3 batches of <=10, plus 5 in one batch.
        assert_eq!(h.transport.entries_sent(), 30);

        let snap = h.metrics.snapshot();
        assert_eq!(snap.transfers_started, 2);
        assert_eq!(snap.transfers_completed, 2);
        assert_eq!(snap.buckets_in_transfer, 0);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let config = DistributionConfig::new(16).with_max_transfer_retries(3);
        let source = MemorySource::default().with_bucket(1, 3);
        let h = harness(config, source, FlakyTransport::failing(2));

        let summary = h.coordinator.execute(&plan(&[(1, addr(9001))])).await;
        assert!(summary.is_clean());
        assert_eq!(h.metrics.snapshot().transfers_retried, 2);
        assert_eq!(h.table.bucket(1).unwrap().permanent_owner, addr(9001));
    }

    #[tokio::test]
    async fn test_retries_exhausted_reverts_bucket() {
        let config = DistributionConfig::new(16).with_max_transfer_retries(1);
        let source = MemorySource::default().with_bucket(1, 3);
        let h = harness(config, source, FlakyTransport::failing(u32::MAX));

        let summary = h.coordinator.execute(&plan(&[(1, addr(9001))])).await;
        assert!(!summary.is_clean());
        assert!(matches!(
            summary.failed[0],
            (1, TransferError::RetriesExhausted { attempts: 2, .. })
        ));

        // The bucket is functional under its original owner, never stuck.
        let bucket = h.table.bucket(1).unwrap();
        assert!(bucket.is_stable());
        assert_eq!(bucket.permanent_owner, addr(9000));

        let err = h.coordinator.await_completion(1).await.unwrap_err();
        assert!(matches!(err, TransferError::RetriesExhausted { .. }));
        assert_eq!(h.metrics.snapshot().transfers_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_bucket_moves_serialized() {
        let config = DistributionConfig::new(16)
            .with_transfer_timeout(Duration::from_millis(50))
            .with_max_transfer_retries(0);
        let source = MemorySource::default().with_bucket(1, 3);
        let h = harness(config, source, FlakyTransport::default());
        h.transport.hang.store(true, Ordering::SeqCst);

        let first = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.execute(&plan(&[(1, addr(9001))])).await })
        };
        // Let the first move reach in-flight.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.coordinator.move_state(1), Some(MoveState::InFlight));

        let second = h.coordinator.execute(&plan(&[(1, addr(9002))])).await;
        assert!(matches!(
            second.failed[0],
            (1, TransferError::AlreadyInTransfer(1))
        ));

        // The hung first move times out and fails cleanly.
        let first = first.await.unwrap();
        assert!(matches!(
            first.failed[0],
            (1, TransferError::RetriesExhausted { .. })
        ));
        assert!(h.table.bucket(1).unwrap().is_stable());
    }

    #[tokio::test]
    async fn test_await_completion_untracked_bucket() {
        let config = DistributionConfig::new(16);
        let h = harness(config, MemorySource::default(), FlakyTransport::default());
        h.coordinator.await_completion(5).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_force_reverts() {
        let config = DistributionConfig::new(16)
            .with_transfer_timeout(Duration::from_secs(3600))
            .with_max_transfer_retries(0);
        let source = MemorySource::default().with_bucket(1, 3);
        let h = harness(config, source, FlakyTransport::default());
        h.transport.hang.store(true, Ordering::SeqCst);

        let coordinator = h.coordinator.clone();
        let _running = tokio::spawn(async move {
            coordinator.execute(&plan(&[(1, addr(9001))])).await
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.coordinator.move_state(1), Some(MoveState::InFlight));

        let reverted = h.coordinator.force_revert_stuck(Duration::ZERO);
        assert_eq!(reverted, vec![1]);
        assert_eq!(h.coordinator.move_state(1), Some(MoveState::Failed));

        let bucket = h.table.bucket(1).unwrap();
        assert!(bucket.is_stable());
        assert_eq!(bucket.permanent_owner, addr(9000));

        let err = h.coordinator.await_completion(1).await.unwrap_err();
        assert!(matches!(err, TransferError::Aborted(_)));
    }

    #[tokio::test]
    async fn test_failed_move_can_be_requeued() {
        let config = DistributionConfig::new(16).with_max_transfer_retries(0);
        let source = MemorySource::default().with_bucket(1, 3);
        let h = harness(config, source, FlakyTransport::failing(1));

        let first = h.coordinator.execute(&plan(&[(1, addr(9001))])).await;
        assert!(!first.is_clean());

        // The transport has recovered; re-queueing the move succeeds.
        let second = h.coordinator.execute(&plan(&[(1, addr(9001))])).await;
        assert!(second.is_clean());
        assert_eq!(h.table.bucket(1).unwrap().permanent_owner, addr(9001));
    }

    #[tokio::test]
    async fn test_join_end_to_end() {
        use crate::distribution::DistributionPlanner;

        let config = DistributionConfig::new(16);
        let mut source = MemorySource::default();
        for bucket_id in 0..16 {
            source = source.with_bucket(bucket_id, 3);
        }
        let h = harness(config.clone(), source, FlakyTransport::default());

        // A second node joins an all-on-A cluster.
        let map = DistributionMap::bootstrap(addr(9000), 16);
        let planner = DistributionPlanner::new(config);
        let joined = planner.compute_join(&map, addr(9001)).unwrap();
        let plan = TransferPlan::between(&map, &joined);
        assert_eq!(plan.len(), 8);

        h.table.install_map(&joined).unwrap();
        assert!(h.table.in_state_transfer());

        let summary = h.coordinator.execute(&plan).await;
        assert!(summary.is_clean());
        assert!(!h.table.in_state_transfer());
        assert_eq!(h.table.installed_view(), joined.view_id());

        // Live ownership now matches the planned map.
        for (bucket_id, owner) in joined.assignments() {
            assert_eq!(h.table.owner_of(bucket_id).unwrap(), owner);
            assert!(h.table.is_functional(bucket_id).unwrap());
        }
        h.coordinator.broadcast_map(&joined).await;
    }

    #[tokio::test]
    async fn test_concurrency_limit_respected() {
        let config = DistributionConfig::new(16).with_max_concurrent_transfers(2);
        let mut source = MemorySource::default();
        for bucket_id in 0..8 {
            source = source.with_bucket(bucket_id, 2);
        }
        let h = harness(config, source, FlakyTransport::default());

        let moves: Vec<_> = (0..8).map(|b| (b, addr(9001))).collect();
        let summary = h.coordinator.execute(&plan(&moves)).await;
        assert!(summary.is_clean());
        assert_eq!(summary.completed.len(), 8);
        assert_eq!(h.metrics.snapshot().transfers_completed, 8);
        assert_eq!(h.metrics.snapshot().buckets_in_transfer, 0);
    }
}
