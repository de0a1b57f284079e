//! Walkthrough of a node join: plan, transfer, install.

use partmap::{
    BucketDataSource, BucketTable, BucketTransport, DistributionConfig, DistributionMap,
    DistributionMetrics, DistributionPlanner, NodeAddress, StateTransferCoordinator,
    TransferBatch, TransferError, TransferPlan,
};
use std::sync::Arc;

/// Pretends every bucket holds a handful of entries.
#[derive(Debug)]
struct DemoSource;

#[async_trait::async_trait]
impl BucketDataSource for DemoSource {
    async fn drain_bucket(
        &self,
        bucket_id: u32,
        _last_key: Option<Vec<u8>>,
        _batch_size: usize,
    ) -> Result<TransferBatch, TransferError> {
        let entries = (0..4)
            .map(|i| {
                partmap::TransferEntry::new(
                    format!("bucket{bucket_id}:key{i}").into_bytes(),
                    b"value".to_vec(),
                )
            })
            .collect();
        Ok(TransferBatch::new(bucket_id, 0, entries, true))
    }
}

/// Swallows payloads instead of putting them on the wire.
#[derive(Debug)]
struct DemoTransport;

#[async_trait::async_trait]
impl BucketTransport for DemoTransport {
    async fn send_bucket_payload(
        &self,
        _to: NodeAddress,
        _batch: TransferBatch,
    ) -> Result<(), TransferError> {
        Ok(())
    }

    async fn broadcast_map_update(&self, _map: &DistributionMap) -> Result<(), TransferError> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("partmap=debug,info")
        .init();

    let config = DistributionConfig::new(64);
    let node_a: NodeAddress = "127.0.0.1:9000".parse()?;
    let node_b: NodeAddress = "127.0.0.1:9001".parse()?;

    // Bootstrap: node A owns all 64 buckets.
    let metrics = Arc::new(DistributionMetrics::new());
    let table = Arc::new(BucketTable::with_metrics(&config, node_a, metrics.clone()));
    let map = DistributionMap::bootstrap(node_a, config.bucket_count);
    println!("Bootstrap view {}: {} buckets on {}", map.view_id(), map.bucket_count(), node_a);

    // Node B joins; plan the redistribution.
    let planner = DistributionPlanner::new(config.clone());
    let joined = planner.compute_join(&map, node_b)?;
    let plan = TransferPlan::between(&map, &joined);
    println!("Join map view {}: {} buckets to move", joined.view_id(), plan.len());

    // Install the new map, then execute the plan.
    table.install_map(&joined)?;
    let coordinator = Arc::new(StateTransferCoordinator::new(
        table.clone(),
        Arc::new(DemoSource),
        Arc::new(DemoTransport),
        config,
        metrics.clone(),
    ));
    let summary = coordinator.execute(&plan).await;
    println!(
        "Transfer finished: {} completed, {} failed",
        summary.completed.len(),
        summary.failed.len()
    );

    // Ownership after rebalancing.
    let owned_b = table.buckets_owned_by(node_b).len();
    println!("{node_b} now serves {owned_b} buckets");
    println!("In state transfer: {}", table.in_state_transfer());

    let snap = metrics.snapshot();
    println!(
        "Metrics: started={} completed={} retried={}",
        snap.transfers_started, snap.transfers_completed, snap.transfers_retried
    );

    Ok(())
}
