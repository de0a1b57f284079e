//! State transfer: moving bucket contents between nodes.
//!
//! The [`StateTransferCoordinator`] executes a transfer plan against the
//! live bucket table with bounded concurrency. Each bucket move walks a
//! small state machine (`Pending -> InFlight -> Completed | Failed`) while
//! the bucket itself is staged, copied batch by batch through the transport
//! boundary, and finally handed over or reverted.

mod coordinator;
mod payload;
mod transport;

pub use coordinator::{MoveState, StateTransferCoordinator, TransferSummary};
pub use payload::{TransferBatch, TransferEntry};
pub use transport::{BucketDataSource, BucketTransport};
