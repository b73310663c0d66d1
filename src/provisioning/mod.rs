//! Provisioning
//!
//! Components behind [`VolumeCoordinator`]:
//! - [`ResourceClient`]: store calls under the [`RetryPolicy`]
//! - [`CapacityAggregator`]: free space per group, node ranking
//! - [`PlacementSelector`]: group hosted by a node
//! - [`SpecBuilder`]: logical volume spec construction
//! - [`ConvergencePoller`]: bounded wait for reconciler status
//! - [`FinalizerReleaser`]: finalizer removal under optimistic concurrency

pub mod capacity;
pub mod client;
pub mod coordinator;
pub mod finalizer;
pub mod placement;
pub mod poller;
pub mod retry;
pub mod spec_builder;

pub use capacity::{CapacityAggregator, NodeChoice};
pub use client::ResourceClient;
pub use coordinator::{GroupCapacity, VolumeCoordinator};
pub use finalizer::{FinalizerRelease, FinalizerReleaser};
pub use placement::PlacementSelector;
pub use poller::{ConvergencePoller, WaitLimit};
pub use retry::RetryPolicy;
pub use spec_builder::SpecBuilder;
