//! Local Volume Coordinator
//!
//! Provisions LVM logical volumes on Kubernetes nodes by writing
//! `LVMLogicalVolume` records and waiting for the node reconciler to act on
//! them. Capacity comes from `LVMVolumeGroup` records the reconciler keeps
//! up to date.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        VolumeCoordinator                         │
//! │    provision · deprovision · expand · wait_for_size              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  CapacityAggregator   PlacementSelector   SpecBuilder            │
//! │  ConvergencePoller    FinalizerReleaser                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │            ResourceClient (bounded retry with backoff)           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                       VolumeStore port                           │
//! │   ┌────────────────────────┐   ┌─────────────────────────────┐   │
//! │   │  KubeStore (API server)│   │  InMemoryStore (standalone) │   │
//! │   └────────────────────────┘   └─────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`provisioning`]: Coordinator and its components
//! - [`store`]: Store adapters
//! - [`crd`]: LVMVolumeGroup and LVMLogicalVolume resources
//! - [`domain`]: Request types and the store port
//! - [`config`]: Retry, polling and finalizer configuration
//! - [`quantity`]: Kubernetes quantity arithmetic
//! - [`storage_class`]: Storage class parameter parsing
//! - [`metrics`]: Prometheus collectors
//! - [`error`]: Error types and handling

pub mod config;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod provisioning;
pub mod quantity;
pub mod storage_class;
pub mod store;

// Re-export commonly used types
pub use config::{CoordinatorConfig, FinalizerConfig, PollConfig, RetryConfig};

pub use crd::{
    LVMLogicalVolume, LVMLogicalVolumeSpec, LVMLogicalVolumeStatus, LVMVolumeGroup,
    LVMVolumeGroupSpec, LVMVolumeGroupStatus, LogicalVolumePhase, VolumeType,
};

pub use domain::ports::{
    GroupSelector, ProvisionedVolume, ProvisioningRequest, VolumeStore, VolumeStoreRef,
};

pub use error::{Error, Result};

pub use metrics::CoordinatorMetrics;

pub use provisioning::{
    CapacityAggregator, ConvergencePoller, FinalizerReleaser, GroupCapacity, PlacementSelector,
    ResourceClient, RetryPolicy, SpecBuilder, VolumeCoordinator, WaitLimit,
};

pub use store::{InMemoryStore, KubeStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
