//! Custom Resource Definitions shared with the node reconciler
//!
//! This module contains both CRD types:
//! - LVMVolumeGroup: Volume group capacity on one node (read-only here)
//! - LVMLogicalVolume: Logical volume record created by the coordinator

pub mod lvm_logical_volume;
pub mod lvm_volume_group;

pub use lvm_logical_volume::*;
pub use lvm_volume_group::*;

/// Kind name used in errors and logs
pub const LOGICAL_VOLUME_KIND: &str = "LVMLogicalVolume";

/// Kind name used in errors and logs
pub const VOLUME_GROUP_KIND: &str = "LVMVolumeGroup";
