//! Domain Ports - Core trait definitions for the volume coordinator
//!
//! The store port is the boundary between provisioning logic and the
//! declarative store. The Kubernetes adapter and the in-memory adapter both
//! implement it.

use crate::crd::{LVMLogicalVolume, LVMVolumeGroup, VolumeType};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Provisioning Request/Response
// =============================================================================

/// Storage-class volume group selection: group name to thin pool name.
/// Thick classes map every group to an empty pool name.
pub type GroupSelector = BTreeMap<String, String>;

/// Request to provision a logical volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningRequest {
    /// Volume ID chosen by the front end; becomes the record name
    pub name: String,
    /// Desired size in bytes
    pub desired_size: i64,
    /// Thin or thick provisioning
    pub volume_type: VolumeType,
    /// Eligible volume groups and their thin pools
    pub group_selector: GroupSelector,
    /// Node the workload is scheduled to, if any
    pub preferred_node: Option<String>,
    /// Allocate contiguous extents (thick only)
    pub contiguous: bool,
    /// Override of the configured size tolerance, in bytes
    pub size_tolerance: Option<i64>,
}

impl ProvisioningRequest {
    /// Create a request with no node preference
    pub fn new(
        name: impl Into<String>,
        desired_size: i64,
        volume_type: VolumeType,
        group_selector: GroupSelector,
    ) -> Self {
        Self {
            name: name.into(),
            desired_size,
            volume_type,
            group_selector,
            preferred_node: None,
            contiguous: false,
            size_tolerance: None,
        }
    }

    /// Pin the volume to a node
    pub fn with_preferred_node(mut self, node: impl Into<String>) -> Self {
        let node = node.into();
        self.preferred_node = if node.is_empty() { None } else { Some(node) };
        self
    }

    /// Request contiguous extents
    pub fn with_contiguous(mut self, contiguous: bool) -> Self {
        self.contiguous = contiguous;
        self
    }

    /// Override the size tolerance
    pub fn with_size_tolerance(mut self, tolerance: i64) -> Self {
        self.size_tolerance = Some(tolerance);
        self
    }
}

/// Result of a successful provision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedVolume {
    /// Node hosting the volume
    pub node: String,
    /// Volume ID (record name)
    pub volume_id: String,
    /// Backing LVMVolumeGroup
    pub volume_group: String,
    /// Poll attempts spent waiting for convergence
    pub attempts: u32,
}

// =============================================================================
// Volume Store Port
// =============================================================================

/// Port for the declarative store holding volume group and logical volume
/// records.
///
/// Implementations classify failures into `ResourceNotFound`,
/// `ResourceExists`, `Conflict` and transient errors; they never retry.
#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// List all volume groups in store order
    async fn list_volume_groups(&self) -> Result<Vec<LVMVolumeGroup>>;

    /// Get a volume group by name
    async fn get_volume_group(&self, name: &str) -> Result<LVMVolumeGroup>;

    /// Create a logical volume; fails with `ResourceExists` on a name clash
    async fn create_logical_volume(&self, volume: &LVMLogicalVolume) -> Result<LVMLogicalVolume>;

    /// Get a logical volume by name
    async fn get_logical_volume(&self, name: &str) -> Result<LVMLogicalVolume>;

    /// Replace a logical volume; fails with `Conflict` when the carried
    /// resource version is stale
    async fn update_logical_volume(&self, volume: &LVMLogicalVolume) -> Result<LVMLogicalVolume>;

    /// Delete a logical volume by name
    async fn delete_logical_volume(&self, name: &str) -> Result<()>;

    /// List all logical volumes
    async fn list_logical_volumes(&self) -> Result<Vec<LVMLogicalVolume>>;

    /// Store name for logs
    fn store_name(&self) -> &str;
}

pub type VolumeStoreRef = Arc<dyn VolumeStore>;
