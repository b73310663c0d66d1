//! LVMVolumeGroup CRD
//!
//! Represents an LVM volume group on one node, as reported by the node
//! reconciler. The coordinator only ever reads these records.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::quantity::quantity_bytes;

// =============================================================================
// LVMVolumeGroup CRD
// =============================================================================

/// LVMVolumeGroup is a capacity pool on a single node, either used directly
/// for thick volumes or subdivided into thin pools.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.deckhouse.io",
    version = "v1alpha1",
    kind = "LVMVolumeGroup",
    plural = "lvmvolumegroups",
    shortname = "lvg",
    status = "LVMVolumeGroupStatus",
    printcolumn = r#"{"name": "VG", "type": "string", "jsonPath": ".spec.actualVGNameOnTheNode"}"#,
    printcolumn = r#"{"name": "Size", "type": "string", "jsonPath": ".status.vgSize"}"#,
    printcolumn = r#"{"name": "Allocated", "type": "string", "jsonPath": ".status.allocatedSize"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct LVMVolumeGroupSpec {
    /// Name of the volume group on the node
    #[serde(rename = "actualVGNameOnTheNode")]
    pub actual_vg_name_on_the_node: String,

    /// Volume group type (Local, Shared)
    #[serde(default)]
    pub r#type: Option<String>,
}

/// Status written by the node reconciler
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LVMVolumeGroupStatus {
    /// Nodes hosting the group; the first entry is the host
    #[serde(default)]
    pub nodes: Vec<LVMVolumeGroupNode>,

    /// Total size of the volume group
    #[serde(default, rename = "vgSize")]
    #[schemars(with = "Option<String>")]
    pub vg_size: Option<Quantity>,

    /// Size already allocated to logical volumes
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub allocated_size: Option<Quantity>,

    /// Thin pools carved out of the group
    #[serde(default)]
    pub thin_pools: Vec<LVMVolumeGroupThinPoolStatus>,

    /// Reconciler phase
    #[serde(default)]
    pub phase: Option<String>,
}

/// Node entry in the group status
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LVMVolumeGroupNode {
    /// Kubernetes node name
    pub name: String,
}

/// Thin pool status
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LVMVolumeGroupThinPoolStatus {
    /// Thin pool name
    pub name: String,

    /// Pool size
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub actual_size: Option<Quantity>,

    /// Space still available for new thin volumes
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub available_space: Option<Quantity>,
}

// =============================================================================
// Implementations
// =============================================================================

impl LVMVolumeGroup {
    /// Node hosting this group, if the reconciler reported one
    pub fn host_node(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.nodes.first())
            .map(|n| n.name.as_str())
    }

    /// Total size in bytes (zero until reported)
    pub fn total_size(&self) -> Result<i64> {
        self.status_quantity(|s| s.vg_size.as_ref())
    }

    /// Allocated size in bytes (zero until reported)
    pub fn allocated_size(&self) -> Result<i64> {
        self.status_quantity(|s| s.allocated_size.as_ref())
    }

    /// Look up a thin pool by name
    pub fn thin_pool(&self, pool_name: &str) -> Option<&LVMVolumeGroupThinPoolStatus> {
        self.status
            .as_ref()
            .and_then(|s| s.thin_pools.iter().find(|tp| tp.name == pool_name))
    }

    fn status_quantity<F>(&self, field: F) -> Result<i64>
    where
        F: Fn(&LVMVolumeGroupStatus) -> Option<&Quantity>,
    {
        match self.status.as_ref().and_then(field) {
            Some(q) => quantity_bytes(q),
            None => Ok(0),
        }
    }
}

impl LVMVolumeGroupThinPoolStatus {
    /// Available space in bytes (zero until reported)
    pub fn available_bytes(&self) -> Result<i64> {
        match &self.available_space {
            Some(q) => quantity_bytes(q),
            None => Ok(0),
        }
    }
}
