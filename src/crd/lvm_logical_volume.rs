//! LVMLogicalVolume CRD
//!
//! The declarative record of one logical volume. The coordinator writes the
//! spec; the node reconciler creates the LV and reports back through status.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::quantity::quantity_bytes;

// =============================================================================
// LVMLogicalVolume CRD
// =============================================================================

/// LVMLogicalVolume requests a thin or thick logical volume inside an
/// LVMVolumeGroup.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.deckhouse.io",
    version = "v1alpha1",
    kind = "LVMLogicalVolume",
    plural = "lvmlogicalvolumes",
    shortname = "llv",
    status = "LVMLogicalVolumeStatus",
    printcolumn = r#"{"name": "Type", "type": "string", "jsonPath": ".spec.type"}"#,
    printcolumn = r#"{"name": "Size", "type": "string", "jsonPath": ".spec.size"}"#,
    printcolumn = r#"{"name": "LVG", "type": "string", "jsonPath": ".spec.lvmVolumeGroupName"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct LVMLogicalVolumeSpec {
    /// Logical volume name on the node
    #[serde(rename = "actualLVNameOnTheNode")]
    pub actual_lv_name_on_the_node: String,

    /// Thin or Thick
    #[serde(rename = "type")]
    pub volume_type: VolumeType,

    /// Requested size as a quantity string (e.g., "10Gi")
    pub size: String,

    /// Backing LVMVolumeGroup
    #[serde(rename = "lvmVolumeGroupName")]
    pub lvm_volume_group_name: String,

    /// Thin pool parameters, set only for thin volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thin: Option<LVMLogicalVolumeThinSpec>,

    /// Thick parameters, set only when a thick volume must be contiguous
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thick: Option<LVMLogicalVolumeThickSpec>,
}

/// Volume provisioning type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum VolumeType {
    Thin,
    Thick,
}

impl std::fmt::Display for VolumeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeType::Thin => write!(f, "Thin"),
            VolumeType::Thick => write!(f, "Thick"),
        }
    }
}

impl std::str::FromStr for VolumeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "thin" => Ok(VolumeType::Thin),
            "thick" => Ok(VolumeType::Thick),
            other => Err(Error::Configuration(format!("unknown LVM type: {}", other))),
        }
    }
}

/// Thin volume parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LVMLogicalVolumeThinSpec {
    /// Thin pool inside the volume group
    pub pool_name: String,
}

/// Thick volume parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LVMLogicalVolumeThickSpec {
    /// Allocate contiguous extents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contiguous: Option<bool>,
}

/// Status written by the node reconciler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LVMLogicalVolumeStatus {
    /// Lifecycle phase
    #[serde(default)]
    pub phase: LogicalVolumePhase,

    /// Failure reason reported with the Failed phase
    #[serde(default)]
    pub reason: String,

    /// Size reported by the block layer
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub actual_size: Option<Quantity>,

    /// Whether the LV ended up contiguous
    #[serde(default)]
    pub contiguous: Option<bool>,
}

/// Logical volume phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum LogicalVolumePhase {
    #[default]
    Pending,
    Created,
    Failed,
    /// Any intermediate phase the reconciler reports (Resizing, Cleaning)
    #[serde(other)]
    Other,
}

impl std::fmt::Display for LogicalVolumePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalVolumePhase::Pending => write!(f, "Pending"),
            LogicalVolumePhase::Created => write!(f, "Created"),
            LogicalVolumePhase::Failed => write!(f, "Failed"),
            LogicalVolumePhase::Other => write!(f, "Other"),
        }
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl LVMLogicalVolume {
    /// Get the name of this volume
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Whether a deletion timestamp is set
    pub fn deletion_requested(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the finalizer set carries `token`
    pub fn has_finalizer(&self, token: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .map_or(false, |f| f.iter().any(|t| t == token))
    }

    /// Copy of this record with `token` removed from its finalizers
    pub fn without_finalizer(&self, token: &str) -> Self {
        let mut copy = self.clone();
        if let Some(finalizers) = copy.metadata.finalizers.as_mut() {
            finalizers.retain(|t| t != token);
        }
        copy
    }

    /// Reported phase, Pending until the reconciler writes status
    pub fn phase(&self) -> LogicalVolumePhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Reported failure reason
    pub fn failure_reason(&self) -> &str {
        self.status.as_ref().map(|s| s.reason.as_str()).unwrap_or("")
    }

    /// Reported size in bytes, if any
    pub fn actual_size(&self) -> Result<Option<i64>> {
        match self.status.as_ref().and_then(|s| s.actual_size.as_ref()) {
            Some(q) => quantity_bytes(q).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::GI;

    fn thin_spec() -> LVMLogicalVolumeSpec {
        LVMLogicalVolumeSpec {
            actual_lv_name_on_the_node: "pvc-1".into(),
            volume_type: VolumeType::Thin,
            size: "10Gi".into(),
            lvm_volume_group_name: "lvg-a".into(),
            thin: Some(LVMLogicalVolumeThinSpec {
                pool_name: "pool1".into(),
            }),
            thick: None,
        }
    }

    #[test]
    fn test_spec_wire_format() {
        let llv = LVMLogicalVolume::new("pvc-1", thin_spec());
        let json = serde_json::to_value(&llv).unwrap();

        assert_eq!(json["spec"]["type"], "Thin");
        assert_eq!(json["spec"]["actualLVNameOnTheNode"], "pvc-1");
        assert_eq!(json["spec"]["lvmVolumeGroupName"], "lvg-a");
        assert_eq!(json["spec"]["thin"]["poolName"], "pool1");
        assert!(json["spec"].get("thick").is_none());
    }

    #[test]
    fn test_status_phases() {
        let status: LVMLogicalVolumeStatus = serde_json::from_value(serde_json::json!({
            "phase": "Created",
            "actualSize": "10Gi"
        }))
        .unwrap();
        assert_eq!(status.phase, LogicalVolumePhase::Created);

        let resizing: LVMLogicalVolumeStatus =
            serde_json::from_value(serde_json::json!({ "phase": "Resizing" })).unwrap();
        assert_eq!(resizing.phase, LogicalVolumePhase::Other);

        let mut llv = LVMLogicalVolume::new("pvc-1", thin_spec());
        assert_eq!(llv.phase(), LogicalVolumePhase::Pending);
        assert_eq!(llv.actual_size().unwrap(), None);

        llv.status = Some(status);
        assert_eq!(llv.actual_size().unwrap(), Some(10 * GI));
    }

    #[test]
    fn test_finalizer_helpers() {
        let mut llv = LVMLogicalVolume::new("pvc-1", thin_spec());
        llv.metadata.finalizers = Some(vec!["a/one".into(), "b/two".into()]);

        assert!(llv.has_finalizer("a/one"));
        let stripped = llv.without_finalizer("a/one");
        assert!(!stripped.has_finalizer("a/one"));
        assert!(stripped.has_finalizer("b/two"));
        // The source snapshot is untouched
        assert!(llv.has_finalizer("a/one"));
    }

    #[test]
    fn test_volume_type_from_str() {
        assert_eq!("Thin".parse::<VolumeType>().unwrap(), VolumeType::Thin);
        assert_eq!("thick".parse::<VolumeType>().unwrap(), VolumeType::Thick);
        assert!("striped".parse::<VolumeType>().is_err());
    }
}
