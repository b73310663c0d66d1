//! LVMLogicalVolume spec construction

use crate::crd::{
    LVMLogicalVolumeSpec, LVMLogicalVolumeThickSpec, LVMLogicalVolumeThinSpec, LVMVolumeGroup,
    VolumeType,
};
use crate::domain::ports::GroupSelector;
use crate::error::{Error, Result};
use crate::quantity::format_binary_si;
use crate::storage_class::THICK_CONTIGUOUS_PARAM;
use std::collections::BTreeMap;

/// Builds logical volume specs from a placement decision
pub struct SpecBuilder;

impl SpecBuilder {
    /// Spec for `name` in `group`. Thin volumes take their pool from
    /// `selector`; thick volumes carry `contiguous` only when it is set.
    pub fn build_spec(
        name: &str,
        group: &LVMVolumeGroup,
        selector: &GroupSelector,
        volume_type: VolumeType,
        size: i64,
        contiguous: bool,
    ) -> Result<LVMLogicalVolumeSpec> {
        let group_name = group
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::Internal("LVMVolumeGroup without a name".into()))?;

        let (thin, thick) = match volume_type {
            VolumeType::Thin => {
                let pool_name = selector
                    .get(&group_name)
                    .filter(|p| !p.is_empty())
                    .cloned()
                    .ok_or_else(|| Error::PoolNotFound {
                        group: group_name.clone(),
                        pool: String::new(),
                    })?;
                (Some(LVMLogicalVolumeThinSpec { pool_name }), None)
            }
            VolumeType::Thick if contiguous => (
                None,
                Some(LVMLogicalVolumeThickSpec {
                    contiguous: Some(true),
                }),
            ),
            VolumeType::Thick => (None, None),
        };

        Ok(LVMLogicalVolumeSpec {
            actual_lv_name_on_the_node: name.to_string(),
            volume_type,
            size: format_binary_si(size),
            lvm_volume_group_name: group_name,
            thin,
            thick,
        })
    }

    /// Whether storage class `parameters` ask for contiguous extents.
    /// Never true for thin volumes.
    pub fn is_contiguous(parameters: &BTreeMap<String, String>, volume_type: VolumeType) -> bool {
        match volume_type {
            VolumeType::Thin => false,
            VolumeType::Thick => parameters
                .get(THICK_CONTIGUOUS_PARAM)
                .map_or(false, |v| v == "true"),
        }
    }
}
