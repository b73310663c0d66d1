//! Storage class parameters
//!
//! Storage classes name the eligible volume groups as a YAML list under
//! [`VOLUME_GROUPS_PARAM`]:
//!
//! ```yaml
//! - name: lvg-a
//!   thin:
//!     poolName: pool1
//! - name: lvg-b
//! ```

use crate::crd::VolumeType;
use crate::domain::ports::GroupSelector;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const LVM_TYPE_PARAM: &str = "local.csi.storage.deckhouse.io/lvm-type";
pub const VOLUME_GROUPS_PARAM: &str = "local.csi.storage.deckhouse.io/lvm-volume-groups";
pub const THICK_CONTIGUOUS_PARAM: &str = "local.csi.storage.deckhouse.io/lvm-thick-contiguous";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeGroupEntry {
    name: String,
    #[serde(default)]
    thin: Option<ThinEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThinEntry {
    #[serde(default)]
    pool_name: String,
}

/// Parse the volume group list into a selector; thick entries map to ""
pub fn parse_group_selector(yaml: &str) -> Result<GroupSelector> {
    let entries: Vec<VolumeGroupEntry> = serde_yaml::from_str(yaml)?;
    let mut selector = GroupSelector::new();
    for entry in entries {
        if entry.name.is_empty() {
            return Err(Error::Configuration(
                "volume group entry without a name".into(),
            ));
        }
        let pool = entry.thin.map(|t| t.pool_name).unwrap_or_default();
        selector.insert(entry.name, pool);
    }
    Ok(selector)
}

/// Volume type and selector from a full storage class parameter map
pub fn parse_parameters(parameters: &BTreeMap<String, String>) -> Result<(VolumeType, GroupSelector)> {
    let volume_type = parameters
        .get(LVM_TYPE_PARAM)
        .ok_or_else(|| Error::Configuration(format!("missing parameter {}", LVM_TYPE_PARAM)))?
        .parse::<VolumeType>()?;
    let groups = parameters
        .get(VOLUME_GROUPS_PARAM)
        .ok_or_else(|| Error::Configuration(format!("missing parameter {}", VOLUME_GROUPS_PARAM)))?;

    let selector = parse_group_selector(groups)?;
    if volume_type == VolumeType::Thin {
        if let Some((group, _)) = selector.iter().find(|(_, pool)| pool.is_empty()) {
            return Err(Error::PoolNotFound {
                group: group.clone(),
                pool: String::new(),
            });
        }
    }
    Ok((volume_type, selector))
}
