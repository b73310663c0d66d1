//! Placement Selection
//!
//! Maps a node to the volume group it hosts.

use crate::crd::LVMVolumeGroup;
use crate::error::{Error, Result};

/// Picks the volume group backing a volume on a given node
pub struct PlacementSelector;

impl PlacementSelector {
    /// First group, in list order, whose host node is `node`
    pub fn select_group_for_node<'a>(
        groups: &'a [LVMVolumeGroup],
        node: &str,
    ) -> Result<&'a LVMVolumeGroup> {
        groups
            .iter()
            .find(|g| g.host_node() == Some(node))
            .ok_or_else(|| Error::NoEligibleTarget {
                reason: format!("no LVMVolumeGroup found for node {}", node),
            })
    }
}
