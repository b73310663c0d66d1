//! Capacity Aggregation
//!
//! Computes free space per volume group and picks the node with the most of
//! it. Reads are eventually consistent: two concurrent provisions can pick the
//! same group, and the node reconciler settles the outcome.

use super::client::ResourceClient;
use crate::crd::{LVMVolumeGroup, VolumeType};
use crate::domain::ports::GroupSelector;
use crate::error::{Error, Result};
use crate::quantity::format_binary_si;
use tokio_util::sync::CancellationToken;
use tracing::debug;

// =============================================================================
// Node Choice
// =============================================================================

/// Node picked by free space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeChoice {
    /// Host node of the winning group
    pub node: String,
    /// Winning group name
    pub group: String,
    /// Free space of the winning group in bytes
    pub free_space: i64,
}

// =============================================================================
// Capacity Aggregator
// =============================================================================

/// Reads volume groups and ranks them by free space
#[derive(Clone)]
pub struct CapacityAggregator {
    client: ResourceClient,
}

impl CapacityAggregator {
    pub fn new(client: ResourceClient) -> Self {
        Self { client }
    }

    /// All groups named in `selector`, in list-response order
    pub async fn list_eligible_groups(
        &self,
        selector: &GroupSelector,
        cancel: &CancellationToken,
    ) -> Result<Vec<LVMVolumeGroup>> {
        let groups = self.client.with_cancel(cancel).list_volume_groups().await?;
        let total = groups.len();
        let eligible: Vec<LVMVolumeGroup> = groups
            .into_iter()
            .filter(|g| {
                g.metadata
                    .name
                    .as_ref()
                    .map_or(false, |name| selector.contains_key(name))
            })
            .collect();

        debug!(
            "{} of {} LVMVolumeGroups match the storage class selection",
            eligible.len(),
            total
        );
        Ok(eligible)
    }

    /// Free space of `group` for a volume of `volume_type`.
    ///
    /// Thick volumes draw on the whole group (total minus allocated); thin
    /// volumes draw on the named pool's available space.
    pub fn free_space(
        group: &LVMVolumeGroup,
        volume_type: VolumeType,
        pool_name: Option<&str>,
    ) -> Result<i64> {
        match volume_type {
            VolumeType::Thick => group
                .total_size()?
                .checked_sub(group.allocated_size()?)
                .ok_or_else(|| {
                    Error::CapacityParse(format!(
                        "free space of LVMVolumeGroup {} is out of range",
                        group.metadata.name.as_deref().unwrap_or_default()
                    ))
                }),
            VolumeType::Thin => {
                let group_name = group.metadata.name.clone().unwrap_or_default();
                let pool_name = pool_name.filter(|p| !p.is_empty()).ok_or_else(|| {
                    Error::PoolNotFound {
                        group: group_name.clone(),
                        pool: String::new(),
                    }
                })?;
                group
                    .thin_pool(pool_name)
                    .ok_or_else(|| Error::PoolNotFound {
                        group: group_name,
                        pool: pool_name.to_string(),
                    })?
                    .available_bytes()
            }
        }
    }

    /// Host node of the group with the most free space.
    ///
    /// Strictly-greater comparison over a running maximum starting at zero:
    /// ties go to the earlier group, and a group with no free space never
    /// wins. Groups without a host node are skipped.
    pub fn node_with_max_free_space(
        groups: &[LVMVolumeGroup],
        selector: &GroupSelector,
        volume_type: VolumeType,
    ) -> Result<NodeChoice> {
        let mut best: Option<NodeChoice> = None;
        let mut max_free = 0i64;

        for group in groups {
            let name = match group.metadata.name.as_deref() {
                Some(name) => name,
                None => continue,
            };
            let node = match group.host_node() {
                Some(node) => node,
                None => {
                    debug!("LVMVolumeGroup {} has no host node yet, skipping", name);
                    continue;
                }
            };

            let pool = selector.get(name).map(String::as_str);
            let free = Self::free_space(group, volume_type, pool)?;
            debug!(
                "LVMVolumeGroup {} on node {} has {} free",
                name,
                node,
                format_binary_si(free)
            );

            if free > max_free {
                max_free = free;
                best = Some(NodeChoice {
                    node: node.to_string(),
                    group: name.to_string(),
                    free_space: free,
                });
            }
        }

        best.ok_or_else(|| Error::NoEligibleTarget {
            reason: format!(
                "none of {} LVMVolumeGroups has free space for a {} volume",
                groups.len(),
                volume_type
            ),
        })
    }
}
