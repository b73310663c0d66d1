//! In-memory volume store
//!
//! Mirrors the API server semantics the coordinator relies on: name
//! uniqueness, resource-version conflicts, status owned by the reconciler,
//! and finalizer-gated deletion. Used by standalone runs and tests, where
//! the node reconciler is simulated through [`InMemoryStore::set_status`] and
//! [`InMemoryStore::enqueue_status_transitions`].

use crate::crd::{
    LVMLogicalVolume, LVMLogicalVolumeStatus, LVMVolumeGroup, LOGICAL_VOLUME_KIND,
    VOLUME_GROUP_KIND,
};
use crate::domain::ports::VolumeStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Store operations, for fault injection and call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    ListVolumeGroups,
    GetVolumeGroup,
    Create,
    Get,
    Update,
    Delete,
    List,
}

#[derive(Default)]
struct StoreState {
    /// Insertion order is the list-response order
    volume_groups: IndexMap<String, LVMVolumeGroup>,
    logical_volumes: IndexMap<String, LVMLogicalVolume>,
    next_version: u64,
    faults: HashMap<StoreOperation, VecDeque<Error>>,
    transitions: HashMap<String, VecDeque<LVMLogicalVolumeStatus>>,
    calls: HashMap<StoreOperation, u64>,
}

impl StoreState {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn enter(&mut self, op: StoreOperation) -> Result<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// In-memory implementation of the store port
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a volume group, as the node reconciler would
    pub fn upsert_volume_group(&self, mut group: LVMVolumeGroup) {
        let mut state = self.state.write();
        let name = group.metadata.name.clone().unwrap_or_default();
        group.metadata.resource_version = Some(state.bump_version());
        state.volume_groups.insert(name, group);
    }

    /// Seed volume groups from a YAML list of LVMVolumeGroup objects
    pub fn seed_volume_groups_from_yaml(&self, yaml: &str) -> Result<usize> {
        let groups: Vec<LVMVolumeGroup> = serde_yaml::from_str(yaml)?;
        let count = groups.len();
        for group in groups {
            self.upsert_volume_group(group);
        }
        Ok(count)
    }

    /// Write logical volume status, as the node reconciler would
    pub fn set_status(&self, name: &str, status: LVMLogicalVolumeStatus) -> Result<()> {
        let mut state = self.state.write();
        let version = state.bump_version();
        let volume = state
            .logical_volumes
            .get_mut(name)
            .ok_or_else(|| not_found(LOGICAL_VOLUME_KIND, name))?;
        volume.status = Some(status);
        volume.metadata.resource_version = Some(version);
        Ok(())
    }

    /// Queue reconciler progress; each read of `name` applies the next status
    pub fn enqueue_status_transitions(
        &self,
        name: &str,
        statuses: impl IntoIterator<Item = LVMLogicalVolumeStatus>,
    ) {
        self.state
            .write()
            .transitions
            .entry(name.to_string())
            .or_default()
            .extend(statuses);
    }

    /// Fail the next call of `op` with `err`; queued faults fire in order
    pub fn inject_fault(&self, op: StoreOperation, err: Error) {
        self.state.write().faults.entry(op).or_default().push_back(err);
    }

    /// Number of calls made for `op`, including failed ones
    pub fn call_count(&self, op: StoreOperation) -> u64 {
        self.state.read().calls.get(&op).copied().unwrap_or(0)
    }

    /// Whether a logical volume record exists
    pub fn contains_logical_volume(&self, name: &str) -> bool {
        self.state.read().logical_volumes.contains_key(name)
    }
}

#[async_trait]
impl VolumeStore for InMemoryStore {
    async fn list_volume_groups(&self) -> Result<Vec<LVMVolumeGroup>> {
        let mut state = self.state.write();
        state.enter(StoreOperation::ListVolumeGroups)?;
        Ok(state.volume_groups.values().cloned().collect())
    }

    async fn get_volume_group(&self, name: &str) -> Result<LVMVolumeGroup> {
        let mut state = self.state.write();
        state.enter(StoreOperation::GetVolumeGroup)?;
        state
            .volume_groups
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(VOLUME_GROUP_KIND, name))
    }

    async fn create_logical_volume(&self, volume: &LVMLogicalVolume) -> Result<LVMLogicalVolume> {
        let mut state = self.state.write();
        state.enter(StoreOperation::Create)?;

        let name = volume
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::Internal("LVMLogicalVolume without a name".into()))?;
        if state.logical_volumes.contains_key(&name) {
            return Err(Error::ResourceExists {
                kind: LOGICAL_VOLUME_KIND.into(),
                name,
            });
        }

        let mut stored = volume.clone();
        stored.metadata.resource_version = Some(state.bump_version());
        stored.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
        stored.metadata.deletion_timestamp = None;
        stored.status = None;

        debug!("memory store: created LVMLogicalVolume {}", name);
        state.logical_volumes.insert(name, stored.clone());
        Ok(stored)
    }

    async fn get_logical_volume(&self, name: &str) -> Result<LVMLogicalVolume> {
        let mut state = self.state.write();
        state.enter(StoreOperation::Get)?;

        if !state.logical_volumes.contains_key(name) {
            return Err(not_found(LOGICAL_VOLUME_KIND, name));
        }
        let next_status = state.transitions.get_mut(name).and_then(VecDeque::pop_front);
        let version = next_status.as_ref().map(|_| state.bump_version());
        let volume = state
            .logical_volumes
            .get_mut(name)
            .ok_or_else(|| not_found(LOGICAL_VOLUME_KIND, name))?;
        if let Some(status) = next_status {
            volume.status = Some(status);
            volume.metadata.resource_version = version;
        }
        Ok(volume.clone())
    }

    async fn update_logical_volume(&self, volume: &LVMLogicalVolume) -> Result<LVMLogicalVolume> {
        let mut state = self.state.write();
        state.enter(StoreOperation::Update)?;

        let name = volume.name().to_string();
        let current = state
            .logical_volumes
            .get(&name)
            .ok_or_else(|| not_found(LOGICAL_VOLUME_KIND, &name))?;

        if let Some(expected) = &volume.metadata.resource_version {
            if current.metadata.resource_version.as_ref() != Some(expected) {
                return Err(Error::Conflict {
                    kind: LOGICAL_VOLUME_KIND.into(),
                    name,
                    message: format!(
                        "resourceVersion {} is stale, current is {}",
                        expected,
                        current.metadata.resource_version.as_deref().unwrap_or("")
                    ),
                });
            }
        }

        // Status and the deletion timestamp are not writable through update
        let mut stored = volume.clone();
        stored.status = current.status.clone();
        stored.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
        stored.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        stored.metadata.resource_version = Some(state.bump_version());

        let finalizers_cleared = stored.metadata.finalizers.as_ref().map_or(true, Vec::is_empty);
        if stored.deletion_requested() && finalizers_cleared {
            debug!("memory store: last finalizer removed, dropping {}", name);
            state.logical_volumes.shift_remove(&name);
        } else {
            state.logical_volumes.insert(name, stored.clone());
        }
        Ok(stored)
    }

    async fn delete_logical_volume(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        state.enter(StoreOperation::Delete)?;

        let has_finalizers = state
            .logical_volumes
            .get(name)
            .ok_or_else(|| not_found(LOGICAL_VOLUME_KIND, name))?
            .metadata
            .finalizers
            .as_ref()
            .map_or(false, |f| !f.is_empty());

        if has_finalizers {
            let version = state.bump_version();
            if let Some(volume) = state.logical_volumes.get_mut(name) {
                if volume.metadata.deletion_timestamp.is_none() {
                    volume.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                }
                volume.metadata.resource_version = Some(version);
            }
        } else {
            state.logical_volumes.shift_remove(name);
        }
        Ok(())
    }

    async fn list_logical_volumes(&self) -> Result<Vec<LVMLogicalVolume>> {
        let mut state = self.state.write();
        state.enter(StoreOperation::List)?;
        Ok(state.logical_volumes.values().cloned().collect())
    }

    fn store_name(&self) -> &str {
        "memory"
    }
}

fn not_found(kind: &str, name: &str) -> Error {
    Error::ResourceNotFound {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}
