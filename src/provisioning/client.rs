//! Resource client
//!
//! Wraps a [`VolumeStore`](crate::domain::ports::VolumeStore) with the
//! bounded retry policy. Every store call the provisioning components make
//! goes through here.

use super::retry::RetryPolicy;
use crate::crd::{LVMLogicalVolume, LVMVolumeGroup, LOGICAL_VOLUME_KIND, VOLUME_GROUP_KIND};
use crate::domain::ports::VolumeStoreRef;
use crate::error::Result;
use tokio_util::sync::CancellationToken;

/// Store access with retries
#[derive(Clone)]
pub struct ResourceClient {
    store: VolumeStoreRef,
    retry: RetryPolicy,
}

impl ResourceClient {
    pub fn new(store: VolumeStoreRef, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Name of the underlying store
    pub fn store_name(&self) -> &str {
        self.store.store_name()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Copy of this client whose retries give up once `cancel` fires
    pub fn with_cancel(&self, cancel: &CancellationToken) -> Self {
        Self {
            store: self.store.clone(),
            retry: self.retry.clone().with_cancel(cancel.clone()),
        }
    }

    pub async fn list_volume_groups(&self) -> Result<Vec<LVMVolumeGroup>> {
        self.retry
            .run("list", VOLUME_GROUP_KIND, "*", || self.store.list_volume_groups())
            .await
    }

    pub async fn get_volume_group(&self, name: &str) -> Result<LVMVolumeGroup> {
        self.retry
            .run("get", VOLUME_GROUP_KIND, name, || self.store.get_volume_group(name))
            .await
    }

    pub async fn create(&self, volume: &LVMLogicalVolume) -> Result<LVMLogicalVolume> {
        self.retry
            .run("create", LOGICAL_VOLUME_KIND, volume.name(), || {
                self.store.create_logical_volume(volume)
            })
            .await
    }

    pub async fn get(&self, name: &str) -> Result<LVMLogicalVolume> {
        self.retry
            .run("get", LOGICAL_VOLUME_KIND, name, || self.store.get_logical_volume(name))
            .await
    }

    /// Conditional update; a stale resource version surfaces as `Conflict`
    pub async fn update(&self, volume: &LVMLogicalVolume) -> Result<LVMLogicalVolume> {
        self.retry
            .run("update", LOGICAL_VOLUME_KIND, volume.name(), || {
                self.store.update_logical_volume(volume)
            })
            .await
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.retry
            .run("delete", LOGICAL_VOLUME_KIND, name, || {
                self.store.delete_logical_volume(name)
            })
            .await
    }

    pub async fn list(&self) -> Result<Vec<LVMLogicalVolume>> {
        self.retry
            .run("list", LOGICAL_VOLUME_KIND, "*", || self.store.list_logical_volumes())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::Error;
    use crate::store::{InMemoryStore, StoreOperation};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn client(store: Arc<InMemoryStore>, attempts: u32) -> ResourceClient {
        ResourceClient::new(
            store,
            RetryPolicy::new(RetryConfig {
                max_attempts: attempts,
                initial_delay_ms: 1,
                max_delay_ms: 2,
                ..Default::default()
            }),
        )
    }

    #[tokio::test]
    async fn test_list_retries_transient_failures() {
        let store = Arc::new(InMemoryStore::new());
        store.inject_fault(StoreOperation::ListVolumeGroups, Error::StoreTransient("reset".into()));
        store.inject_fault(StoreOperation::ListVolumeGroups, Error::StoreTransient("reset".into()));

        let groups = client(store.clone(), 3).list_volume_groups().await.unwrap();
        assert!(groups.is_empty());
        assert_eq!(store.call_count(StoreOperation::ListVolumeGroups), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_immediate() {
        let store = Arc::new(InMemoryStore::new());
        let result = client(store.clone(), 3).get("pvc-missing").await;

        assert_matches!(result, Err(Error::ResourceNotFound { .. }));
        assert_eq!(store.call_count(StoreOperation::Get), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_names_operation() {
        let store = Arc::new(InMemoryStore::new());
        for _ in 0..2 {
            store.inject_fault(StoreOperation::Delete, Error::StoreTransient("timeout".into()));
        }

        let result = client(store, 2).delete("pvc-1").await;
        assert_matches!(
            result,
            Err(Error::StoreUnavailable { ref operation, ref name, attempts: 2, .. })
                if operation == "delete" && name == "pvc-1"
        );
    }

    #[tokio::test]
    async fn test_canceled_client_skips_retries() {
        let store = Arc::new(InMemoryStore::new());
        for _ in 0..3 {
            store.inject_fault(StoreOperation::Get, Error::StoreTransient("timeout".into()));
        }
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = client(store.clone(), 3).with_cancel(&cancel).get("pvc-1").await;
        assert_matches!(result, Err(Error::Canceled { attempts: 1, .. }));
        assert_eq!(store.call_count(StoreOperation::Get), 1);
    }
}
