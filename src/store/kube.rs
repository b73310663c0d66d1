//! Kubernetes volume store
//!
//! Reads LVMVolumeGroup records and manages LVMLogicalVolume records through
//! the API server. Both resources are cluster scoped. Updates use `replace`,
//! so the carried resourceVersion makes every update conditional.

use crate::crd::{LVMLogicalVolume, LVMVolumeGroup, LOGICAL_VOLUME_KIND, VOLUME_GROUP_KIND};
use crate::domain::ports::VolumeStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use tracing::debug;

/// Store backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    volume_groups: Api<LVMVolumeGroup>,
    logical_volumes: Api<LVMLogicalVolume>,
}

impl KubeStore {
    /// Create a store over an existing client
    pub fn new(client: Client) -> Self {
        Self {
            volume_groups: Api::all(client.clone()),
            logical_volumes: Api::all(client),
        }
    }

    /// Create a store from the ambient kubeconfig or in-cluster config
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl VolumeStore for KubeStore {
    async fn list_volume_groups(&self) -> Result<Vec<LVMVolumeGroup>> {
        let list = self
            .volume_groups
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, VOLUME_GROUP_KIND, "*"))?;
        Ok(list.items)
    }

    async fn get_volume_group(&self, name: &str) -> Result<LVMVolumeGroup> {
        self.volume_groups
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, VOLUME_GROUP_KIND, name))
    }

    async fn create_logical_volume(&self, volume: &LVMLogicalVolume) -> Result<LVMLogicalVolume> {
        debug!("Creating LVMLogicalVolume {}", volume.name());
        self.logical_volumes
            .create(&PostParams::default(), volume)
            .await
            .map_err(|e| map_kube_error(e, LOGICAL_VOLUME_KIND, volume.name()))
    }

    async fn get_logical_volume(&self, name: &str) -> Result<LVMLogicalVolume> {
        self.logical_volumes
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, LOGICAL_VOLUME_KIND, name))
    }

    async fn update_logical_volume(&self, volume: &LVMLogicalVolume) -> Result<LVMLogicalVolume> {
        self.logical_volumes
            .replace(volume.name(), &PostParams::default(), volume)
            .await
            .map_err(|e| map_kube_error(e, LOGICAL_VOLUME_KIND, volume.name()))
    }

    async fn delete_logical_volume(&self, name: &str) -> Result<()> {
        self.logical_volumes
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, LOGICAL_VOLUME_KIND, name))
    }

    async fn list_logical_volumes(&self) -> Result<Vec<LVMLogicalVolume>> {
        let list = self
            .logical_volumes
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, LOGICAL_VOLUME_KIND, "*"))?;
        Ok(list.items)
    }

    fn store_name(&self) -> &str {
        "kubernetes"
    }
}

/// Classify API server failures into the store error vocabulary
pub fn map_kube_error(err: kube::Error, kind: &str, name: &str) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::ResourceNotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            Error::ResourceExists {
                kind: kind.to_string(),
                name: name.to_string(),
            }
        }
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
            message: ae.message,
        },
        other => Error::Kube(other),
    }
}
