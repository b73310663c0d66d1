//! Volume store adapters
//!
//! - [`KubeStore`]: LVM custom resources on the Kubernetes API server
//! - [`InMemoryStore`]: process-local store for standalone runs and tests

pub mod kube;
pub mod memory;

pub use self::kube::{map_kube_error, KubeStore};
pub use self::memory::{InMemoryStore, StoreOperation};
