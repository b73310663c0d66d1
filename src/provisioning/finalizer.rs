//! Finalizer release
//!
//! Removes the coordinator's finalizer token from a logical volume with
//! conditional updates. Each conflict is followed by a backoff delay and a
//! fresh read; the caller's snapshot is never modified.

use super::client::ResourceClient;
use crate::config::RetryConfig;
use crate::crd::LVMLogicalVolume;
use crate::error::{Error, Result};
use crate::metrics::CoordinatorMetrics;
use backoff::backoff::Backoff;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of a release
#[derive(Debug, Clone)]
pub struct FinalizerRelease {
    /// Whether this call removed the token
    pub removed: bool,
    /// Latest known state of the record
    pub volume: LVMLogicalVolume,
}

/// Removes finalizer tokens under optimistic concurrency
#[derive(Clone)]
pub struct FinalizerReleaser {
    client: ResourceClient,
    retry: RetryConfig,
    metrics: Option<Arc<CoordinatorMetrics>>,
}

impl FinalizerReleaser {
    /// `retry` supplies the delay schedule between conflicting updates
    pub fn new(client: ResourceClient, retry: RetryConfig) -> Self {
        Self {
            client,
            retry,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CoordinatorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Remove `token` from `volume`, making at most `max_attempts` updates
    pub async fn release_finalizer(
        &self,
        volume: &LVMLogicalVolume,
        token: &str,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<FinalizerRelease> {
        let client = self.client.with_cancel(cancel);
        let name = volume.name().to_string();
        let mut snapshot = volume.clone();
        let mut backoff = self.retry.backoff();
        let mut attempt = 0u32;

        loop {
            if !snapshot.has_finalizer(token) {
                debug!("LVMLogicalVolume {} does not carry finalizer {}", name, token);
                return Ok(FinalizerRelease {
                    removed: false,
                    volume: snapshot,
                });
            }

            attempt += 1;
            debug!(
                "Removing finalizer {} from LVMLogicalVolume {} (attempt {})",
                token, name, attempt
            );
            let conflict = match client.update(&snapshot.without_finalizer(token)).await {
                Ok(updated) => {
                    return Ok(FinalizerRelease {
                        removed: true,
                        volume: updated,
                    })
                }
                Err(err) if err.is_conflict() => err,
                Err(err) => return Err(err),
            };

            if let Some(metrics) = &self.metrics {
                metrics.record_finalizer_conflict();
            }
            if attempt >= max_attempts {
                warn!(
                    "Giving up on finalizer {} of LVMLogicalVolume {} after {} conflicts",
                    token, name, attempt
                );
                return Err(Error::FinalizerRetriesExhausted {
                    volume: name,
                    token: token.to_string(),
                    attempts: attempt,
                    source: Box::new(conflict),
                });
            }

            let delay = backoff.next_backoff().unwrap_or_else(|| self.retry.max_delay());
            warn!(
                "Conflict removing finalizer from LVMLogicalVolume {}, retrying in {:?}",
                name, delay
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::Canceled { volume: name, attempts: attempt });
                }
                _ = tokio::time::sleep(delay) => {}
            }

            snapshot = client.get(&name).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{LVMLogicalVolumeSpec, VolumeType};
    use crate::domain::ports::VolumeStore;
    use crate::provisioning::retry::RetryPolicy;
    use crate::store::{InMemoryStore, StoreOperation};
    use assert_matches::assert_matches;

    const TOKEN: &str = "example.io/coordinator";

    fn retry() -> RetryConfig {
        RetryConfig {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            ..Default::default()
        }
    }

    async fn setup(finalizers: &[&str]) -> (Arc<InMemoryStore>, FinalizerReleaser, LVMLogicalVolume) {
        let store = Arc::new(InMemoryStore::new());
        let mut volume = LVMLogicalVolume::new(
            "pvc-1",
            LVMLogicalVolumeSpec {
                actual_lv_name_on_the_node: "pvc-1".into(),
                volume_type: VolumeType::Thin,
                size: "1Gi".into(),
                lvm_volume_group_name: "lvg-a".into(),
                thin: None,
                thick: None,
            },
        );
        volume.metadata.finalizers = Some(finalizers.iter().map(|s| s.to_string()).collect());
        let created = store.create_logical_volume(&volume).await.unwrap();

        let client = ResourceClient::new(store.clone(), RetryPolicy::new(retry()));
        (store, FinalizerReleaser::new(client, retry()), created)
    }

    fn conflict() -> Error {
        Error::Conflict {
            kind: "LVMLogicalVolume".into(),
            name: "pvc-1".into(),
            message: "object has been modified".into(),
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_last_attempt() {
        let (store, releaser, volume) = setup(&[TOKEN, "other.io/keep"]).await;
        store.inject_fault(StoreOperation::Update, conflict());
        store.inject_fault(StoreOperation::Update, conflict());

        let release = releaser
            .release_finalizer(&volume, TOKEN, 3, &CancellationToken::new())
            .await
            .unwrap();

        assert!(release.removed);
        assert!(!release.volume.has_finalizer(TOKEN));
        assert!(release.volume.has_finalizer("other.io/keep"));
        assert_eq!(store.call_count(StoreOperation::Update), 3);
        // The caller's snapshot is untouched
        assert!(volume.has_finalizer(TOKEN));
    }

    #[tokio::test]
    async fn test_exhausted_budget_wraps_conflict() {
        let (store, releaser, volume) = setup(&[TOKEN]).await;
        let metrics = Arc::new(CoordinatorMetrics::new().unwrap());
        let releaser = releaser.with_metrics(metrics.clone());
        for _ in 0..3 {
            store.inject_fault(StoreOperation::Update, conflict());
        }

        let result = releaser
            .release_finalizer(&volume, TOKEN, 3, &CancellationToken::new())
            .await;

        assert_matches!(
            result,
            Err(Error::FinalizerRetriesExhausted { attempts: 3, ref source, .. })
                if source.is_conflict()
        );
        assert_eq!(store.call_count(StoreOperation::Update), 3);
        assert_eq!(metrics.finalizer_conflict_count(), 3);
    }

    #[tokio::test]
    async fn test_absent_token_skips_update() {
        let (store, releaser, volume) = setup(&["other.io/keep"]).await;

        let release = releaser
            .release_finalizer(&volume, TOKEN, 3, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!release.removed);
        assert_eq!(store.call_count(StoreOperation::Update), 0);
    }

    #[tokio::test]
    async fn test_token_removed_concurrently() {
        let (store, releaser, volume) = setup(&[TOKEN]).await;
        // Another actor strips the token, so our snapshot is stale
        let current = store.get_logical_volume("pvc-1").await.unwrap();
        store
            .update_logical_volume(&current.without_finalizer(TOKEN))
            .await
            .unwrap();

        let release = releaser
            .release_finalizer(&volume, TOKEN, 3, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!release.removed);
        assert_eq!(store.call_count(StoreOperation::Update), 2);
    }

    #[tokio::test]
    async fn test_other_errors_fail_fast() {
        let (store, releaser, volume) = setup(&[TOKEN]).await;
        store.inject_fault(StoreOperation::Update, Error::Internal("admission webhook denied".into()));

        let result = releaser
            .release_finalizer(&volume, TOKEN, 3, &CancellationToken::new())
            .await;
        assert_matches!(result, Err(Error::Internal(_)));
        assert_eq!(store.call_count(StoreOperation::Update), 1);
    }
}
