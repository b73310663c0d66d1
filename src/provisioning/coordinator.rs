//! Volume Coordinator
//!
//! The provisioning surface used by a volume front end. Composes the
//! capacity aggregator, placement, spec construction, convergence polling and
//! finalizer release over a single store, with every budget taken from
//! [`CoordinatorConfig`].
//!
//! ```text
//! provision:   list groups → choose node → choose group → build spec
//!              → create (with finalizer) → wait for Created
//! deprovision: get → release finalizer → delete
//! expand:      validate size → get → update spec.size
//! ```

use super::capacity::CapacityAggregator;
use super::client::ResourceClient;
use super::finalizer::FinalizerReleaser;
use super::placement::PlacementSelector;
use super::poller::ConvergencePoller;
use super::retry::RetryPolicy;
use super::spec_builder::SpecBuilder;
use crate::config::CoordinatorConfig;
use crate::crd::{LVMLogicalVolume, VolumeType};
use crate::domain::ports::{GroupSelector, ProvisionedVolume, ProvisioningRequest, VolumeStoreRef};
use crate::error::{Error, Result};
use crate::metrics::CoordinatorMetrics;
use crate::quantity::{format_binary_si, parse_quantity};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Free space of one eligible volume group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCapacity {
    pub name: String,
    pub node: Option<String>,
    pub free_space: i64,
}

/// Coordinates logical volume lifecycle against the declarative store
pub struct VolumeCoordinator {
    config: CoordinatorConfig,
    client: ResourceClient,
    capacity: CapacityAggregator,
    poller: ConvergencePoller,
    finalizers: FinalizerReleaser,
    metrics: Arc<CoordinatorMetrics>,
}

impl VolumeCoordinator {
    /// Build a coordinator over `store`; the configuration is validated here
    pub fn new(
        store: VolumeStoreRef,
        config: CoordinatorConfig,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Result<Self> {
        config.validate()?;

        let retry = RetryPolicy::new(config.retry.clone()).with_metrics(metrics.clone());
        let client = ResourceClient::new(store, retry);
        let capacity = CapacityAggregator::new(client.clone());
        let poller = ConvergencePoller::new(client.clone(), config.poll.clone());
        let finalizers =
            FinalizerReleaser::new(client.clone(), config.retry.clone()).with_metrics(metrics.clone());

        info!(
            "Volume coordinator ready (store: {}, finalizer: {})",
            client.store_name(),
            config.finalizer.token
        );

        Ok(Self {
            config,
            client,
            capacity,
            poller,
            finalizers,
            metrics,
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<CoordinatorMetrics> {
        &self.metrics
    }

    pub fn client(&self) -> &ResourceClient {
        &self.client
    }

    /// Create a logical volume and wait until the reconciler reports it
    pub async fn provision(
        &self,
        request: &ProvisioningRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedVolume> {
        let result = self.do_provision(request, cancel).await;
        self.metrics.record_operation("provision", &result);
        result
    }

    /// Release the coordinator's finalizer and delete the record
    pub async fn deprovision(&self, volume_id: &str, cancel: &CancellationToken) -> Result<()> {
        let result = self.do_deprovision(volume_id, cancel).await;
        self.metrics.record_operation("deprovision", &result);
        result
    }

    /// Set a new requested size; does not wait for the reconciler
    pub async fn expand(&self, volume_id: &str, new_size: &str) -> Result<LVMLogicalVolume> {
        let result = self.do_expand(volume_id, new_size).await;
        self.metrics.record_operation("expand", &result);
        result
    }

    /// Wait until `volume_id` reports `new_size`, after an [`expand`](Self::expand)
    pub async fn wait_for_size(
        &self,
        volume_id: &str,
        new_size: &str,
        cancel: &CancellationToken,
    ) -> Result<u32> {
        let result = self.do_wait_for_size(volume_id, new_size, cancel).await;
        if let Ok(attempts) = &result {
            self.metrics.observe_poll_attempts(*attempts);
        }
        self.metrics.record_operation("wait_for_size", &result);
        result
    }

    /// Free space of each group in `selector`, in list order
    pub async fn eligible_groups(
        &self,
        selector: &GroupSelector,
        volume_type: VolumeType,
        cancel: &CancellationToken,
    ) -> Result<Vec<GroupCapacity>> {
        let groups = self.capacity.list_eligible_groups(selector, cancel).await?;
        groups
            .iter()
            .map(|group| -> Result<GroupCapacity> {
                let name = group.metadata.name.clone().unwrap_or_default();
                let pool = selector.get(&name).map(String::as_str);
                Ok(GroupCapacity {
                    free_space: CapacityAggregator::free_space(group, volume_type, pool)?,
                    node: group.host_node().map(str::to_string),
                    name,
                })
            })
            .collect()
    }

    async fn do_provision(
        &self,
        request: &ProvisioningRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedVolume> {
        ensure_active(cancel, &request.name)?;
        if request.desired_size <= 0 {
            return Err(Error::Configuration(format!(
                "requested size for {} must be positive",
                request.name
            )));
        }
        let tolerance = match request.size_tolerance {
            Some(tolerance) if tolerance <= 0 => {
                return Err(Error::Configuration(format!(
                    "size tolerance for {} must be positive, got {}",
                    request.name, tolerance
                )));
            }
            Some(tolerance) => tolerance,
            None => self.config.poll.size_tolerance_bytes()?,
        };
        let client = self.client.with_cancel(cancel);

        let groups = self
            .capacity
            .list_eligible_groups(&request.group_selector, cancel)
            .await?;
        if groups.is_empty() {
            return Err(Error::NoEligibleTarget {
                reason: format!(
                    "none of the {} LVMVolumeGroups named by the storage class exist",
                    request.group_selector.len()
                ),
            });
        }

        let node = match &request.preferred_node {
            Some(node) => node.clone(),
            None => {
                let choice = CapacityAggregator::node_with_max_free_space(
                    &groups,
                    &request.group_selector,
                    request.volume_type,
                )?;
                info!(
                    "Selected node {} with {} free for {}",
                    choice.node,
                    format_binary_si(choice.free_space),
                    request.name
                );
                choice.node
            }
        };

        let group = PlacementSelector::select_group_for_node(&groups, &node)?;
        let spec = SpecBuilder::build_spec(
            &request.name,
            group,
            &request.group_selector,
            request.volume_type,
            request.desired_size,
            request.contiguous,
        )?;
        let volume_group = spec.lvm_volume_group_name.clone();

        let mut volume = LVMLogicalVolume::new(&request.name, spec);
        volume.metadata.finalizers = Some(vec![self.config.finalizer.token.clone()]);

        ensure_active(cancel, &request.name)?;
        client.create(&volume).await?;
        info!(
            "Created LVMLogicalVolume {} ({} {}) in {} on node {}",
            request.name,
            request.volume_type,
            format_binary_si(request.desired_size),
            volume_group,
            node
        );

        let attempts = self
            .poller
            .wait_for_creation(
                &request.name,
                request.desired_size,
                tolerance,
                &self.config.poll.limit(),
                cancel,
            )
            .await?;
        self.metrics.observe_poll_attempts(attempts);
        info!(
            "LVMLogicalVolume {} is ready after {} attempts",
            request.name, attempts
        );

        Ok(ProvisionedVolume {
            node,
            volume_id: request.name.clone(),
            volume_group,
            attempts,
        })
    }

    async fn do_wait_for_size(
        &self,
        volume_id: &str,
        new_size: &str,
        cancel: &CancellationToken,
    ) -> Result<u32> {
        let size = parse_quantity(new_size)?;
        let tolerance = self.config.poll.size_tolerance_bytes()?;
        self.poller
            .wait_for_creation(volume_id, size, tolerance, &self.config.poll.limit(), cancel)
            .await
    }

    async fn do_deprovision(&self, volume_id: &str, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel, volume_id)?;
        let client = self.client.with_cancel(cancel);
        let volume = client.get(volume_id).await?;

        ensure_active(cancel, volume_id)?;
        let release = self
            .finalizers
            .release_finalizer(
                &volume,
                &self.config.finalizer.token,
                self.config.finalizer.max_attempts,
                cancel,
            )
            .await?;
        if release.removed {
            info!("Removed finalizer from LVMLogicalVolume {}", volume_id);
        }

        ensure_active(cancel, volume_id)?;
        match client.delete(volume_id).await {
            Ok(()) => {
                info!("Deleted LVMLogicalVolume {}", volume_id);
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                info!("LVMLogicalVolume {} was already gone", volume_id);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn do_expand(&self, volume_id: &str, new_size: &str) -> Result<LVMLogicalVolume> {
        let size = parse_quantity(new_size)?;
        if size <= 0 {
            return Err(Error::CapacityParse(format!(
                "new size for {} must be positive, got {}",
                volume_id, new_size
            )));
        }

        let current = self.client.get(volume_id).await?;
        if current.deletion_requested() {
            return Err(Error::ConflictingDeletion {
                volume: volume_id.to_string(),
            });
        }
        if let Some(actual) = current.actual_size()? {
            if size < actual {
                warn!(
                    "Requested size {} for {} is below the reported size {}",
                    format_binary_si(size),
                    volume_id,
                    format_binary_si(actual)
                );
            }
        }

        let mut desired = current.clone();
        desired.spec.size = format_binary_si(size);
        let updated = self.client.update(&desired).await?;
        info!(
            "Requested expansion of LVMLogicalVolume {} to {}",
            volume_id, updated.spec.size
        );
        Ok(updated)
    }
}

impl std::fmt::Debug for VolumeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeCoordinator")
            .field("store", &self.client.store_name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn ensure_active(cancel: &CancellationToken, volume: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Canceled {
            volume: volume.to_string(),
            attempts: 0,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PollConfig, RetryConfig};
    use crate::crd::{LVMLogicalVolumeStatus, LogicalVolumePhase};
    use crate::metrics::{OUTCOME_ERROR, OUTCOME_SUCCESS};
    use crate::provisioning::capacity::tests::thin_group;
    use crate::quantity::{bytes_to_quantity, GI};
    use crate::store::{InMemoryStore, StoreOperation};
    use assert_matches::assert_matches;

    const TOKEN: &str = "example.io/coordinator";

    fn config() -> CoordinatorConfig {
        let mut config = CoordinatorConfig {
            retry: RetryConfig {
                initial_delay_ms: 1,
                max_delay_ms: 2,
                ..Default::default()
            },
            poll: PollConfig {
                interval_ms: 1,
                timeout_secs: None,
                max_attempts: Some(20),
                ..Default::default()
            },
            ..Default::default()
        };
        config.finalizer.token = TOKEN.into();
        config
    }

    fn setup() -> (Arc<InMemoryStore>, VolumeCoordinator) {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_volume_group(thin_group("lvg-a", "node1", "pool1", 5 * GI));
        store.upsert_volume_group(thin_group("lvg-b", "node2", "pool1", 12 * GI));

        let metrics = Arc::new(CoordinatorMetrics::new().unwrap());
        let coordinator = VolumeCoordinator::new(store.clone(), config(), metrics).unwrap();
        (store, coordinator)
    }

    fn thin_request(name: &str, size: i64) -> ProvisioningRequest {
        let selector: GroupSelector = [
            ("lvg-a".to_string(), "pool1".to_string()),
            ("lvg-b".to_string(), "pool1".to_string()),
        ]
        .into();
        ProvisioningRequest::new(name, size, VolumeType::Thin, selector)
    }

    fn created(size: i64) -> LVMLogicalVolumeStatus {
        LVMLogicalVolumeStatus {
            phase: LogicalVolumePhase::Created,
            actual_size: Some(bytes_to_quantity(size)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_provision_thin_on_emptiest_node() {
        let (store, coordinator) = setup();
        store.enqueue_status_transitions(
            "pvc-1",
            vec![LVMLogicalVolumeStatus::default(), created(10 * GI)],
        );

        let provisioned = coordinator
            .provision(&thin_request("pvc-1", 10 * GI), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(provisioned.node, "node2");
        assert_eq!(provisioned.volume_group, "lvg-b");
        assert_eq!(provisioned.volume_id, "pvc-1");
        assert_eq!(provisioned.attempts, 2);

        let stored = coordinator.client().get("pvc-1").await.unwrap();
        assert_eq!(stored.spec.size, "10Gi");
        assert_eq!(stored.spec.thin.as_ref().unwrap().pool_name, "pool1");
        assert!(stored.has_finalizer(TOKEN));
        assert_eq!(
            coordinator.metrics().operation_count("provision", OUTCOME_SUCCESS),
            1
        );
    }

    #[tokio::test]
    async fn test_preferred_node_skips_capacity_ranking() {
        let (store, coordinator) = setup();
        store.enqueue_status_transitions("pvc-1", vec![created(GI)]);

        let provisioned = coordinator
            .provision(
                &thin_request("pvc-1", GI).with_preferred_node("node1"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(provisioned.volume_group, "lvg-a");
    }

    #[tokio::test]
    async fn test_failed_volume_keeps_record() {
        let (store, coordinator) = setup();
        store.enqueue_status_transitions(
            "pvc-1",
            vec![LVMLogicalVolumeStatus {
                phase: LogicalVolumePhase::Failed,
                reason: "thin pool is full".into(),
                ..Default::default()
            }],
        );

        let result = coordinator
            .provision(&thin_request("pvc-1", 10 * GI), &CancellationToken::new())
            .await;
        assert_matches!(result, Err(Error::VolumeFailed { ref reason, .. }) if reason == "thin pool is full");
        assert!(store.contains_logical_volume("pvc-1"));
        assert_eq!(coordinator.metrics().operation_count("provision", OUTCOME_ERROR), 1);
    }

    #[tokio::test]
    async fn test_no_matching_groups() {
        let (store, coordinator) = setup();
        let request = ProvisioningRequest::new(
            "pvc-1",
            GI,
            VolumeType::Thin,
            [("lvg-z".to_string(), "pool1".to_string())].into(),
        );

        let result = coordinator.provision(&request, &CancellationToken::new()).await;
        assert_matches!(result, Err(Error::NoEligibleTarget { .. }));
        assert_eq!(store.call_count(StoreOperation::Create), 0);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let (store, coordinator) = setup();
        store.enqueue_status_transitions("pvc-1", vec![created(GI)]);
        coordinator
            .provision(&thin_request("pvc-1", GI), &CancellationToken::new())
            .await
            .unwrap();

        let result = coordinator
            .provision(&thin_request("pvc-1", GI), &CancellationToken::new())
            .await;
        assert_matches!(result, Err(Error::ResourceExists { .. }));
    }

    #[tokio::test]
    async fn test_canceled_before_create() {
        let (store, coordinator) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = coordinator.provision(&thin_request("pvc-1", GI), &cancel).await;
        assert_matches!(result, Err(Error::Canceled { .. }));
        assert_eq!(store.call_count(StoreOperation::Create), 0);
    }

    #[tokio::test]
    async fn test_deprovision_removes_record() {
        let (store, coordinator) = setup();
        store.enqueue_status_transitions("pvc-1", vec![created(GI)]);
        coordinator
            .provision(&thin_request("pvc-1", GI), &CancellationToken::new())
            .await
            .unwrap();

        coordinator
            .deprovision("pvc-1", &CancellationToken::new())
            .await
            .unwrap();
        assert!(!store.contains_logical_volume("pvc-1"));
    }

    #[tokio::test]
    async fn test_deprovision_after_external_delete() {
        let (store, coordinator) = setup();
        store.enqueue_status_transitions("pvc-1", vec![created(GI)]);
        coordinator
            .provision(&thin_request("pvc-1", GI), &CancellationToken::new())
            .await
            .unwrap();
        // Someone else already asked for deletion; our finalizer holds it
        coordinator.client().delete("pvc-1").await.unwrap();
        assert!(store.contains_logical_volume("pvc-1"));

        coordinator
            .deprovision("pvc-1", &CancellationToken::new())
            .await
            .unwrap();
        assert!(!store.contains_logical_volume("pvc-1"));
    }

    #[tokio::test]
    async fn test_deprovision_absent_volume() {
        let (_store, coordinator) = setup();

        let result = coordinator
            .deprovision("pvc-missing", &CancellationToken::new())
            .await;
        assert_matches!(result, Err(Error::ResourceNotFound { ref name, .. }) if name == "pvc-missing");
    }

    #[tokio::test]
    async fn test_expand_and_wait() {
        let (store, coordinator) = setup();
        store.enqueue_status_transitions("pvc-1", vec![created(GI)]);
        coordinator
            .provision(&thin_request("pvc-1", GI), &CancellationToken::new())
            .await
            .unwrap();

        let updated = coordinator.expand("pvc-1", "2Gi").await.unwrap();
        assert_eq!(updated.spec.size, "2Gi");

        store.enqueue_status_transitions("pvc-1", vec![created(GI), created(2 * GI)]);
        let attempts = coordinator
            .wait_for_size("pvc-1", "2Gi", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_expand_rejects_bad_size() {
        let (_store, coordinator) = setup();
        assert_matches!(
            coordinator.expand("pvc-1", "a lot").await,
            Err(Error::CapacityParse(_))
        );
    }

    #[tokio::test]
    async fn test_eligible_groups_report() {
        let (_store, coordinator) = setup();
        let request = thin_request("unused", GI);

        let groups = coordinator
            .eligible_groups(&request.group_selector, VolumeType::Thin, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].name, "lvg-b");
        assert_eq!(groups[1].node.as_deref(), Some("node2"));
        assert_eq!(groups[1].free_space, 12 * GI);
    }

    #[tokio::test]
    async fn test_non_positive_tolerance_rejected() {
        let (store, coordinator) = setup();
        store.enqueue_status_transitions("pvc-1", vec![created(10 * GI)]);

        for tolerance in [0, -GI] {
            let result = coordinator
                .provision(
                    &thin_request("pvc-1", 10 * GI).with_size_tolerance(tolerance),
                    &CancellationToken::new(),
                )
                .await;
            assert_matches!(result, Err(Error::Configuration(ref msg)) if msg.contains("tolerance"));
        }
        assert_eq!(store.call_count(StoreOperation::Create), 0);
        assert_eq!(store.call_count(StoreOperation::ListVolumeGroups), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_store_retries() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_volume_group(thin_group("lvg-a", "node1", "pool1", 5 * GI));
        let mut config = config();
        config.retry = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 60_000,
            max_delay_ms: 60_000,
            ..Default::default()
        };
        let metrics = Arc::new(CoordinatorMetrics::new().unwrap());
        let coordinator = VolumeCoordinator::new(store.clone(), config, metrics).unwrap();
        store.inject_fault(
            StoreOperation::ListVolumeGroups,
            Error::StoreTransient("apiserver unavailable".into()),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = coordinator.provision(&thin_request("pvc-1", GI), &cancel).await;
        assert_matches!(result, Err(Error::Canceled { attempts: 1, .. }));
        assert_eq!(store.call_count(StoreOperation::ListVolumeGroups), 1);
        assert_eq!(store.call_count(StoreOperation::Create), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config();
        config.poll.max_attempts = None;
        let metrics = Arc::new(CoordinatorMetrics::new().unwrap());

        let result = VolumeCoordinator::new(Arc::new(InMemoryStore::new()), config, metrics);
        assert_matches!(result, Err(Error::Configuration(_)));
    }
}
