//! Migration lifecycle operations: test migrate, cleanup, migrate,
//! complete, resync, cancel.
//!
//! Status-sensitive operations refresh the item's canonical status from
//! the remote side before the guard runs; a guard failure returns a
//! precondition error and submits nothing. Cancel is the one exception to
//! remote-first ordering: the local record is always marked `Cancelled`,
//! whether or not the remote side could be reached.

use std::sync::Arc;

use log::{info, warn};

use crate::api::SiteRecoveryApi;
use crate::error::{MigrateError, MigrateResult};
use crate::remote::{
    MigrateProperties, MigrateProviderDetails, MigrateRequest, TestMigrateProperties,
    TestMigrateProviderDetails, TestMigrateRequest, CBT_INSTANCE_TYPE,
};
use crate::store::ItemStore;
use crate::types::{MigrationStatus, ReplicationItem, TestMigrateState};

const MIGRATE_ALLOWED: &[MigrationStatus] = &[
    MigrationStatus::InitialReplication,
    MigrationStatus::Replicating,
    MigrationStatus::Protected,
];

pub struct LifecycleWorkflow {
    api: Arc<dyn SiteRecoveryApi>,
    store: Arc<dyn ItemStore>,
}

impl LifecycleWorkflow {
    pub fn new(api: Arc<dyn SiteRecoveryApi>, store: Arc<dyn ItemStore>) -> Self {
        Self { api, store }
    }

    /// Non-disruptive test failover into an isolated network, using the
    /// latest available recovery point. `network_id` and `subnet_name`
    /// default to the item's configured target network and subnet.
    pub async fn test_migrate(
        &self,
        item_id: &str,
        network_id: Option<&str>,
        subnet_name: Option<&str>,
    ) -> MigrateResult<ReplicationItem> {
        let item = self.refreshed(item_id).await?;
        guard(
            &item,
            MIGRATE_ALLOWED,
            "InitialReplication, Replicating or Protected",
        )?;
        let remote_name = remote_name(&item)?;

        let points = self
            .api
            .list_recovery_points(
                &item.vault_name,
                &item.fabric_name,
                &item.container_name,
                &remote_name,
            )
            .await?;
        let point = points
            .iter()
            .max_by(|a, b| {
                a.properties
                    .recovery_point_time
                    .cmp(&b.properties.recovery_point_time)
            })
            .ok_or_else(|| {
                MigrateError::precondition(&item.status, "at least one recovery point")
            })?;

        let request = test_migrate_request(&item, &point.id, network_id, subnet_name);
        self.api
            .test_migrate(
                &item.vault_name,
                &item.fabric_name,
                &item.container_name,
                &remote_name,
                &request,
            )
            .await?;
        info!("test migration started for '{}'", item.machine_name);
        self.mutate(item_id, |it| {
            it.test_migrate_state = TestMigrateState::InProgress;
        })
        .await
    }

    /// Tear down the test VM after a successful test migration.
    pub async fn test_migrate_cleanup(
        &self,
        item_id: &str,
        comments: &str,
    ) -> MigrateResult<ReplicationItem> {
        let item = self.load(item_id).await?;
        if item.test_migrate_state != TestMigrateState::Succeeded {
            return Err(MigrateError::precondition(
                format!("{:?}", item.test_migrate_state),
                "a succeeded test migration",
            ));
        }
        let remote_name = remote_name(&item)?;
        self.api
            .test_migrate_cleanup(
                &item.vault_name,
                &item.fabric_name,
                &item.container_name,
                &remote_name,
                comments,
            )
            .await?;
        info!("test migration cleanup started for '{}'", item.machine_name);
        self.mutate(item_id, |it| {
            it.test_migrate_state = TestMigrateState::CleanupInProgress;
        })
        .await
    }

    /// The actual cutover. `perform_shutdown` powers the source VM off
    /// first for a no-data-loss migration.
    pub async fn migrate(
        &self,
        item_id: &str,
        perform_shutdown: bool,
    ) -> MigrateResult<ReplicationItem> {
        let item = self.refreshed(item_id).await?;
        guard(
            &item,
            MIGRATE_ALLOWED,
            "InitialReplication, Replicating or Protected",
        )?;
        let remote_name = remote_name(&item)?;

        let request = MigrateRequest {
            properties: MigrateProperties {
                provider_specific_details: MigrateProviderDetails {
                    instance_type: CBT_INSTANCE_TYPE.into(),
                    perform_shutdown: if perform_shutdown { "true" } else { "false" }.into(),
                },
            },
        };
        self.api
            .migrate(
                &item.vault_name,
                &item.fabric_name,
                &item.container_name,
                &remote_name,
                &request,
            )
            .await?;
        info!(
            "migration started for '{}' (shutdown source: {})",
            item.machine_name, perform_shutdown
        );
        self.mutate(item_id, |it| {
            it.status = MigrationStatus::MigrationInProgress;
        })
        .await
    }

    /// Stop replication for a machine that has been migrated. The remote
    /// item is deleted; the local record becomes terminal.
    pub async fn complete_migration(&self, item_id: &str) -> MigrateResult<ReplicationItem> {
        let item = self.load(item_id).await?;
        let remote_name = remote_name(&item)?;
        self.api
            .delete_migration_item(
                &item.vault_name,
                &item.fabric_name,
                &item.container_name,
                &remote_name,
            )
            .await?;
        info!("migration completed for '{}'", item.machine_name);
        self.mutate(item_id, |it| {
            it.status = MigrationStatus::MigrationCompleted;
        })
        .await
    }

    /// Full re-sync after replication drift or a failed delta.
    pub async fn resync(&self, item_id: &str) -> MigrateResult<ReplicationItem> {
        let item = self.load(item_id).await?;
        let remote_name = remote_name(&item)?;
        self.api
            .resync(
                &item.vault_name,
                &item.fabric_name,
                &item.container_name,
                &remote_name,
            )
            .await?;
        info!("resync started for '{}'", item.machine_name);
        self.mutate(item_id, |it| {
            it.status = MigrationStatus::Resyncing;
        })
        .await
    }

    /// Abandon a migration attempt. Remote teardown is best-effort; the
    /// local record always ends up `Cancelled` so the machine can be
    /// re-enabled later.
    pub async fn cancel(&self, item_id: &str) -> MigrateResult<ReplicationItem> {
        let item = self.load(item_id).await?;
        if item.is_terminal() {
            return Err(MigrateError::precondition(&item.status, "a non-terminal status"));
        }
        if let Some(remote_name) = item.remote_item_id.as_deref() {
            if let Err(e) = self
                .api
                .disable_replication(
                    &item.vault_name,
                    &item.fabric_name,
                    &item.container_name,
                    remote_name,
                )
                .await
            {
                warn!(
                    "remote disable failed for '{}'; cancelling locally anyway: {}",
                    item.machine_name, e
                );
            }
        }
        info!("migration cancelled for '{}'", item.machine_name);
        self.mutate(item_id, |it| {
            it.status = MigrationStatus::Cancelled;
        })
        .await
    }

    /// Load an item and, when it is non-terminal and correlated, refresh
    /// its canonical status from the remote side before a status-sensitive
    /// guard runs. Refresh failures fall back to the last known status.
    async fn refreshed(&self, item_id: &str) -> MigrateResult<ReplicationItem> {
        let item = self.load(item_id).await?;
        if item.is_terminal() {
            return Ok(item);
        }
        let Some(remote_name) = item.remote_item_id.as_deref() else {
            return Ok(item);
        };
        match self
            .api
            .get_migration_item(
                &item.vault_name,
                &item.fabric_name,
                &item.container_name,
                remote_name,
            )
            .await
        {
            Ok(Some(remote)) => {
                let status = crate::reconcile::canonical_status(&remote.properties);
                self.mutate(item_id, move |it| it.status = status).await
            }
            Ok(None) => Ok(item),
            Err(e) => {
                warn!(
                    "status refresh failed for '{}'; using last known status: {}",
                    item.machine_name, e
                );
                Ok(item)
            }
        }
    }

    async fn load(&self, item_id: &str) -> MigrateResult<ReplicationItem> {
        self.store
            .get(item_id)
            .await?
            .ok_or_else(|| MigrateError::not_found(format!("replication item '{}'", item_id)))
    }

    async fn mutate(
        &self,
        item_id: &str,
        f: impl FnOnce(&mut ReplicationItem) + Send + 'static,
    ) -> MigrateResult<ReplicationItem> {
        self.store
            .update(item_id, Box::new(f))
            .await?
            .ok_or_else(|| MigrateError::not_found(format!("replication item '{}'", item_id)))
    }
}

fn guard(
    item: &ReplicationItem,
    allowed: &[MigrationStatus],
    required: &str,
) -> MigrateResult<()> {
    if allowed.contains(&item.status) {
        Ok(())
    } else {
        Err(MigrateError::precondition(&item.status, required))
    }
}

fn test_migrate_request(
    item: &ReplicationItem,
    recovery_point_id: &str,
    network_id: Option<&str>,
    subnet_name: Option<&str>,
) -> TestMigrateRequest {
    TestMigrateRequest {
        properties: TestMigrateProperties {
            provider_specific_details: TestMigrateProviderDetails {
                instance_type: CBT_INSTANCE_TYPE.into(),
                recovery_point_id: recovery_point_id.to_string(),
                network_id: network_id
                    .unwrap_or(&item.target.virtual_network_id)
                    .to_string(),
                subnet_name: Some(
                    subnet_name.unwrap_or(&item.target.subnet_name).to_string(),
                ),
            },
        },
    }
}

/// Remote item name; operations other than cancel cannot proceed without
/// one.
fn remote_name(item: &ReplicationItem) -> MigrateResult<String> {
    item.remote_item_id.clone().ok_or_else(|| {
        MigrateError::precondition(&item.status, "a remote replication item")
    })
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockApi;
    use crate::remote::{RecoveryPoint, RecoveryPointProperties};
    use crate::store::MemoryStore;
    use crate::types::{TargetConfig, TopologyCache};

    fn item(status: MigrationStatus) -> ReplicationItem {
        let topology = TopologyCache {
            vault_name: "v1".into(),
            fabric_name: "fab1".into(),
            container_name: "cont1".into(),
            ..Default::default()
        };
        let mut item = ReplicationItem::new(
            "/machines/m1",
            "web01",
            &topology,
            TargetConfig {
                virtual_network_id: "/vnets/prod".into(),
                subnet_name: "default".into(),
                ..Default::default()
            },
        );
        item.status = status;
        item.remote_item_id = Some("web01".into());
        item
    }

    fn point(name: &str, time: &str) -> RecoveryPoint {
        RecoveryPoint {
            id: format!("/recoveryPoints/{name}"),
            name: name.into(),
            properties: RecoveryPointProperties {
                recovery_point_time: Some(time.into()),
                recovery_point_type: Some("CrashConsistent".into()),
            },
        }
    }

    async fn setup(
        api: MockApi,
        item: ReplicationItem,
    ) -> (LifecycleWorkflow, Arc<MockApi>, String) {
        let id = item.id.clone();
        let api = Arc::new(api);
        let store = Arc::new(MemoryStore::new());
        store.insert(item).await.unwrap();
        (LifecycleWorkflow::new(api.clone(), store), api, id)
    }

    #[tokio::test]
    async fn test_migrate_uses_latest_recovery_point() {
        let mut api = MockApi::default();
        api.recovery_points = vec![
            point("rp-old", "2026-08-01T00:00:00Z"),
            point("rp-new", "2026-08-02T00:00:00Z"),
            point("rp-mid", "2026-08-01T12:00:00Z"),
        ];
        let (wf, api, id) = setup(api, item(MigrationStatus::Protected)).await;
        let updated = wf.test_migrate(&id, None, None).await.unwrap();
        assert_eq!(updated.test_migrate_state, TestMigrateState::InProgress);
        assert!(api.calls().iter().any(|c| c == "test_migrate:web01"));
    }

    #[test]
    fn test_migrate_request_honors_network_and_subnet_overrides() {
        let it = item(MigrationStatus::Protected);

        let defaulted = test_migrate_request(&it, "/recoveryPoints/rp-1", None, None);
        let details = &defaulted.properties.provider_specific_details;
        assert_eq!(details.network_id, "/vnets/prod");
        assert_eq!(details.subnet_name.as_deref(), Some("default"));

        let overridden = test_migrate_request(
            &it,
            "/recoveryPoints/rp-1",
            Some("/vnets/test"),
            Some("test-subnet"),
        );
        let details = &overridden.properties.provider_specific_details;
        assert_eq!(details.network_id, "/vnets/test");
        assert_eq!(details.subnet_name.as_deref(), Some("test-subnet"));
    }

    #[tokio::test]
    async fn test_migrate_without_recovery_points_fails_before_submit() {
        let (wf, api, id) = setup(MockApi::default(), item(MigrationStatus::Replicating)).await;
        let err = wf.test_migrate(&id, None, None).await.unwrap_err();
        assert_eq!(err.kind, crate::error::MigrateErrorKind::Precondition);
        assert!(!api.calls().iter().any(|c| c.starts_with("test_migrate:")));
    }

    #[tokio::test]
    async fn test_migrate_guard_blocks_enabling_without_submitting() {
        let (wf, api, id) = setup(MockApi::default(), item(MigrationStatus::Enabling)).await;
        let err = wf.test_migrate(&id, None, None).await.unwrap_err();
        assert_eq!(err.kind, crate::error::MigrateErrorKind::Precondition);
        assert!(err.message.contains("'Enabling'"));
        assert!(!api.calls().iter().any(|c| c.starts_with("test_migrate:")));
    }

    #[tokio::test]
    async fn guard_uses_remote_refreshed_status() {
        let mut api = MockApi::default();
        api.recovery_points = vec![point("rp-1", "2026-08-01T00:00:00Z")];
        // Local record is stale; the remote side has already advanced.
        api.items_by_name.insert(
            "web01".into(),
            crate::remote::MigrationItem {
                id: "/items/web01".into(),
                name: "web01".into(),
                properties: crate::remote::MigrationItemProperties {
                    migration_state: Some("Replicating".into()),
                    ..Default::default()
                },
            },
        );
        let (wf, _api, id) = setup(api, item(MigrationStatus::Enabling)).await;
        let updated = wf.test_migrate(&id, None, None).await.unwrap();
        assert_eq!(updated.status, MigrationStatus::Replicating);
        assert_eq!(updated.test_migrate_state, TestMigrateState::InProgress);
    }

    #[tokio::test]
    async fn cleanup_requires_succeeded_test() {
        let mut ready = item(MigrationStatus::Protected);
        ready.test_migrate_state = TestMigrateState::Succeeded;
        let (wf, api, id) = setup(MockApi::default(), ready).await;
        let updated = wf.test_migrate_cleanup(&id, "looks good").await.unwrap();
        assert_eq!(updated.test_migrate_state, TestMigrateState::CleanupInProgress);
        assert!(api
            .calls()
            .iter()
            .any(|c| c == "test_migrate_cleanup:web01"));

        let (wf, api, id) = setup(MockApi::default(), item(MigrationStatus::Protected)).await;
        let err = wf.test_migrate_cleanup(&id, "nope").await.unwrap_err();
        assert_eq!(err.kind, crate::error::MigrateErrorKind::Precondition);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn migrate_moves_item_into_migration_in_progress() {
        let (wf, api, id) = setup(MockApi::default(), item(MigrationStatus::Replicating)).await;
        let updated = wf.migrate(&id, true).await.unwrap();
        assert_eq!(updated.status, MigrationStatus::MigrationInProgress);
        assert!(api.calls().iter().any(|c| c == "migrate:web01"));
    }

    #[tokio::test]
    async fn migrate_from_cancelled_fails_with_no_remote_call() {
        let (wf, api, id) = setup(MockApi::default(), item(MigrationStatus::Cancelled)).await;
        let err = wf.migrate(&id, false).await.unwrap_err();
        assert_eq!(err.kind, crate::error::MigrateErrorKind::Precondition);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn migrate_allowed_during_initial_replication() {
        let (wf, _api, id) =
            setup(MockApi::default(), item(MigrationStatus::InitialReplication)).await;
        let updated = wf.migrate(&id, false).await.unwrap();
        assert_eq!(updated.status, MigrationStatus::MigrationInProgress);
    }

    #[tokio::test]
    async fn complete_deletes_remote_item() {
        let (wf, api, id) =
            setup(MockApi::default(), item(MigrationStatus::MigrationInProgress)).await;
        let updated = wf.complete_migration(&id).await.unwrap();
        assert_eq!(updated.status, MigrationStatus::MigrationCompleted);
        assert!(updated.is_terminal());
        assert!(api
            .calls()
            .iter()
            .any(|c| c == "delete_migration_item:web01"));
    }

    #[tokio::test]
    async fn resync_sets_resyncing() {
        let (wf, _api, id) = setup(MockApi::default(), item(MigrationStatus::Protected)).await;
        let updated = wf.resync(&id).await.unwrap();
        assert_eq!(updated.status, MigrationStatus::Resyncing);
    }

    #[tokio::test]
    async fn cancel_is_local_even_without_remote_item() {
        let mut unenabled = item(MigrationStatus::AzureEnableFailed);
        unenabled.status = MigrationStatus::Enabling;
        unenabled.remote_item_id = None;
        let (wf, api, id) = setup(MockApi::default(), unenabled).await;
        let updated = wf.cancel(&id).await.unwrap();
        assert_eq!(updated.status, MigrationStatus::Cancelled);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn cancel_disables_remote_replication() {
        let (wf, api, id) = setup(MockApi::default(), item(MigrationStatus::Replicating)).await;
        let updated = wf.cancel(&id).await.unwrap();
        assert_eq!(updated.status, MigrationStatus::Cancelled);
        assert!(api
            .calls()
            .iter()
            .any(|c| c == "disable_replication:web01"));
    }

    #[tokio::test]
    async fn cancel_of_terminal_item_is_rejected() {
        let (wf, _api, id) = setup(MockApi::default(), item(MigrationStatus::Cancelled)).await;
        let err = wf.cancel(&id).await.unwrap_err();
        assert_eq!(err.kind, crate::error::MigrateErrorKind::Precondition);
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let wf = LifecycleWorkflow::new(
            Arc::new(MockApi::default()),
            Arc::new(MemoryStore::new()),
        );
        assert!(wf.migrate("missing", false).await.unwrap_err().is_not_found());
    }
}
